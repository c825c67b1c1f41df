// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Shared memory handle over platform::PlatformShm.

use std::io;

use crate::platform::{PlatformShm, ShmMode};

/// Open mode for shared memory objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShmOpenMode {
    /// Create exclusively; fail if already exists.
    Create,
    /// Open existing; fail if it does not exist.
    Open,
}

/// A named, persistent, inter-process shared memory region.
///
/// The object survives every handle; only [`ShmHandle::unlink_by_name`]
/// destroys it.
pub struct ShmHandle {
    inner: PlatformShm,
}

impl ShmHandle {
    /// Create (`size` bytes) or open the object behind `name`.
    pub fn acquire(name: &str, size: usize, mode: ShmOpenMode) -> io::Result<Self> {
        let platform_mode = match mode {
            ShmOpenMode::Create => ShmMode::Create,
            ShmOpenMode::Open => ShmMode::Open,
        };
        let inner = PlatformShm::acquire(name, size, platform_mode)?;
        Ok(Self { inner })
    }

    /// Pointer to the start of the mapped region.
    pub fn as_ptr(&self) -> *const u8 {
        self.inner.as_ptr()
    }

    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.inner.as_mut_ptr()
    }

    /// Mapped size in bytes (the size of the object when it was mapped).
    pub fn size(&self) -> usize {
        self.inner.size()
    }

    /// The platform name used to open the object.
    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// Remove a named object without needing an open handle.
    pub fn unlink_by_name(name: &str) -> io::Result<()> {
        PlatformShm::unlink_by_name(name)
    }
}
