// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors

#[cfg(unix)]
pub mod posix;

// Re-export the platform-specific implementations under a uniform name.

#[cfg(unix)]
pub use posix::{
    current_pid, host_name, is_pid_alive, list_shm_objects, page_size, process_command,
    PlatformShm, ShmMode,
};
