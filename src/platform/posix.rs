// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// POSIX shared memory and process liveness.
//
// Unlike a reference-counted segment, a ring's backing object outlives every
// mapping: dropping a `PlatformShm` only unmaps, and the object disappears
// only through an explicit `unlink_by_name`.

use std::ffi::CString;
use std::io;
use std::ptr;

use crate::shm_name;

/// Open mode flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShmMode {
    /// Create exclusively with the given size; fail with `EEXIST` otherwise.
    Create,
    /// Open an existing object and map its current size.
    Open,
}

/// Host memory page size.
pub fn page_size() -> usize {
    let sz = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if sz <= 0 {
        4096
    } else {
        sz as usize
    }
}

fn c_name_of(posix_name: &str) -> io::Result<CString> {
    CString::new(posix_name.as_bytes()).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}

// ---------------------------------------------------------------------------
// PlatformShm: a mapped POSIX shared memory object
// ---------------------------------------------------------------------------

pub struct PlatformShm {
    mem: *mut u8,
    size: usize,
    name: String, // POSIX name (with leading '/')
}

// Safety: the shared memory region is process-shared by design.
unsafe impl Send for PlatformShm {}
unsafe impl Sync for PlatformShm {}

impl PlatformShm {
    /// Create or open the object behind `name` and map it read/write.
    ///
    /// `size` is only consulted for [`ShmMode::Create`]; an opened object is
    /// mapped at whatever size it currently has.
    pub fn acquire(name: &str, size: usize, mode: ShmMode) -> io::Result<Self> {
        if name.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "name is empty"));
        }
        if mode == ShmMode::Create && size == 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "size is 0"));
        }

        let posix_name = shm_name::make_shm_name(name);
        let c_name = c_name_of(&posix_name)?;
        let perms: libc::mode_t = 0o666;

        let fd = match mode {
            ShmMode::Create => unsafe {
                libc::shm_open(
                    c_name.as_ptr(),
                    libc::O_RDWR | libc::O_CREAT | libc::O_EXCL,
                    perms as libc::c_uint,
                )
            },
            ShmMode::Open => unsafe {
                libc::shm_open(c_name.as_ptr(), libc::O_RDWR, perms as libc::c_uint)
            },
        };
        if fd == -1 {
            return Err(io::Error::last_os_error());
        }

        let total_size = match mode {
            ShmMode::Create => {
                // The umask would otherwise strip group/other write access.
                let ret = unsafe {
                    if libc::fchmod(fd, perms) != 0 {
                        -1
                    } else {
                        libc::ftruncate(fd, size as libc::off_t)
                    }
                };
                if ret != 0 {
                    let err = io::Error::last_os_error();
                    unsafe {
                        libc::close(fd);
                        libc::shm_unlink(c_name.as_ptr());
                    }
                    return Err(err);
                }
                size
            }
            ShmMode::Open => {
                let mut st: libc::stat = unsafe { std::mem::zeroed() };
                if unsafe { libc::fstat(fd, &mut st) } != 0 {
                    let err = io::Error::last_os_error();
                    unsafe { libc::close(fd) };
                    return Err(err);
                }
                if st.st_size <= 0 {
                    unsafe { libc::close(fd) };
                    return Err(io::Error::new(io::ErrorKind::InvalidData, "object is empty"));
                }
                st.st_size as usize
            }
        };

        Self::mmap_and_finish(fd, total_size, posix_name)
    }

    fn mmap_and_finish(fd: i32, total_size: usize, posix_name: String) -> io::Result<Self> {
        let mem = unsafe {
            libc::mmap(
                ptr::null_mut(),
                total_size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        unsafe { libc::close(fd) };

        if mem == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        Ok(Self { mem: mem as *mut u8, size: total_size, name: posix_name })
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.mem
    }

    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.mem
    }

    /// Mapped size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// POSIX name (with leading '/').
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Remove a named object. Existing mappings stay valid until unmapped.
    pub fn unlink_by_name(name: &str) -> io::Result<()> {
        let c_name = c_name_of(&shm_name::make_shm_name(name))?;
        if unsafe { libc::shm_unlink(c_name.as_ptr()) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl Drop for PlatformShm {
    fn drop(&mut self) {
        if self.mem.is_null() {
            return;
        }
        unsafe { libc::munmap(self.mem as *mut libc::c_void, self.size) };
    }
}

// ---------------------------------------------------------------------------
// Process liveness
// ---------------------------------------------------------------------------

pub fn current_pid() -> i32 {
    unsafe { libc::getpid() }
}

/// `kill(pid, 0)`: anything but `ESRCH` means the process exists (a live
/// process owned by another user answers `EPERM`).
pub fn is_pid_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }
    io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH)
}

/// Command line of `pid`, space separated, when the OS exposes it.
pub fn process_command(pid: i32) -> Option<String> {
    let raw = std::fs::read(format!("/proc/{pid}/cmdline")).ok()?;
    let words: Vec<String> = raw
        .split(|&b| b == 0)
        .filter(|w| !w.is_empty())
        .map(|w| String::from_utf8_lossy(w).into_owned())
        .collect();
    if words.is_empty() {
        None
    } else {
        Some(words.join(" "))
    }
}

/// This machine's host name.
pub fn host_name() -> io::Result<String> {
    let mut buf = [0u8; 256];
    let ret = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    Ok(String::from_utf8_lossy(&buf[..end]).into_owned())
}

/// Names of the shared-memory objects currently present on the host.
#[cfg(target_os = "linux")]
pub fn list_shm_objects() -> io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir("/dev/shm")? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_owned());
            }
        }
    }
    Ok(names)
}

#[cfg(not(target_os = "linux"))]
pub fn list_shm_objects() -> io::Result<Vec<String>> {
    Ok(Vec::new())
}
