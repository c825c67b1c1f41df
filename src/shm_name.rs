// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Ring name <-> POSIX shared memory object name.

/// FNV-1a 64-bit hash.
pub fn fnv1a_64(data: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for &b in data {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// Maximum length for POSIX shm names. 0 disables truncation.
///
/// On macOS `PSHMNAMLEN` is 31. On Linux the limit is typically 255.
#[cfg(target_os = "macos")]
pub const SHM_NAME_MAX: usize = 31;

#[cfg(not(target_os = "macos"))]
pub const SHM_NAME_MAX: usize = 0;

/// Longest ring name accepted anywhere (shm object, wire protocol).
pub const RING_NAME_MAX: usize = 200;

/// Check that `name` can serve as a ring name: non-empty, bounded, and free
/// of path separators and whitespace (the ring master protocol is
/// line-and-word oriented).
pub fn validate_ring_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("ring name is empty".to_owned());
    }
    if name.len() > RING_NAME_MAX {
        return Err(format!("ring name longer than {RING_NAME_MAX} bytes"));
    }
    if let Some(c) = name.chars().find(|c| *c == '/' || c.is_whitespace() || c.is_control()) {
        return Err(format!("ring name {name:?} contains {c:?}"));
    }
    Ok(())
}

/// POSIX shm object name (with leading '/') backing ring `name`.
///
/// When `SHM_NAME_MAX > 0`, names that would exceed it are shortened to
/// `/<prefix>_<16-hex-FNV-1a-hash>`, keeping a prefix for debuggability.
pub fn make_shm_name(name: &str) -> String {
    let result = if name.starts_with('/') { name.to_string() } else { format!("/{name}") };

    if SHM_NAME_MAX == 0 || result.len() <= SHM_NAME_MAX {
        return result;
    }

    // 1 (underscore) + 16 (hex hash)
    const HASH_SUFFIX_LEN: usize = 1 + 16;
    let prefix_len = SHM_NAME_MAX.saturating_sub(HASH_SUFFIX_LEN + 1);

    let hash = fnv1a_64(result.as_bytes());
    let mut shortened = String::with_capacity(SHM_NAME_MAX);
    shortened.push('/');
    let body = &result[1..];
    let mut take = prefix_len.min(body.len());
    while !body.is_char_boundary(take) {
        take -= 1;
    }
    shortened.push_str(&body[..take]);
    shortened.push_str(&format!("_{hash:016x}"));
    shortened
}

/// Ring name for a shm object listed by the OS, when the mapping is invertible.
pub fn ring_name_of_object(object: &str) -> Option<String> {
    let name = object.trim_start_matches('/');
    if validate_ring_name(name).is_err() {
        return None;
    }
    // Shortened names cannot be mapped back.
    if make_shm_name(name).trim_start_matches('/') != name {
        return None;
    }
    Some(name.to_owned())
}
