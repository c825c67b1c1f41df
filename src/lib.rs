// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Shared-memory ring buffers for moving event data between processes on one
// host: one producer, many independent consumers, lock-free data path and
// polling-based blocking. A per-host ring master tracks the rings and streams
// them to other hosts, where they reappear as local proxy rings.

#![cfg(unix)]

pub mod config;
pub mod cursor;
pub mod layout;
pub mod logging;
pub mod master;
pub mod proxy;
pub mod shm_name;

mod error;
pub use error::{Error, ErrorCategory, Result, Role};

mod platform;
pub use platform::{host_name, is_pid_alive, page_size};

mod shm;
pub use shm::{ShmHandle, ShmOpenMode};

mod ring;
pub use ring::{ClientEntry, ClientStats, Consumer, Monitor, Producer, RingBuffer, Usage};

pub use proxy::{compute_local_ring_name, consume_from, parse_ring_url, ProxyRing, ProxySettings, RingUrl};
