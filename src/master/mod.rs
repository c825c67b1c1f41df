// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Per-host ring directory and its network protocol.

pub mod client;
pub mod portman;
pub mod protocol;
pub mod server;

pub use client::RingMasterClient;
pub use portman::{PortAllocation, PortLease, PortManagerClient};
pub use server::{Directory, Origin, RingMaster, RingMasterHandle};
