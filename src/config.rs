// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Process-wide defaults for ring creation, polling and proxying.
//
// A single lazily initialised instance lives for the whole process. First use
// applies `DAQRING_*` environment overrides; afterwards values change only via
// the setters, each of which returns the value it replaced.

use std::sync::OnceLock;
use std::time::Duration;

use parking_lot::RwLock;

pub const DEFAULT_RING_SIZE: usize = 8 * 1024 * 1024;
pub const DEFAULT_MAX_CONSUMERS: usize = 100;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1);
pub const DEFAULT_MIN_DATA: usize = 1;
pub const DEFAULT_NETWORK_TIMEOUT: Duration = Duration::from_secs(60);

/// Port the port manager listens on.
pub const DEFAULT_PORT_MANAGER_PORT: u16 = 30000;
/// Service name the ring master registers under.
pub const RING_MASTER_SERVICE: &str = "RingMaster";

/// How a client finds a host's ring master.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MasterLocator {
    /// Ask the port manager on the target host for `service`.
    PortManager { port: u16, service: String },
    /// The ring master listens on a fixed port.
    Fixed(u16),
}

impl Default for MasterLocator {
    fn default() -> Self {
        MasterLocator::PortManager {
            port: DEFAULT_PORT_MANAGER_PORT,
            service: RING_MASTER_SERVICE.to_owned(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub ring_size: usize,
    pub max_consumers: usize,
    pub poll_interval: Duration,
    pub proxy_ring_size: usize,
    pub proxy_max_consumers: usize,
    pub proxy_min_data: usize,
    pub network_timeout: Duration,
    pub master: MasterLocator,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ring_size: DEFAULT_RING_SIZE,
            max_consumers: DEFAULT_MAX_CONSUMERS,
            poll_interval: DEFAULT_POLL_INTERVAL,
            proxy_ring_size: DEFAULT_RING_SIZE,
            proxy_max_consumers: DEFAULT_MAX_CONSUMERS,
            proxy_min_data: DEFAULT_MIN_DATA,
            network_timeout: DEFAULT_NETWORK_TIMEOUT,
            master: MasterLocator::default(),
        }
    }
}

impl Settings {
    /// Defaults with `DAQRING_*` overrides from `lookup` applied.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut s = Settings::default();
        let num = |key: &str| -> Option<u64> {
            let raw = lookup(key)?;
            match raw.trim().parse::<u64>() {
                Ok(v) if v > 0 => Some(v),
                _ => {
                    tracing::warn!(key, value = %raw, "ignoring malformed setting");
                    None
                }
            }
        };
        if let Some(v) = num("DAQRING_RING_SIZE") {
            s.ring_size = v as usize;
        }
        if let Some(v) = num("DAQRING_MAX_CONSUMERS") {
            s.max_consumers = v as usize;
        }
        if let Some(v) = num("DAQRING_POLL_MS") {
            s.poll_interval = Duration::from_millis(v);
        }
        if let Some(v) = num("DAQRING_PROXY_RING_SIZE") {
            s.proxy_ring_size = v as usize;
        }
        if let Some(v) = num("DAQRING_PROXY_MAX_CONSUMERS") {
            s.proxy_max_consumers = v as usize;
        }
        if let Some(v) = num("DAQRING_PROXY_MIN_DATA") {
            s.proxy_min_data = v as usize;
        }
        if let Some(v) = num("DAQRING_NET_TIMEOUT_MS") {
            s.network_timeout = Duration::from_millis(v);
        }
        if let Some(v) = num("DAQRING_MASTER_PORT") {
            match u16::try_from(v) {
                Ok(port) => s.master = MasterLocator::Fixed(port),
                Err(_) => tracing::warn!(port = v, "ignoring out of range DAQRING_MASTER_PORT"),
            }
        }
        s
    }
}

fn settings() -> &'static RwLock<Settings> {
    static SETTINGS: OnceLock<RwLock<Settings>> = OnceLock::new();
    SETTINGS.get_or_init(|| RwLock::new(Settings::from_lookup(|k| std::env::var(k).ok())))
}

/// Copy of the current settings.
pub fn snapshot() -> Settings {
    settings().read().clone()
}

macro_rules! tunable {
    ($(#[$doc:meta])* $get:ident, $set:ident, $field:ident: $ty:ty) => {
        $(#[$doc])*
        pub fn $get() -> $ty {
            settings().read().$field.clone()
        }

        /// Install a new value and return the previous one.
        pub fn $set(value: $ty) -> $ty {
            std::mem::replace(&mut settings().write().$field, value)
        }
    };
}

tunable!(
    /// Data-area size used by `RingBuffer::create`.
    default_ring_size, set_default_ring_size, ring_size: usize
);
tunable!(
    /// Consumer slot count used by `RingBuffer::create`.
    default_max_consumers, set_default_max_consumers, max_consumers: usize
);
tunable!(
    /// Sleep between re-checks while `put`/`get` are blocked.
    poll_interval, set_poll_interval, poll_interval: Duration
);
tunable!(
    /// Data-area size of rings created to receive remote data.
    proxy_ring_size, set_proxy_ring_size, proxy_ring_size: usize
);
tunable!(proxy_max_consumers, set_proxy_max_consumers, proxy_max_consumers: usize);
tunable!(
    /// Bytes the proxy accumulates from the socket before each `put`.
    proxy_min_data, set_proxy_min_data, proxy_min_data: usize
);
tunable!(
    /// Read timeout on proxy data sockets and ring master conversations.
    network_timeout, set_network_timeout, network_timeout: Duration
);
tunable!(master_locator, set_master_locator, master: MasterLocator);
