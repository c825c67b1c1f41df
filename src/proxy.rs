// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Remote rings as local ones.
//
// `consume_from("tcp://host/ring")` on a remote host creates (or reuses) a
// local proxy ring named `ring@host`, becomes its producer, and starts a
// thread that copies bytes from a ring master data socket into it. The caller
// gets an ordinary consumer on the proxy ring. When the socket closes, errors
// or stays silent past the network timeout, the thread ends and the producer
// slot is released; local consumers then see a ring with no producer.

use std::fmt;
use std::io::{self, Read};
use std::net::TcpStream;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config;
use crate::error::{Error, Result};
use crate::master::RingMasterClient;
use crate::ring::{Consumer, Monitor, Producer, RingBuffer};
use crate::shm_name::validate_ring_name;

/// Largest single socket read the forwarder issues.
const READ_CHUNK: usize = 64 * 1024;

/// A parsed `scheme://host[:port]/ring` address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingUrl {
    pub scheme: String,
    pub host: String,
    /// Ring master port; `None` means "ask the configured locator".
    pub port: Option<u16>,
    pub ring: String,
}

impl fmt::Display for RingUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let host = if self.host.contains(':') { format!("[{}]", self.host) } else { self.host.clone() };
        match self.port {
            Some(p) => write!(f, "{}://{host}:{p}/{}", self.scheme, self.ring),
            None => write!(f, "{}://{host}/{}", self.scheme, self.ring),
        }
    }
}

pub fn parse_ring_url(url: &str) -> Result<RingUrl> {
    let bad = || Error::BadUrl(url.to_owned());
    let (scheme, rest) = url.split_once("://").ok_or_else(bad)?;
    if scheme.is_empty() || !scheme.chars().all(|c| c.is_ascii_alphanumeric() || c == '+') {
        return Err(bad());
    }
    let (authority, ring) = rest.split_once('/').ok_or_else(bad)?;

    let (host, port) = if let Some(v6) = authority.strip_prefix('[') {
        let (host, tail) = v6.split_once(']').ok_or_else(bad)?;
        match tail {
            "" => (host, None),
            t => (host, Some(t.strip_prefix(':').ok_or_else(bad)?)),
        }
    } else {
        match authority.split_once(':') {
            Some((h, p)) => (h, Some(p)),
            None => (authority, None),
        }
    };
    if host.is_empty() {
        return Err(bad());
    }
    let port = port.map(|p| p.parse::<u16>().map_err(|_| bad())).transpose()?;
    validate_ring_name(ring).map_err(|why| Error::BadUrl(format!("{url}: {why}")))?;

    Ok(RingUrl { scheme: scheme.to_owned(), host: host.to_owned(), port, ring: ring.to_owned() })
}

/// Name of the local ring that mirrors `ring` on `host`.
pub fn compute_local_ring_name(ring: &str, host: &str) -> String {
    format!("{ring}@{host}")
}

/// Whether `host` names this machine by its loopback identity. Any other
/// spelling, the real host name included, takes the network path.
pub fn is_local_host(host: &str) -> bool {
    matches!(host.to_ascii_lowercase().as_str(), "localhost" | "127.0.0.1" | "::1")
}

/// Attach a consumer to the ring at `url`, proxying it over the network when
/// it lives on another host.
pub fn consume_from(url: &str) -> Result<Consumer> {
    let u = parse_ring_url(url)?;
    if is_local_host(&u.host) {
        return Consumer::attach(&u.ring);
    }

    let local = compute_local_ring_name(&u.ring, &u.host);
    if RingBuffer::is_ring(&local) {
        if Monitor::attach(&local)?.usage().producer_pid.is_some() {
            debug!(ring = %local, "reusing running proxy");
            return Consumer::attach(&local);
        }
    } else {
        match RingBuffer::create_with(&local, config::proxy_ring_size(), config::proxy_max_consumers()) {
            Ok(()) => {}
            Err(e) if e.is_already_exists() => {}
            Err(e) => return Err(e),
        }
    }

    let producer = match Producer::attach(&local) {
        Ok(p) => p,
        // Another caller won the race and is already forwarding.
        Err(Error::ProducerExists { .. }) => return Consumer::attach(&local),
        Err(e) => return Err(e),
    };
    // Attach before any forwarded byte lands so nothing is missed.
    let consumer = Consumer::attach(&local)?;

    let master = match u.port {
        Some(port) => RingMasterClient::new(&u.host, port),
        None => RingMasterClient::locate(&u.host)?,
    };
    let stream = master.request_data(&u.ring)?;
    info!(url = %u, ring = %local, "proxy started");
    ProxyRing::spawn(producer, stream, ProxySettings::from_config());
    Ok(consumer)
}

/// Per-session forwarding knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxySettings {
    /// Bytes accumulated from the socket before each `put`.
    pub min_data: usize,
    /// A read that waits longer than this ends the session.
    pub timeout: Duration,
}

impl ProxySettings {
    pub fn from_config() -> Self {
        Self { min_data: config::proxy_min_data(), timeout: config::network_timeout() }
    }
}

/// A forwarding thread feeding a local proxy ring from a data socket.
pub struct ProxyRing {
    local_name: String,
    thread: JoinHandle<Result<u64>>,
}

impl ProxyRing {
    /// Become the producer of `local_name` and forward `stream` into it.
    pub fn start(stream: TcpStream, local_name: &str, settings: ProxySettings) -> Result<Self> {
        let producer = Producer::attach(local_name)?;
        Ok(Self::spawn(producer, stream, settings))
    }

    fn spawn(producer: Producer, stream: TcpStream, settings: ProxySettings) -> Self {
        let local_name = producer.name().to_owned();
        let thread = thread::spawn(move || {
            let ring = producer.name().to_owned();
            let result = pump(producer, stream, settings);
            match &result {
                Ok(bytes) => info!(ring = %ring, bytes, "proxy source closed"),
                Err(e) => warn!(ring = %ring, error = %e, "proxy stopped"),
            }
            result
        });
        Self { local_name, thread }
    }

    pub fn local_name(&self) -> &str {
        &self.local_name
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the forwarder to end. `Ok(n)` after a clean EOF with `n`
    /// bytes forwarded; an error for timeouts and socket failures.
    pub fn join(self) -> Result<u64> {
        self.thread
            .join()
            .map_err(|_| Error::Protocol(format!("proxy thread for {} panicked", self.local_name)))?
    }
}

/// Copy `sock` into `producer`, putting once at least `min_data` bytes have
/// accumulated. Whatever is buffered is flushed before returning.
fn pump(mut producer: Producer, mut sock: TcpStream, settings: ProxySettings) -> Result<u64> {
    sock.set_read_timeout(Some(settings.timeout))?;
    let capacity = producer.header().data_bytes - 1;
    let min_data = settings.min_data.clamp(1, capacity);
    let mut buf = vec![0u8; READ_CHUNK.max(min_data).min(capacity)];
    let mut filled = 0usize;
    let mut total = 0u64;

    let outcome = loop {
        match sock.read(&mut buf[filled..]) {
            Ok(0) => break Ok(()),
            Ok(n) => {
                filled += n;
                if filled >= min_data {
                    producer.put(&buf[..filled])?;
                    total += filled as u64;
                    filled = 0;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => break Err(e),
        }
    };

    if filled > 0 {
        producer.put(&buf[..filled])?;
        total += filled as u64;
    }
    match outcome {
        Ok(()) => Ok(total),
        Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
            Err(Error::os("proxy read", producer.name(), io::Error::new(io::ErrorKind::TimedOut, e)))
        }
        Err(e) => Err(Error::os("proxy read", producer.name(), e)),
    }
}
