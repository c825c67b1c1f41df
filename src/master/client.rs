// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Client side of the ring master protocol.

use std::net::TcpStream;
use std::time::Duration;

use tracing::debug;

use crate::config::{self, MasterLocator};
use crate::error::{Error, Result};
use crate::master::portman::PortManagerClient;
use crate::master::protocol::{self, Reply, Request};
use crate::ring::ClientEntry;

/// Talks to the ring master on one host.
#[derive(Debug, Clone)]
pub struct RingMasterClient {
    host: String,
    port: u16,
    timeout: Duration,
}

impl RingMasterClient {
    /// Client for a ring master known to listen on `host:port`.
    pub fn new(host: &str, port: u16) -> Self {
        Self { host: host.to_owned(), port, timeout: config::network_timeout() }
    }

    /// Find the ring master on `host` using the configured locator.
    pub fn locate(host: &str) -> Result<Self> {
        let port = match config::master_locator() {
            MasterLocator::Fixed(port) => port,
            MasterLocator::PortManager { port, service } => PortManagerClient::new(host, port)
                .lookup(&service)?
                .ok_or_else(|| Error::NotFound(format!("{service} service on {host}")))?,
        };
        debug!(host, port, "located ring master");
        Ok(Self::new(host, port))
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Send `request` and read the first reply line.
    fn exchange(&self, request: &Request) -> Result<(TcpStream, Reply)> {
        let mut stream = TcpStream::connect((self.host.as_str(), self.port))?;
        stream.set_read_timeout(Some(self.timeout))?;
        protocol::write_line(&mut stream, &request.to_line())?;
        let reply = Reply::parse(&protocol::read_line(&mut stream)?)?;
        Ok((stream, reply))
    }

    fn expect_ok(&self, request: Request, operation: &'static str, ring: &str) -> Result<()> {
        match self.exchange(&request)?.1 {
            Reply::Ok => Ok(()),
            Reply::Fail(code, text) => Err(code.into_error(operation, ring, text)),
            other => Err(Error::Protocol(format!("unexpected reply {other:?} to {operation}"))),
        }
    }

    fn expect_lines(&self, request: Request, operation: &'static str, ring: &str) -> Result<Vec<String>> {
        let (mut stream, reply) = self.exchange(&request)?;
        match reply {
            Reply::Count(n) => {
                (0..n).map(|_| protocol::read_line(&mut stream).map_err(Error::from)).collect()
            }
            Reply::Fail(code, text) => Err(code.into_error(operation, ring, text)),
            other => Err(Error::Protocol(format!("unexpected reply {other:?} to {operation}"))),
        }
    }

    /// Tell the ring master that `ring` now exists on its host.
    pub fn notify_create(&self, ring: &str) -> Result<()> {
        self.expect_ok(Request::Register(ring.to_owned()), "REGISTER", ring)
    }

    pub fn notify_destroy(&self, ring: &str) -> Result<()> {
        self.expect_ok(Request::Unregister(ring.to_owned()), "UNREGISTER", ring)
    }

    pub fn list_rings(&self) -> Result<Vec<String>> {
        self.expect_lines(Request::List, "LIST", "")
    }

    pub fn list_clients(&self, ring: &str) -> Result<Vec<ClientEntry>> {
        self.expect_lines(Request::Clients(ring.to_owned()), "CLIENTS", ring)?
            .iter()
            .map(|l| protocol::decode_client(l))
            .collect()
    }

    /// Open a data connection streaming `ring` from its current position.
    /// The returned socket has no read timeout set.
    pub fn request_data(&self, ring: &str) -> Result<TcpStream> {
        let (stream, reply) = self.exchange(&Request::Remote(ring.to_owned()))?;
        match reply {
            Reply::BinaryFollows => {
                stream.set_read_timeout(None)?;
                Ok(stream)
            }
            Reply::Fail(code, text) => Err(code.into_error("REMOTE", ring, text)),
            other => Err(Error::Protocol(format!("unexpected reply {other:?} to REMOTE"))),
        }
    }
}
