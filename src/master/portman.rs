// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Client for the per-host port manager, which hands out TCP ports to named
// services and answers lookups:
//
//   LIST                   -> OK <n>, then n lines "<port> <service> <user>"
//   GIMME <service> <user> -> OK <port>   (lease lasts while the socket is open)

use std::net::TcpStream;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::master::protocol::{read_line, write_line};

/// One entry of the port manager's allocation table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortAllocation {
    pub port: u16,
    pub service: String,
    pub user: String,
}

impl PortAllocation {
    fn parse(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace();
        let port = words.next().and_then(|p| p.parse().ok());
        match (port, words.next(), words.next()) {
            (Some(port), Some(service), Some(user)) => {
                Ok(Self { port, service: service.to_owned(), user: user.to_owned() })
            }
            _ => Err(Error::Protocol(format!("bad port manager entry {line:?}"))),
        }
    }
}

/// A port held for as long as this value lives.
pub struct PortLease {
    pub port: u16,
    _conn: TcpStream,
}

pub struct PortManagerClient {
    host: String,
    port: u16,
    timeout: Duration,
}

fn current_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("LOGNAME"))
        .unwrap_or_else(|_| "unknown".to_owned())
}

fn parse_ok(line: &str) -> Result<u64> {
    let n = line
        .strip_prefix("OK ")
        .ok_or_else(|| Error::Protocol(format!("port manager said {line:?}")))?;
    n.trim().parse().map_err(|_| Error::Protocol(format!("bad number in {line:?}")))
}

impl PortManagerClient {
    pub fn new(host: &str, port: u16) -> Self {
        Self { host: host.to_owned(), port, timeout: crate::config::network_timeout() }
    }

    fn connect(&self) -> Result<TcpStream> {
        let stream = TcpStream::connect((self.host.as_str(), self.port))?;
        stream.set_read_timeout(Some(self.timeout))?;
        Ok(stream)
    }

    pub fn list(&self) -> Result<Vec<PortAllocation>> {
        let mut stream = self.connect()?;
        write_line(&mut stream, "LIST\n")?;
        let n = parse_ok(&read_line(&mut stream)?)?;
        (0..n).map(|_| PortAllocation::parse(&read_line(&mut stream)?)).collect()
    }

    /// Port currently allocated to `service`, if any.
    pub fn lookup(&self, service: &str) -> Result<Option<u16>> {
        Ok(self.list()?.into_iter().find(|a| a.service == service).map(|a| a.port))
    }

    /// Ask for a port for `service` owned by the current user.
    pub fn allocate(&self, service: &str) -> Result<PortLease> {
        let mut stream = self.connect()?;
        write_line(&mut stream, &format!("GIMME {service} {}\n", current_user()))?;
        let port = parse_ok(&read_line(&mut stream)?)?;
        let port = u16::try_from(port)
            .map_err(|_| Error::Protocol(format!("port {port} out of range")))?;
        // The lease must not time out while idle.
        stream.set_read_timeout(None)?;
        Ok(PortLease { port, _conn: stream })
    }
}
