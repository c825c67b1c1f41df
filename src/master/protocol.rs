// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Ring master wire protocol. One request line per connection:
//
//   REGISTER <ring>     -> OK | FAIL <code> <text>
//   UNREGISTER <ring>   -> OK | FAIL ...
//   LIST                -> OK <n>, then n lines "<ring>"
//   CLIENTS <ring>      -> OK <n>, then n lines "<producer|consumer> <pid> <command>"
//   REMOTE <ring>       -> OK BINARY FOLLOWS, then raw ring bytes until close
//
// Lines are read one byte at a time so nothing past the newline is consumed;
// after a REMOTE reply the caller owns an untouched byte stream.

use std::io::{self, Read, Write};

use crate::error::{Error, Result, Role};
use crate::ring::ClientEntry;
use crate::shm_name::validate_ring_name;

/// Longest line accepted from a peer, newline included.
pub const MAX_LINE: usize = 4096;

pub const BINARY_FOLLOWS: &str = "OK BINARY FOLLOWS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Register(String),
    Unregister(String),
    List,
    Clients(String),
    Remote(String),
}

impl Request {
    pub fn parse(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace();
        let verb = words.next().ok_or_else(|| Error::Protocol("empty request".to_owned()))?;
        let ring = words.next();
        if words.next().is_some() {
            return Err(Error::Protocol(format!("trailing words in {line:?}")));
        }
        let named = |make: fn(String) -> Request| -> Result<Request> {
            let ring = ring.ok_or_else(|| Error::Protocol(format!("{verb} needs a ring name")))?;
            validate_ring_name(ring).map_err(Error::Protocol)?;
            Ok(make(ring.to_owned()))
        };
        match verb {
            "REGISTER" => named(Request::Register),
            "UNREGISTER" => named(Request::Unregister),
            "CLIENTS" => named(Request::Clients),
            "REMOTE" => named(Request::Remote),
            "LIST" if ring.is_none() => Ok(Request::List),
            _ => Err(Error::Protocol(format!("unknown request {line:?}"))),
        }
    }

    pub fn to_line(&self) -> String {
        match self {
            Request::Register(r) => format!("REGISTER {r}\n"),
            Request::Unregister(r) => format!("UNREGISTER {r}\n"),
            Request::List => "LIST\n".to_owned(),
            Request::Clients(r) => format!("CLIENTS {r}\n"),
            Request::Remote(r) => format!("REMOTE {r}\n"),
        }
    }
}

/// Failure classes carried in `FAIL` replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailCode {
    NotFound,
    NotSupported,
    Exists,
    Invalid,
    Error,
}

impl FailCode {
    fn as_str(self) -> &'static str {
        match self {
            FailCode::NotFound => "NOTFOUND",
            FailCode::NotSupported => "NOTSUPPORTED",
            FailCode::Exists => "EXISTS",
            FailCode::Invalid => "INVALID",
            FailCode::Error => "ERROR",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "NOTFOUND" => FailCode::NotFound,
            "NOTSUPPORTED" => FailCode::NotSupported,
            "EXISTS" => FailCode::Exists,
            "INVALID" => FailCode::Invalid,
            _ => FailCode::Error,
        }
    }

    /// Classify a server-side error for the wire.
    pub fn of(err: &Error) -> Self {
        match err {
            Error::NotFound(_) => FailCode::NotFound,
            Error::NotSupported { .. } => FailCode::NotSupported,
            Error::AlreadyRegistered(_) => FailCode::Exists,
            Error::InvalidArgument(_) | Error::NotARing(_) | Error::Protocol(_) => FailCode::Invalid,
            _ => FailCode::Error,
        }
    }

    /// Rebuild a typed error on the client side.
    pub fn into_error(self, operation: &'static str, ring: &str, text: String) -> Error {
        match self {
            FailCode::NotFound => Error::NotFound(ring.to_owned()),
            FailCode::NotSupported => Error::NotSupported { operation, detail: text },
            FailCode::Exists => Error::AlreadyRegistered(ring.to_owned()),
            FailCode::Invalid => Error::InvalidArgument(text),
            FailCode::Error => Error::Protocol(format!("{operation} {ring}: {text}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Ok,
    Count(usize),
    BinaryFollows,
    Fail(FailCode, String),
}

impl Reply {
    pub fn parse(line: &str) -> Result<Self> {
        if line == BINARY_FOLLOWS {
            return Ok(Reply::BinaryFollows);
        }
        if line == "OK" {
            return Ok(Reply::Ok);
        }
        if let Some(n) = line.strip_prefix("OK ") {
            let n = n
                .trim()
                .parse()
                .map_err(|_| Error::Protocol(format!("bad count in {line:?}")))?;
            return Ok(Reply::Count(n));
        }
        if let Some(rest) = line.strip_prefix("FAIL") {
            let rest = rest.trim_start();
            let (code, text) = rest.split_once(' ').unwrap_or((rest, ""));
            return Ok(Reply::Fail(FailCode::parse(code), text.to_owned()));
        }
        Err(Error::Protocol(format!("unexpected reply {line:?}")))
    }

    pub fn to_line(&self) -> String {
        match self {
            Reply::Ok => "OK\n".to_owned(),
            Reply::Count(n) => format!("OK {n}\n"),
            Reply::BinaryFollows => format!("{BINARY_FOLLOWS}\n"),
            Reply::Fail(code, text) => {
                // Keep the reply on one line.
                let text: String = text.chars().map(|c| if c == '\n' { ' ' } else { c }).collect();
                format!("FAIL {} {text}\n", code.as_str())
            }
        }
    }

    pub fn failure(err: &Error) -> Self {
        Reply::Fail(FailCode::of(err), err.to_string())
    }
}

pub fn encode_client(entry: &ClientEntry) -> String {
    let command: String =
        entry.command.chars().map(|c| if c == '\n' { ' ' } else { c }).collect();
    format!("{} {} {}\n", entry.role, entry.pid, command)
}

pub fn decode_client(line: &str) -> Result<ClientEntry> {
    let mut parts = line.splitn(3, ' ');
    let role = match parts.next() {
        Some("producer") => Role::Producer,
        Some("consumer") => Role::Consumer,
        _ => return Err(Error::Protocol(format!("bad client line {line:?}"))),
    };
    let pid = parts
        .next()
        .and_then(|p| p.parse().ok())
        .ok_or_else(|| Error::Protocol(format!("bad pid in {line:?}")))?;
    let command = parts.next().unwrap_or("").to_owned();
    Ok(ClientEntry { role, pid, command })
}

/// Read one `\n`-terminated line without reading past it.
/// A trailing `\r` is dropped. EOF before any byte is `UnexpectedEof`.
pub fn read_line<R: Read>(reader: &mut R) -> io::Result<String> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        match reader.read(&mut byte) {
            Ok(0) => {
                if line.is_empty() {
                    return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "peer closed"));
                }
                break;
            }
            Ok(_) if byte[0] == b'\n' => break,
            Ok(_) => {
                if line.len() >= MAX_LINE {
                    return Err(io::Error::new(io::ErrorKind::InvalidData, "line too long"));
                }
                line.push(byte[0]);
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    String::from_utf8(line).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

pub fn write_line<W: Write>(writer: &mut W, line: &str) -> io::Result<()> {
    writer.write_all(line.as_bytes())?;
    writer.flush()
}
