// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Crate error type. Every failure maps onto one of a handful of categories so
// callers can tell "ring already exists" apart from "wrong role" or "not a ring".

use std::fmt;
use std::io;

use thiserror::Error;

/// The role a process attaches to a ring with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// The single writer.
    Producer,
    /// One of up to `max_consumers` independent readers.
    Consumer,
    /// Maps the ring without claiming a slot; may only inspect it.
    Manager,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Producer => f.write_str("producer"),
            Role::Consumer => f.write_str("consumer"),
            Role::Manager => f.write_str("manager"),
        }
    }
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad arguments, reported immediately.
    Precondition,
    /// The operation is invalid for the current role or directory state.
    State,
    /// The shared-memory, filesystem or socket layer failed.
    Os,
    /// The object exists but is not a well-formed ring.
    Structural,
    /// The directory does not know the requested ring.
    NotFound,
    /// A peer sent something that does not parse.
    Protocol,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("payload of {requested} bytes can never fit a ring of {capacity} bytes")]
    TooLarge { requested: usize, capacity: usize },

    #[error("{operation} is not permitted on a {role} attachment")]
    WrongRole { operation: &'static str, role: Role },

    #[error("ring {ring} already has a live producer (pid {pid})")]
    ProducerExists { ring: String, pid: i32 },

    #[error("ring {ring} has no free consumer slot (max {max})")]
    NoConsumerSlot { ring: String, max: usize },

    #[error("{operation} is not supported for remote peers: {detail}")]
    NotSupported { operation: &'static str, detail: String },

    #[error("ring {0} is already registered")]
    AlreadyRegistered(String),

    #[error("{operation} failed for {name}: {source}")]
    Os {
        operation: &'static str,
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("{0} is not a ring buffer")]
    NotARing(String),

    #[error("ring {0} not found")]
    NotFound(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("invalid ring url: {0}")]
    BadUrl(String),

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// Result type for ring operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn os(operation: &'static str, name: &str, source: io::Error) -> Self {
        Error::Os { operation, name: name.to_owned(), source }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::InvalidArgument(_) | Error::TooLarge { .. } | Error::BadUrl(_) => {
                ErrorCategory::Precondition
            }
            Error::WrongRole { .. }
            | Error::ProducerExists { .. }
            | Error::NoConsumerSlot { .. }
            | Error::NotSupported { .. }
            | Error::AlreadyRegistered(_) => ErrorCategory::State,
            Error::Os { .. } | Error::Io(_) => ErrorCategory::Os,
            Error::NotARing(_) => ErrorCategory::Structural,
            Error::NotFound(_) => ErrorCategory::NotFound,
            Error::Protocol(_) => ErrorCategory::Protocol,
        }
    }

    /// The errno carried by an OS-level failure, if any.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Error::Os { source, .. } | Error::Io(source) => source.raw_os_error(),
            _ => None,
        }
    }

    /// True when a create failed only because the ring is already there.
    pub fn is_already_exists(&self) -> bool {
        match self {
            Error::Os { source, .. } => source.kind() == io::ErrorKind::AlreadyExists,
            Error::AlreadyRegistered(_) => true,
            _ => false,
        }
    }
}
