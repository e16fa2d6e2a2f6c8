//! `pgshake` error types.
use std::{backtrace::Backtrace, fmt, io, str::Utf8Error};

use crate::{
    common::BoxError,
    connection::{ConfigError, ParseError},
    postgres::{ErrorResponse, ProtocolError},
};

/// A specialized [`Result`] type for `pgshake` operation.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// All possible error from `pgshake` library.
pub struct Error {
    context: &'static str,
    backtrace: Backtrace,
    kind: ErrorKind,
}

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn into_kind(self) -> ErrorKind {
        self.kind
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    /// The connection phase this error occured in, empty if unknown.
    pub fn context(&self) -> &'static str {
        self.context
    }

    /// Returns the server reported error, if this is one.
    pub fn as_database(&self) -> Option<&ErrorResponse> {
        match &self.kind {
            ErrorKind::Database(e) => Some(e),
            _ => None,
        }
    }

    /// Returns `true` if backend violates the protocol.
    pub fn is_protocol(&self) -> bool {
        matches!(self.kind, ErrorKind::Protocol(_))
    }

    /// Returns `true` if an io operation exceeded its timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(&self.kind, ErrorKind::Io(e) if e.kind() == io::ErrorKind::TimedOut)
    }

    pub(crate) fn with_context(mut self, context: &'static str) -> Self {
        if self.context.is_empty() {
            self.context = context;
        }
        self
    }
}

/// All possible error kind from `pgshake` library.
pub enum ErrorKind {
    Config(ConfigError),
    Protocol(ProtocolError),
    Io(io::Error),
    Database(ErrorResponse),
    Utf8(Utf8Error),
    Subscriber(BoxError),
}

macro_rules! from {
    (<$ty:ty>$pat:pat => $body:expr) => {
        impl From<$ty> for Error {
            fn from($pat: $ty) -> Self {
                let backtrace = std::backtrace::Backtrace::capture();
                Self { context: "", backtrace, kind: $body }
            }
        }
    };
}

from!(<ErrorKind>e => e);
from!(<ConfigError>e => ErrorKind::Config(e));
from!(<ParseError>e => ErrorKind::Config(ConfigError::Parse(e)));
from!(<ProtocolError>e => ErrorKind::Protocol(e));
from!(<io::Error>e => ErrorKind::Io(e));
from!(<ErrorResponse>e => ErrorKind::Database(e));
from!(<Utf8Error>e => ErrorKind::Utf8(e));

impl std::error::Error for Error { }

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.context.is_empty() {
            write!(f, "{}: ", self.context)?;
        }

        fmt::Display::fmt(&self.kind, f)?;

        if let std::backtrace::BacktraceStatus::Captured = self.backtrace.status() {
            let mut backtrace = self.backtrace.to_string();
            write!(f, "\n\n")?;
            writeln!(f, "Stack backtrace:")?;
            backtrace.truncate(backtrace.trim_end().len());
            write!(f, "{}", backtrace)?;
        }

        Ok(())
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

impl std::error::Error for ErrorKind { }

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => e.fmt(f),
            Self::Protocol(e) => e.fmt(f),
            Self::Io(e) => e.fmt(f),
            Self::Database(e) => e.fmt(f),
            Self::Utf8(e) => e.fmt(f),
            Self::Subscriber(e) => write!(f, "subscriber failed: {e}"),
        }
    }
}

impl fmt::Debug for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}
