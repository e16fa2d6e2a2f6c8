//! Protocol error
use std::fmt;

use super::backend;
use crate::ext::TagExt;

/// Backend sent something the protocol does not allow at that point.
pub enum ProtocolError {
    Unexpected {
        expect: Option<u8>,
        found: u8,
        phase: Option<&'static str>,
    },
    UnknownAuth {
        auth: i32,
    },
    UnknownSslResponse {
        found: u8,
    },
    UnknownTransactionStatus {
        found: u8,
    },
    Malformed {
        reason: &'static str,
    },
}

impl std::error::Error for ProtocolError { }

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ProtocolError::Unexpected { expect, found, phase } => {
                let name = backend::message_name(found);
                match expect {
                    Some(m) => write!(
                        f,
                        "Expected message `{}` found `{name}` ({})",
                        backend::message_name(m),
                        found.tag(),
                    )?,
                    None => write!(f, "Unexpected message `{name}` ({})", found.tag())?,
                }
                if let Some(phase) = phase {
                    write!(f, " in `{phase}`")?
                }
                Ok(())
            },
            ProtocolError::UnknownAuth { auth } => write!(f, "Unsupported authentication method `{auth}`"),
            ProtocolError::UnknownSslResponse { found } => {
                write!(f, "Unrecognized ssl response `{}`", found.tag())
            },
            ProtocolError::UnknownTransactionStatus { found } => {
                write!(f, "Unrecognized transaction status `{}`", found.tag())
            },
            ProtocolError::Malformed { reason } => write!(f, "Malformed message: {reason}"),
        }
    }
}

impl fmt::Debug for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl ProtocolError {
    pub(crate) fn unexpected(expect: u8, found: u8) -> ProtocolError {
        Self::Unexpected {
            expect: Some(expect),
            found,
            phase: None,
        }
    }

    pub(crate) fn unexpected_phase(found: u8, phase: &'static str) -> ProtocolError {
        Self::Unexpected {
            expect: None,
            found,
            phase: Some(phase),
        }
    }

    pub(crate) fn unknown_auth(auth: i32) -> ProtocolError {
        Self::UnknownAuth { auth }
    }

    pub(crate) fn malformed(reason: &'static str) -> ProtocolError {
        Self::Malformed { reason }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn display() {
        let err = ProtocolError::unexpected_phase(b'D', "authentication");
        assert_eq!(err.to_string(), "Unexpected message `DataRow` (D) in `authentication`");

        let err = ProtocolError::unexpected(b'R', b'?');
        assert_eq!(err.to_string(), "Expected message `Authentication` found `Unknown` (?)");

        let err = ProtocolError::UnknownSslResponse { found: 0 };
        assert_eq!(err.to_string(), "Unrecognized ssl response `\\x00`");
    }
}
