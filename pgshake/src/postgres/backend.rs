//! Postgres Backend Messages
//!
//! Only the messages that can appear before the connection is ready for query are modeled.
//!
//! <https://www.postgresql.org/docs/current/protocol-message-formats.html>
use std::{collections::HashMap, fmt};

use super::ProtocolError;
use crate::{FrameBuf, Result, buf::HEADER_LEN};

/// A type that can be decoded from a buffered postgres backend message.
pub trait BackendProtocol: Sized {
    /// Message type.
    const MSGTYPE: u8;

    /// Decode the message body.
    ///
    /// The buffer cursor is at the start of the body, and the limit is the end of the message.
    fn decode(buf: &mut FrameBuf) -> Result<Self>;
}

/// Decode a fully buffered backend message.
///
/// Returns [`ProtocolError`] if the message type does not match.
pub fn decode<B: BackendProtocol>(buf: &mut FrameBuf) -> Result<B> {
    let msgtype = buf.tag();
    if B::MSGTYPE != msgtype {
        return Err(ProtocolError::unexpected(B::MSGTYPE, msgtype).into());
    }
    buf.set_position(HEADER_LEN);
    B::decode(buf)
}

macro_rules! message_names {
    ($($ty:literal => $name:ident,)*) => {
        /// Get message name from message type.
        ///
        /// Returns `"Unknown"` for unknown message type.
        pub fn message_name(msgtype: u8) -> &'static str {
            match msgtype {
                $($ty => stringify!($name),)*
                _ => "Unknown",
            }
        }
    };
}

message_names! {
    b'R' => Authentication,
    b'K' => BackendKeyData,
    b'2' => BindComplete,
    b'3' => CloseComplete,
    b'C' => CommandComplete,
    b'd' => CopyData,
    b'c' => CopyDone,
    b'G' => CopyInResponse,
    b'H' => CopyOutResponse,
    b'W' => CopyBothResponse,
    b'D' => DataRow,
    b'I' => EmptyQueryResponse,
    b'E' => ErrorResponse,
    b'v' => NegotiateProtocolVersion,
    b'n' => NoData,
    b'N' => NoticeResponse,
    b'A' => NotificationResponse,
    b't' => ParameterDescription,
    b'S' => ParameterStatus,
    b'1' => ParseComplete,
    b's' => PortalSuspended,
    b'Z' => ReadyForQuery,
    b'T' => RowDescription,
}

/// Identifies the message as an authentication request.
#[derive(Debug, PartialEq, Eq)]
pub enum Authentication {
    /// Specifies that the authentication was successful.
    Ok,
    /// Specifies that a clear-text password is required.
    CleartextPassword,
    /// Specifies that an MD5-encrypted password is required.
    Md5Password {
        /// The salt to use when encrypting the password.
        salt: [u8; 4],
    },
}

impl BackendProtocol for Authentication {
    const MSGTYPE: u8 = b'R';

    fn decode(buf: &mut FrameBuf) -> Result<Self> {
        let auth = match buf.get_i32()? {
            0 => Authentication::Ok,
            3 => Authentication::CleartextPassword,
            5 => Authentication::Md5Password { salt: buf.get_array()? },
            auth => return Err(ProtocolError::unknown_auth(auth).into()),
        };
        Ok(auth)
    }
}

/// Identifies the message as cancellation key data.
///
/// The frontend must save these values if it wishes to be able to issue CancelRequest messages later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendKeyData {
    /// The process ID of this backend.
    pub process_id: i32,
    /// The secret key of this backend.
    pub secret_key: i32,
}

impl BackendProtocol for BackendKeyData {
    const MSGTYPE: u8 = b'K';

    fn decode(buf: &mut FrameBuf) -> Result<Self> {
        Ok(Self {
            process_id: buf.get_i32()?,
            secret_key: buf.get_i32()?,
        })
    }
}

/// Identifies the message as a run-time parameter status report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterStatus {
    /// The name of the run-time parameter being reported
    pub name: String,
    /// The current value of the parameter
    pub value: String,
}

impl BackendProtocol for ParameterStatus {
    const MSGTYPE: u8 = b'S';

    fn decode(buf: &mut FrameBuf) -> Result<Self> {
        Ok(Self {
            name: buf.get_cstr()?,
            value: buf.get_cstr()?,
        })
    }
}

/// Identifies the message as a notification response.
///
/// Delivered when another session executes `NOTIFY` on a channel this session `LISTEN`s to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// The process ID of the notifying backend process.
    pub process_id: i32,
    /// The name of the channel that the notify has been raised on.
    pub channel: String,
    /// The “payload” string passed from the notifying process.
    pub payload: String,
}

impl BackendProtocol for Notification {
    const MSGTYPE: u8 = b'A';

    fn decode(buf: &mut FrameBuf) -> Result<Self> {
        Ok(Self {
            process_id: buf.get_i32()?,
            channel: buf.get_cstr()?,
            payload: buf.get_cstr()?,
        })
    }
}

/// A warning message. The frontend should display the message.
///
/// The message body consists of one or more identified fields, followed by a zero byte as a terminator.
/// Fields can appear in any order.
///
/// For each field there is the following:
///
/// `Byte1` A code identifying the field type; if zero, this is the message terminator and no string follows.
///
/// `String` The field value.
///
/// <https://www.postgresql.org/docs/current/protocol-error-fields.html>
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Notice {
    fields: HashMap<u8, String>,
}

impl Notice {
    /// Severity, localized.
    pub const SEVERITY: u8 = b'S';
    /// Severity, never localized.
    pub const SEVERITY_NONLOCALIZED: u8 = b'V';
    /// The SQLSTATE code for the error.
    pub const CODE: u8 = b'C';
    /// The primary human-readable error message.
    pub const MESSAGE: u8 = b'M';
    /// An optional secondary error message carrying more detail about the problem.
    pub const DETAIL: u8 = b'D';
    /// An optional suggestion what to do about the problem.
    pub const HINT: u8 = b'H';
    /// Indicating an error cursor position as an index into the original query string.
    pub const POSITION: u8 = b'P';
    /// An indication of the context in which the error occurred.
    pub const WHERE: u8 = b'W';

    /// Create notice from field map.
    pub fn new(fields: HashMap<u8, String>) -> Self {
        Self { fields }
    }

    /// Get a field by its code.
    pub fn field(&self, code: u8) -> Option<&str> {
        self.fields.get(&code).map(String::as_str)
    }

    /// All fields by code.
    pub fn fields(&self) -> &HashMap<u8, String> {
        &self.fields
    }

    /// Localized severity, e.g. `WARNING`.
    pub fn severity(&self) -> Option<&str> {
        self.field(Self::SEVERITY)
    }

    /// SQLSTATE code.
    pub fn code(&self) -> Option<&str> {
        self.field(Self::CODE)
    }

    /// Primary message.
    pub fn message(&self) -> Option<&str> {
        self.field(Self::MESSAGE)
    }

    /// Secondary message.
    pub fn detail(&self) -> Option<&str> {
        self.field(Self::DETAIL)
    }

    /// Suggestion what to do about the problem.
    pub fn hint(&self) -> Option<&str> {
        self.field(Self::HINT)
    }

    fn decode_fields(buf: &mut FrameBuf) -> Result<Self> {
        let mut fields = HashMap::new();
        loop {
            let code = buf.get_u8()?;
            if code == b'\0' {
                break;
            }
            fields.insert(code, buf.get_cstr()?);
        }
        Ok(Self { fields })
    }

    /// Log level matching the severity, the non-localized one when present.
    #[cfg(feature = "log")]
    pub fn level(&self) -> log::Level {
        let severity = self
            .field(Self::SEVERITY_NONLOCALIZED)
            .or_else(|| self.severity())
            .unwrap_or_default();
        match severity {
            "ERROR" | "FATAL" | "PANIC" => log::Level::Error,
            "WARNING" => log::Level::Warn,
            s if s.starts_with("DEBUG") => log::Level::Debug,
            _ => log::Level::Info,
        }
    }

    /// Log this notice with level based on its severity.
    #[cfg(feature = "log")]
    pub fn log(&self, target: &dyn fmt::Display) {
        log::log!(self.level(), "{target} {self}");
    }
}

impl BackendProtocol for Notice {
    const MSGTYPE: u8 = b'N';

    fn decode(buf: &mut FrameBuf) -> Result<Self> {
        Self::decode_fields(buf)
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.severity().unwrap_or("NOTICE"), self.message().unwrap_or_default())?;
        if let Some(code) = self.code() {
            write!(f, " ({code})")?;
        }
        if let Some(detail) = self.detail() {
            write!(f, "\nDETAIL: {detail}")?;
        }
        if let Some(hint) = self.hint() {
            write!(f, "\nHINT: {hint}")?;
        }
        Ok(())
    }
}

/// Identifies the message as an error.
///
/// Same layout as [`Notice`], but it aborts whatever operation is in flight.
#[derive(Clone, PartialEq, Eq)]
pub struct ErrorResponse {
    notice: Notice,
}

impl ErrorResponse {
    /// Fields of the error.
    pub fn notice(&self) -> &Notice {
        &self.notice
    }

    /// SQLSTATE code.
    pub fn code(&self) -> Option<&str> {
        self.notice.code()
    }

    /// Primary message.
    pub fn message(&self) -> Option<&str> {
        self.notice.message()
    }
}

impl From<Notice> for ErrorResponse {
    fn from(notice: Notice) -> Self {
        Self { notice }
    }
}

impl BackendProtocol for ErrorResponse {
    const MSGTYPE: u8 = b'E';

    fn decode(buf: &mut FrameBuf) -> Result<Self> {
        Ok(Self { notice: Notice::decode_fields(buf)? })
    }
}

impl std::error::Error for ErrorResponse { }

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.notice.severity().is_none() {
            f.write_str("ERROR")?;
            return write!(f, ": {}", self.notice.message().unwrap_or_default());
        }
        fmt::Display::fmt(&self.notice, f)
    }
}

impl fmt::Debug for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

/// Current backend transaction status indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// `I` if idle (not in a transaction block).
    Idle,
    /// `T` if in a transaction block.
    InTransaction,
    /// `E` if in a failed transaction block (queries will be rejected until block is ended).
    Failed,
}

impl TransactionStatus {
    /// Parse the status indicator byte.
    pub fn from_u8(status: u8) -> Result<Self, ProtocolError> {
        match status {
            b'I' => Ok(Self::Idle),
            b'T' => Ok(Self::InTransaction),
            b'E' => Ok(Self::Failed),
            found => Err(ProtocolError::UnknownTransactionStatus { found }),
        }
    }
}

/// Identifies the message type. ReadyForQuery is sent whenever the backend is ready for a new query cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyForQuery {
    /// Current backend transaction status.
    pub status: TransactionStatus,
}

impl BackendProtocol for ReadyForQuery {
    const MSGTYPE: u8 = b'Z';

    fn decode(buf: &mut FrameBuf) -> Result<Self> {
        Ok(Self { status: TransactionStatus::from_u8(buf.get_u8()?)? })
    }
}
