//! Postgres Frontend and Backend Protocol
//!
//! Docs here mostly quoted from the official postgres documentation.
//!
//! ## Messaging Overview
//!
//! All communication is through a stream of messages. The first byte of a message identifies the message type,
//! and the next four bytes specify the length of the rest of the message (this length count includes itself,
//! but not the message-type byte). The remaining contents of the message are determined by the message type.
//!
//! ```text
//! ┏━━━━┳━━━━━━━━━━━━━━━━━━━┳━━━━━━┓
//! ┃ Ty ┃       Length      ┃ Body ┃
//! ┣━━━━╋━━━━━━━━━━━━━━━━━━━╋━━━━━━┫
//! ┃ u8 ┃        i32        ┃ [u8] ┃
//! ┣━━━━╋━━━━━━━━━━━━━━━━━━━╋━━━━━━┫
//! ┃ 52 ┃ 00 | 00 | 00 | 08 ┃  ..  ┃
//! ┗━━━━┻━━━━━━━━━━━━━━━━━━━┻━━━━━━┛
//! ```
//!
//! For historical reasons, the very first message sent by the client (the startup message)
//! has no initial message-type byte. The same goes for [`SslRequest`][frontend::SslRequest]
//! and [`CancelRequest`][frontend::CancelRequest].
//!
//! ## General Messages
//!
//! [`NoticeResponse`][backend::Notice], [`ErrorResponse`][backend::ErrorResponse],
//! [`NotificationResponse`][backend::Notification] and [`ParameterStatus`][backend::ParameterStatus]
//! can arrive at any point, unrelated to the request currently being serviced.
//!
//! <https://www.postgresql.org/docs/17/protocol-overview.html>

pub mod frontend;
pub mod backend;

mod error;

pub use frontend::FrontendProtocol;
pub use backend::{BackendProtocol, ErrorResponse, Notice, Notification, ParameterStatus, TransactionStatus};
pub use error::ProtocolError;

/// Protocol version 3.0.
///
/// The most significant 16 bits are the major version number.
/// The least significant 16 bits are the minor version number.
pub const PROTOCOL_VERSION: i32 = 196_608;
