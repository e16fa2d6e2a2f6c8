//! Postgres Frontend Messages
//!
//! <https://www.postgresql.org/docs/current/protocol-message-formats.html>
use md5::{Digest, Md5};

use crate::FrameBuf;

/// Write a frontend message to `buf`, leaving it ready for transmission.
pub fn write<F: FrontendProtocol>(msg: F, buf: &mut FrameBuf) {
    buf.begin_write();
    buf.put_u8(F::MSGTYPE);
    buf.begin_length();
    msg.encode(buf);
    buf.end_length();
    buf.finish_write();
}

/// A type which can be encoded into postgres frontend message
pub trait FrontendProtocol {
    /// Message type.
    const MSGTYPE: u8;

    /// Write the main body of the message.
    ///
    /// The message type and length is written by [`write`].
    fn encode(self, buf: &mut FrameBuf);
}

/// Postgres Startup frontend message
///
/// For historical reasons, the very first message sent by the client (the [`Startup`] message)
/// has no initial message-type byte, thus [`Startup`] does not implement [`FrontendProtocol`].
///
/// To write startup message, use [`Startup::write`].
#[derive(Debug)]
pub struct Startup<'a> {
    /// The protocol version number.
    pub protocol_version: i32,
    /// The database user name to connect as. Required; there is no default.
    pub user: &'a str,
    /// The database to connect to. Defaults to the user name.
    pub database: Option<&'a str>,
    /// Other run-time parameters, applied as session defaults.
    pub params: &'a [(String, String)],
}

impl Startup<'_> {
    pub fn write(self, buf: &mut FrameBuf) {
        buf.begin_write();

        // Length of message contents in bytes, including self.
        buf.begin_length();

        // The most significant 16 bits are the major version number (3 for the protocol described here).
        // The least significant 16 bits are the minor version number (0 for the protocol described here).
        buf.put_i32(self.protocol_version);

        // The protocol version number is followed by one or more pairs of parameter name and value strings.

        buf.put_cstr("user");
        buf.put_cstr(self.user);

        if let Some(db) = self.database {
            buf.put_cstr("database");
            buf.put_cstr(db);
        }

        // Parameter names beginning with _pq_. are reserved for use as protocol extensions,
        // while others are treated as run-time parameters to be set at backend start time.
        for (name, value) in self.params {
            buf.put_cstr(name);
            buf.put_cstr(value);
        }

        // A zero byte is required as a terminator after the last name/value pair.
        buf.put_u8(b'\0');

        buf.end_length();
        buf.finish_write();
    }
}

/// Request the backend to switch the connection to ssl.
///
/// The backend replies with a single byte, `S` to proceed or `N` to refuse.
#[derive(Debug)]
pub struct SslRequest;

impl SslRequest {
    /// The SSL request code. The value is chosen to contain 1234 in the most significant 16 bits,
    /// and 5679 in the least significant 16 bits.
    pub const CODE: i32 = 80_877_103;

    pub fn write(self, buf: &mut FrameBuf) {
        buf.begin_write();
        buf.put_i32(8);
        buf.put_i32(Self::CODE);
        buf.finish_write();
    }
}

/// Request to cancel a query in progress, sent over a new connection.
///
/// The backend does not reply, it closes the connection.
#[derive(Debug)]
pub struct CancelRequest {
    /// The process ID of the target backend.
    pub process_id: i32,
    /// The secret key for the target backend.
    pub secret_key: i32,
}

impl CancelRequest {
    /// The cancel request code. The value is chosen to contain 1234 in the most significant 16 bits,
    /// and 5678 in the least significant 16 bits.
    pub const CODE: i32 = 80_877_102;

    pub fn write(self, buf: &mut FrameBuf) {
        buf.begin_write();
        buf.put_i32(16);
        buf.put_i32(Self::CODE);
        buf.put_i32(self.process_id);
        buf.put_i32(self.secret_key);
        buf.finish_write();
    }
}

/// Identifies the message as a password response.
#[derive(Debug)]
pub struct PasswordMessage<'a> {
    /// The password (encrypted, if requested)
    pub password: &'a str,
}

impl FrontendProtocol for PasswordMessage<'_> {
    const MSGTYPE: u8 = b'p';

    fn encode(self, buf: &mut FrameBuf) {
        buf.put_cstr(self.password);
    }
}

/// Hash a password for [`Authentication::Md5Password`][super::backend::Authentication::Md5Password].
///
/// `"md5" + hex(md5(hex(md5(password + user)) + salt))`, all hex in lowercase.
pub fn md5_password(user: &str, password: &str, salt: [u8; 4]) -> String {
    let mut md5 = Md5::new();
    md5.update(password.as_bytes());
    md5.update(user.as_bytes());
    let inner = format!("{:x}", md5.finalize_reset());

    md5.update(inner.as_bytes());
    md5.update(salt);
    format!("md5{:x}", md5.finalize())
}

/// Identifies the message as a termination.
#[derive(Debug)]
pub struct Terminate;

impl FrontendProtocol for Terminate {
    const MSGTYPE: u8 = b'X';

    fn encode(self, _: &mut FrameBuf) { }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn startup_layout() {
        let mut buf = FrameBuf::default();
        let params = [("application_name".to_owned(), "app".to_owned())];
        Startup {
            protocol_version: super::super::PROTOCOL_VERSION,
            user: "bob",
            database: Some("db"),
            params: &params,
        }
        .write(&mut buf);

        let mut expected = vec![];
        expected.extend_from_slice(&196_608i32.to_be_bytes());
        expected.extend_from_slice(b"user\0bob\0database\0db\0application_name\0app\0\0");
        let len = (expected.len() + 4) as i32;

        assert_eq!(&buf.chunk()[..4], &len.to_be_bytes());
        assert_eq!(&buf.chunk()[4..], &expected[..]);
    }

    #[test]
    fn startup_without_database() {
        let mut buf = FrameBuf::default();
        Startup { protocol_version: 196_608, user: "u", database: None, params: &[] }.write(&mut buf);
        assert_eq!(&buf.chunk()[8..], b"user\0u\0\0");
    }

    #[test]
    fn fixed_requests() {
        let mut buf = FrameBuf::default();
        SslRequest.write(&mut buf);
        assert_eq!(buf.chunk(), &[0, 0, 0, 8, 0x04, 0xd2, 0x16, 0x2f]);

        CancelRequest { process_id: 100, secret_key: 42 }.write(&mut buf);
        assert_eq!(buf.chunk(), &[0, 0, 0, 16, 0x04, 0xd2, 0x16, 0x2e, 0, 0, 0, 100, 0, 0, 0, 42]);
    }

    #[test]
    fn tagged_messages() {
        let mut buf = FrameBuf::default();
        write(PasswordMessage { password: "pw" }, &mut buf);
        assert_eq!(buf.chunk(), b"p\0\0\0\x07pw\0");

        write(Terminate, &mut buf);
        assert_eq!(buf.chunk(), b"X\0\0\0\x04");
    }

    #[test]
    fn md5_credential() {
        assert_eq!(
            md5_password("postgres", "secret", [1, 2, 3, 4]),
            "md5bb41a296aab6baccb36ff243a562abff",
        );
        assert_eq!(
            md5_password("user", "password", [0xde, 0xad, 0xbe, 0xef]),
            "md51b9db6132a24afffa2977ba84e4b389b",
        );
        assert_eq!(md5_password("", "", [1, 2, 3, 4]), "md5ada29999d4c1ee52a9d35ac6fe6129e8");
    }

    #[test]
    fn md5_credential_shape() {
        let hashed = md5_password("bob", "hunter2", [0, 0, 0, 0]);
        assert_eq!(hashed.len(), 35);
        assert!(hashed[3..].bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')));
    }
}
