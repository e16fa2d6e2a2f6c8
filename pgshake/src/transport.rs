//! The [`Transport`] trait.
use std::{io, time::Duration};

/// A raw byte stream to the backend.
///
/// All operations are asynchronous, and each io operation either completes fully or fails, there is
/// no partial read or write. When an operation exceeds its timeout, implementor should return
/// [`io::ErrorKind::TimedOut`], and the transport must be considered unusable.
///
/// The handshake never issues overlapping operations on the same transport.
pub trait Transport: Sized {
    /// Read exactly `buf.len()` bytes.
    ///
    /// Reading into an empty `buf` completes immediately.
    fn read_exact(&mut self, buf: &mut [u8], timeout: Duration) -> impl Future<Output = io::Result<()>>;

    /// Write the whole `buf`, and flush it.
    fn write_all(&mut self, buf: &[u8], timeout: Duration) -> impl Future<Output = io::Result<()>>;

    /// The local port, if the transport have one.
    fn local_port(&self) -> Option<u16>;

    /// Close the transport.
    ///
    /// Closing an already closed transport should not fail.
    fn close(&mut self) -> impl Future<Output = io::Result<()>>;

    /// Upgrade the transport to an encrypted one.
    ///
    /// Called after the backend accepted the ssl request. The returned transport replaces `self`
    /// entirely, the old one is never used again.
    fn upgrade(self) -> impl Future<Output = io::Result<Self>>;
}
