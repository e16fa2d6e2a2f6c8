//! The [`FrameBuf`] type.
//!
//! A single reusable byte region shared by every read and write of one connection.
//!
//! The buffer have two modes, which is toggled by the caller:
//!
//! - write mode, started by [`begin_write`][FrameBuf::begin_write], where bytes are appended at
//!   the cursor, and finished with [`finish_write`][FrameBuf::finish_write] which flip the buffer so
//!   the written bytes become readable.
//! - read mode, where [`fill`][FrameBuf::fill] exposes the region between the cursor and the limit to
//!   be filled by the transport, and decode operations consume bytes from the cursor up to the limit.
//!
//! Storage only grows, it is never shrunk nor reallocated between messages.
use bytes::{Buf, BufMut, BytesMut, TryGetError};

use crate::{Result, postgres::ProtocolError};

/// Default storage growth granularity.
pub const DEFAULT_BUFFER_STEP: usize = 1024;

/// Message type byte plus the message length.
pub const HEADER_LEN: usize = 1 + 4;

/// Growable byte buffer with cursor and limit, plus length-prefixed message framing helpers.
#[derive(Debug)]
pub struct FrameBuf {
    /// `storage.len()` is the usable capacity, all of it initialized.
    storage: BytesMut,
    pos: usize,
    limit: usize,
    step: usize,
    /// Offsets of the reserved length fields, waiting to be patched.
    lengths: Vec<usize>,
}

impl FrameBuf {
    /// Create new buffer which grow in multiple of `step` bytes.
    pub fn new(step: usize) -> Self {
        let step = step.max(HEADER_LEN);
        let mut storage = BytesMut::with_capacity(step);
        storage.resize(step, 0);
        Self { storage, pos: 0, limit: step, step, lengths: Vec::new() }
    }

    /// Total bytes the buffer can hold without growing.
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Current cursor position.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Current limit.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Bytes between the cursor and the limit.
    pub fn remaining(&self) -> usize {
        self.limit - self.pos
    }

    /// Move the cursor.
    ///
    /// # Panics
    ///
    /// Panics if `pos` is greater than the limit.
    pub fn set_position(&mut self, pos: usize) {
        assert!(pos <= self.limit, "position {pos} beyond limit {}", self.limit);
        self.pos = pos;
    }

    /// Move the limit, growing the storage if needed.
    ///
    /// The cursor is clamped to the new limit.
    pub fn set_limit(&mut self, limit: usize) {
        self.grow_to(limit);
        self.limit = limit;
        self.pos = self.pos.min(limit);
    }

    /// Reset the cursor to the start and the limit to capacity.
    pub fn clear(&mut self) {
        self.pos = 0;
        self.limit = self.storage.len();
        self.lengths.clear();
    }

    /// Set the limit to the cursor and rewind the cursor to the start.
    pub fn flip(&mut self) {
        self.limit = self.pos;
        self.pos = 0;
    }

    /// Make sure at least `n` bytes are available after the cursor.
    ///
    /// Already written bytes are preserved.
    pub fn ensure_capacity(&mut self, n: usize) {
        self.grow_to(self.pos + n);
    }

    fn grow_to(&mut self, required: usize) {
        if required <= self.storage.len() {
            return;
        }
        let new_len = required.div_ceil(self.step) * self.step;
        self.storage.resize(new_len, 0);
    }

    // ===== Write =====

    /// Start accumulating a new frontend message.
    pub fn begin_write(&mut self) {
        self.clear();
    }

    /// Flip the buffer to read mode so the written bytes can be transmitted.
    ///
    /// # Panics
    ///
    /// Panics if a reserved length field is still waiting to be patched.
    pub fn finish_write(&mut self) {
        assert!(self.lengths.is_empty(), "unbalanced length prefixed message");
        self.flip();
    }

    /// Claim the next `n` bytes for writing, growing if needed.
    fn claim(&mut self, n: usize) -> &mut [u8] {
        self.ensure_capacity(n);
        let start = self.pos;
        self.pos += n;
        self.limit = self.storage.len();
        &mut self.storage[start..self.pos]
    }

    /// Write a single byte.
    pub fn put_u8(&mut self, value: u8) {
        self.claim(1).put_u8(value);
    }

    /// Write a big endian `Int32`.
    pub fn put_i32(&mut self, value: i32) {
        self.claim(4).put_i32(value);
    }

    /// Write raw bytes.
    pub fn put_slice(&mut self, bytes: &[u8]) {
        self.claim(bytes.len()).put_slice(bytes);
    }

    /// Write a string followed by a nul terminator.
    pub fn put_cstr(&mut self, string: &str) {
        self.put_slice(string.as_bytes());
        self.put_u8(b'\0');
    }

    /// Reserve 4 bytes for a length, which will be written by [`end_length`][Self::end_length].
    pub fn begin_length(&mut self) {
        self.lengths.push(self.pos);
        self.put_i32(0);
    }

    /// Write the count of bytes written since the matching [`begin_length`][Self::begin_length],
    /// including the length field itself.
    ///
    /// # Panics
    ///
    /// Panics if there is no matching [`begin_length`][Self::begin_length], or the count does not
    /// fit in `Int32`.
    pub fn end_length(&mut self) {
        let offset = self.lengths.pop().expect("end_length without begin_length");
        let len = i32::try_from(self.pos - offset).expect("message size too large for protocol");
        (&mut self.storage[offset..offset + 4]).put_i32(len);
    }

    /// Bytes between the cursor and the limit.
    pub fn chunk(&self) -> &[u8] {
        &self.storage[self.pos..self.limit]
    }

    // ===== Read =====

    /// Expose the region between the cursor and the limit to be filled.
    ///
    /// The cursor is moved to the limit, so the caller must fill the whole region.
    pub fn fill(&mut self) -> &mut [u8] {
        let start = self.pos;
        self.pos = self.limit;
        &mut self.storage[start..self.limit]
    }

    /// Message type of a buffered backend message.
    pub fn tag(&self) -> u8 {
        self.storage[0]
    }

    /// Read a big endian `Int32` at given index without moving the cursor.
    pub fn peek_i32(&self, at: usize) -> Result<i32> {
        let mut bytes = self.storage[..self.limit].get(at..).unwrap_or_default();
        Ok(bytes.try_get_i32().map_err(truncated)?)
    }

    /// Decode from the bytes between the cursor and the limit, then advance past what `get`
    /// consumed.
    fn get_with<V>(&mut self, get: impl FnOnce(&mut &[u8]) -> Result<V, TryGetError>) -> Result<V> {
        let mut chunk = &self.storage[self.pos..self.limit];
        let value = get(&mut chunk).map_err(truncated)?;
        self.pos = self.limit - chunk.len();
        Ok(value)
    }

    /// Read a single byte.
    pub fn get_u8(&mut self) -> Result<u8> {
        self.get_with(|b| b.try_get_u8())
    }

    /// Read a big endian `Int32`.
    pub fn get_i32(&mut self) -> Result<i32> {
        self.get_with(|b| b.try_get_i32())
    }

    /// Read exactly `N` bytes.
    pub fn get_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        self.get_with(|b| b.try_copy_to_slice(&mut out))?;
        Ok(out)
    }

    /// Read a nul terminated string, and advance past the terminator.
    ///
    /// The string is decoded eagerly, it does not borrow the buffer.
    pub fn get_cstr(&mut self) -> Result<String> {
        let visible = &self.storage[self.pos..self.limit];
        let Some(end) = visible.iter().position(|e| *e == b'\0') else {
            return Err(ProtocolError::malformed("string is not nul terminated").into());
        };
        let string = std::str::from_utf8(&visible[..end])?.to_owned();
        self.pos += end + 1;
        Ok(string)
    }
}

fn truncated(_: TryGetError) -> ProtocolError {
    ProtocolError::malformed("truncated message")
}

impl Default for FrameBuf {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_STEP)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn length_prefix_counts_itself() {
        let mut buf = FrameBuf::default();
        buf.begin_write();
        buf.put_u8(b'p');
        buf.begin_length();
        buf.put_cstr("secret");
        buf.end_length();
        buf.finish_write();
        assert_eq!(buf.chunk(), b"p\x00\x00\x00\x0bsecret\x00");
    }

    #[test]
    fn empty_length_prefixed_body() {
        let mut buf = FrameBuf::default();
        buf.begin_write();
        buf.put_u8(b'X');
        buf.begin_length();
        buf.end_length();
        buf.finish_write();
        assert_eq!(buf.chunk(), &[b'X', 0, 0, 0, 4]);
    }

    #[test]
    fn nested_length_prefix() {
        let mut buf = FrameBuf::default();
        buf.begin_write();
        buf.begin_length();
        buf.put_u8(1);
        buf.begin_length();
        buf.put_u8(2);
        buf.end_length();
        buf.end_length();
        buf.finish_write();
        assert_eq!(buf.chunk(), &[0, 0, 0, 10, 1, 0, 0, 0, 5, 2]);
    }

    #[test]
    fn grows_without_losing_bytes() {
        let mut buf = FrameBuf::new(8);
        buf.begin_write();
        let long = "x".repeat(100);
        buf.put_i32(42);
        buf.put_cstr(&long);
        assert_eq!(buf.capacity() % 8, 0);
        assert!(buf.capacity() >= 105);
        buf.finish_write();
        assert_eq!(buf.get_i32().unwrap(), 42);
        assert_eq!(buf.get_cstr().unwrap(), long);
        assert_eq!(buf.remaining(), 0);
    }

    #[test]
    fn header_then_body_limits() {
        let mut buf = FrameBuf::new(8);
        let message = b"S\x00\x00\x00\x10client\x00UTF8\x00";

        buf.clear();
        buf.set_limit(HEADER_LEN);
        buf.fill().copy_from_slice(&message[..HEADER_LEN]);
        assert_eq!(buf.limit(), 5);

        let len = buf.peek_i32(1).unwrap() as usize;
        buf.ensure_capacity(len - 4);
        buf.set_limit(1 + len);
        assert_eq!(buf.limit(), 1 + len);
        buf.fill().copy_from_slice(&message[HEADER_LEN..]);
        buf.flip();

        assert_eq!(buf.tag(), b'S');
        assert_eq!(buf.limit(), message.len());
        buf.set_position(HEADER_LEN);
        assert_eq!(buf.get_cstr().unwrap(), "client");
        assert_eq!(buf.get_cstr().unwrap(), "UTF8");
        assert_eq!(buf.remaining(), 0);
    }

    #[test]
    fn never_reads_beyond_limit() {
        let mut buf = FrameBuf::default();
        buf.begin_write();
        buf.put_slice(b"abc");
        buf.put_slice(b"\x00garbage\x00");
        buf.finish_write();
        buf.set_limit(3);

        let err = buf.get_cstr().unwrap_err();
        assert!(err.is_protocol());
        assert!(buf.get_i32().unwrap_err().is_protocol());
        assert_eq!(buf.get_array::<3>().unwrap(), *b"abc");
        assert!(buf.get_u8().is_err());
    }

    #[test]
    fn big_endian_integers() {
        let mut buf = FrameBuf::default();
        buf.begin_write();
        buf.put_i32(-2);
        buf.put_i32(0x0102_0304);
        buf.put_u8(0xff);
        buf.finish_write();
        assert_eq!(buf.chunk(), &[0xff, 0xff, 0xff, 0xfe, 1, 2, 3, 4, 0xff]);

        assert_eq!(buf.peek_i32(4).unwrap(), 0x0102_0304);
        assert_eq!(buf.position(), 0);
        assert!(buf.peek_i32(6).unwrap_err().is_protocol());
        assert!(buf.peek_i32(100).unwrap_err().is_protocol());

        assert_eq!(buf.get_i32().unwrap(), -2);
        assert_eq!(buf.get_array::<4>().unwrap(), [1, 2, 3, 4]);
        assert_eq!(buf.get_u8().unwrap(), 0xff);
        assert_eq!(buf.remaining(), 0);
    }

    #[test]
    fn truncated_read_keeps_cursor() {
        let mut buf = FrameBuf::default();
        buf.begin_write();
        buf.put_slice(&[0, 0, 1]);
        buf.finish_write();

        assert!(buf.get_i32().unwrap_err().is_protocol());
        assert_eq!(buf.position(), 0);
        assert!(buf.get_array::<4>().is_err());
        assert_eq!(buf.get_array::<3>().unwrap(), [0, 0, 1]);
    }

    #[test]
    fn invalid_utf8_string() {
        let mut buf = FrameBuf::default();
        buf.begin_write();
        buf.put_slice(b"\xff\xfe\x00");
        buf.finish_write();
        assert!(matches!(buf.get_cstr().unwrap_err().kind(), crate::ErrorKind::Utf8(_)));
    }
}
