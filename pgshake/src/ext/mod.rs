use std::fmt;

/// Helper trait to [`Display`][fmt::Display] a message type byte.
pub trait TagExt {
    /// Printable form of a message type byte.
    fn tag(self) -> TagFmt;
}

/// Helper trait to [`Display`][fmt::Display] bytes.
#[cfg(feature = "verbose")]
pub trait FmtExt {
    /// Lossy [`Display`][fmt::Display] bytes.
    fn lossy(&self) -> LossyFmt<'_>;
}

/// [`Display`][fmt::Display] implementation for a message type byte.
///
/// Graphic ascii is printed as is, anything else is printed as escaped hex.
#[derive(Clone, Copy)]
pub struct TagFmt(pub u8);

/// Lossy [`Display`][fmt::Display] implementation for bytes.
#[cfg(feature = "verbose")]
pub struct LossyFmt<'a>(pub &'a [u8]);

impl TagExt for u8 {
    fn tag(self) -> TagFmt {
        TagFmt(self)
    }
}

#[cfg(feature = "verbose")]
impl FmtExt for [u8] {
    fn lossy(&self) -> LossyFmt<'_> {
        LossyFmt(self)
    }
}

fn write_byte(f: &mut fmt::Formatter<'_>, b: u8) -> fmt::Result {
    if b.is_ascii_graphic() || b == b' ' {
        write!(f, "{}", b as char)
    } else {
        write!(f, "\\x{b:02x}")
    }
}

impl fmt::Display for TagFmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_byte(f, self.0)
    }
}

impl fmt::Debug for TagFmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "b'{self}'")
    }
}

#[cfg(feature = "verbose")]
impl fmt::Display for LossyFmt<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in self.0 {
            write_byte(f, b)?;
        }
        Ok(())
    }
}

#[cfg(feature = "verbose")]
impl fmt::Debug for LossyFmt<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "b\"{self}\"")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn printable_tag() {
        assert_eq!(b'R'.tag().to_string(), "R");
        assert_eq!(0u8.tag().to_string(), "\\x00");
        assert_eq!(format!("{:?}", b'Z'.tag()), "b'Z'");
    }

    #[cfg(feature = "verbose")]
    #[test]
    fn lossy_bytes() {
        assert_eq!(b"md5\x00\xff".lossy().to_string(), "md5\\x00\\xff");
    }
}
