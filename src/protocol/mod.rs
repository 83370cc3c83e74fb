//! Wire protocol messages.
//!
//! Framing is `[1-byte type][4-byte length including itself][payload]`,
//! all integers big-endian. For historical reasons the very first
//! messages of a session ([`frontend::Startup`], [`frontend::SslRequest`],
//! [`frontend::CancelRequest`]) carry no type byte and are written
//! through their own `write` methods instead of [`FrontendProtocol`].
pub mod backend;
pub mod frontend;

mod error;
mod oid;

pub use backend::BackendMessage;
pub use error::{DatabaseError, ProtocolError};
pub use oid::{ColType, Oid};

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// A type which can be encoded into a frontend message.
pub trait FrontendProtocol {
    /// message type
    const MSGTYPE: u8;

    /// size of the main body
    ///
    /// note that this is *only* the size of main body as oppose of actual wire message
    fn size_hint(&self) -> u32;

    /// write the main body of the message
    ///
    /// `buf` have the length returned from `size_hint`
    fn encode(self, buf: impl BufMut);
}

/// A type that can be decoded from a backend message.
pub trait BackendProtocol: Sized {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError>;
}

/// Write a frontend message to `buf`.
pub fn write<F: FrontendProtocol>(msg: F, buf: &mut BytesMut) {
    // msgtype + length
    const PREFIX: usize = 1 + 4;

    let size = msg.size_hint();
    buf.reserve(PREFIX + size as usize);

    let offset = buf.len();
    buf.put_u8(F::MSGTYPE);
    buf.put_u32(4 + size);

    msg.encode(&mut *buf);

    assert_eq!(
        buf.len() - offset,
        PREFIX + size as usize,
        "[BUG] frontend message body not equal to size hint"
    );
}

// Length arithmetic for size hints. Lengths are `usize` in rust while the
// wire wants fixed-width integers; overflowing a frame field panics
// instead of wrapping a corrupt length onto the socket.

/// A byte length as the wire's 4-byte form.
pub(crate) fn wire_len(len: usize) -> u32 {
    len.try_into().expect("frame field too large for protocol")
}

/// A count as the wire's 2-byte form.
pub(crate) fn wire_count(len: usize) -> u16 {
    len.try_into().expect("frame field too large for protocol")
}

/// Encoded size of a nul-terminated string field.
pub(crate) fn nul_string_len(string: &str) -> u32 {
    wire_len(string.len()) + 1
}

/// Nul-terminated string writes for message bodies.
pub(crate) trait BufMutExt: BufMut {
    fn put_nul_string(&mut self, string: &str)
    where
        Self: Sized,
    {
        self.put(string.as_bytes());
        self.put_u8(b'\0');
    }
}

impl<B: BufMut> BufMutExt for B {}

/// Nul-terminated string reads for message bodies.
pub(crate) trait BufExt: Buf {
    /// Read up to the next nul, yielding an owned string.
    ///
    /// A missing terminator or non-utf8 content is a framing-level
    /// protocol error, not a value error.
    fn get_nul_string(&mut self) -> Result<String, ProtocolError>;
}

impl BufExt for Bytes {
    fn get_nul_string(&mut self) -> Result<String, ProtocolError> {
        let Some(end) = self.iter().position(|b| *b == b'\0') else {
            return Err(ProtocolError::Framing { detail: "string field missing nul terminator" });
        };
        let raw = self.split_to(end);
        self.advance(1); // nul
        String::from_utf8(raw.into()).map_err(|err| ProtocolError::NonUtf8(err.utf8_error()))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn nul_string_round_trip() {
        let mut buf = BytesMut::new();
        buf.put_nul_string("client_encoding");
        buf.put_nul_string("UTF8");
        assert_eq!(nul_string_len("client_encoding") + nul_string_len("UTF8"), buf.len() as u32);

        let mut body = buf.freeze();
        assert_eq!(body.get_nul_string().unwrap(), "client_encoding");
        assert_eq!(body.get_nul_string().unwrap(), "UTF8");
    }

    #[test]
    fn missing_terminator_is_a_framing_error() {
        let mut body = Bytes::from_static(b"no-terminator");
        assert!(matches!(
            body.get_nul_string(),
            Err(ProtocolError::Framing { .. })
        ));
    }
}
