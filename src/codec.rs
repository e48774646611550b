//! Line codec - frames a byte stream into protocol messages.
//!
//! Splits on `\n`, replaces every byte below 32 with `?`, and parses each
//! line into a typed message. Outgoing messages are sanitized the same way
//! and written with a single `\n` terminator.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::CodecError;
use crate::message::{ClientMessage, ServerMessage};

/// Maximum line length, excluding the terminator.
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Replace control bytes with `?` and decode the rest as (lossy) UTF-8.
pub fn sanitize(bytes: &[u8]) -> String {
    let cleaned: Vec<u8> = bytes
        .iter()
        .map(|&b| if b < 32 { b'?' } else { b })
        .collect();
    String::from_utf8_lossy(&cleaned).into_owned()
}

/// Newline-delimited, sanitized text lines.
///
/// A line cut short by end-of-stream is still yielded; end-of-stream is only
/// reported once no bytes remain.
#[derive(Debug, Default)]
pub struct LineCodec {
    // Bytes already scanned for a terminator
    next_index: usize,
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let newline = src[self.next_index..].iter().position(|b| *b == b'\n');

        match newline {
            Some(offset) => {
                let pos = self.next_index + offset;
                self.next_index = 0;
                let line = src.split_to(pos);
                src.advance(1);
                Ok(Some(sanitize(&line)))
            }
            None => {
                if src.len() > MAX_LINE_LENGTH {
                    return Err(CodecError::LineTooLong {
                        max: MAX_LINE_LENGTH,
                    });
                }
                self.next_index = src.len();
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        if src.is_empty() {
            return Ok(None);
        }
        self.next_index = 0;
        let rest = src.split_to(src.len());
        Ok(Some(sanitize(&rest)))
    }
}

impl Encoder<String> for LineCodec {
    type Error = CodecError;

    fn encode(&mut self, line: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let line = sanitize(line.as_bytes());
        dst.reserve(line.len() + 1);
        dst.put_slice(line.as_bytes());
        dst.put_u8(b'\n');
        Ok(())
    }
}

/// Server side of the wire: decodes client frames, encodes server frames.
#[derive(Debug, Default)]
pub struct ServerCodec {
    lines: LineCodec,
}

impl Decoder for ServerCodec {
    type Item = ClientMessage;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        Ok(self.lines.decode(src)?.map(|line| ClientMessage::parse(&line)))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        Ok(self.lines.decode_eof(src)?.map(|line| ClientMessage::parse(&line)))
    }
}

impl Encoder<ServerMessage> for ServerCodec {
    type Error = CodecError;

    fn encode(&mut self, item: ServerMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let wire = item.to_wire().ok_or(CodecError::Unencodable)?;
        self.lines.encode(wire, dst)
    }
}

/// Client side of the wire: decodes server frames, encodes client frames.
#[derive(Debug, Default)]
pub struct ClientCodec {
    lines: LineCodec,
}

impl Decoder for ClientCodec {
    type Item = ServerMessage;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        Ok(self.lines.decode(src)?.map(|line| ServerMessage::parse(&line)))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        Ok(self.lines.decode_eof(src)?.map(|line| ServerMessage::parse(&line)))
    }
}

impl Encoder<ClientMessage> for ClientCodec {
    type Error = CodecError;

    fn encode(&mut self, item: ClientMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let wire = item.to_wire().ok_or(CodecError::Unencodable)?;
        self.lines.encode(wire, dst)
    }
}
