//! A RESP2 encoder/decoder for the single-connection `Worker`.
//!
//! This is deliberately scoped to what a cluster client needs to speak to one
//! primary: simple strings, errors, integers, bulk strings (and their null
//! form), and arrays (and their null form). RESP3 push types are out of
//! scope — the worker always negotiates a plain RESP2 client connection.

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

const CRLF: &[u8] = b"\r\n";
const CRLF_LEN: usize = 2;
const MAX_FRAME_ELEMENTS: usize = 1_024 * 1_024;
const MAX_BULK_STRING_SIZE: usize = 512 * 1024 * 1024;

/// A single RESP2 reply or request frame.
#[derive(Debug, Clone, PartialEq)]
pub enum RespFrame {
    SimpleString(String),
    Error(String),
    Integer(i64),
    BulkString(Bytes),
    Null,
    Array(Vec<RespFrame>),
    NullArray,
}

impl RespFrame {
    /// Builds a command array frame from its argument list, the wire form
    /// every request takes regardless of verb.
    pub fn command(args: &[Bytes]) -> Self {
        RespFrame::Array(
            args.iter()
                .map(|a| RespFrame::BulkString(a.clone()))
                .collect(),
        )
    }

    /// The server error message if this frame is an `Error` frame.
    pub fn as_error(&self) -> Option<&str> {
        match self {
            RespFrame::Error(s) => Some(s),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct RespCodec;

impl Encoder<RespFrame> for RespCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: RespFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_frame(&item, dst);
        Ok(())
    }
}

fn encode_frame(item: &RespFrame, dst: &mut BytesMut) {
    match item {
        RespFrame::SimpleString(s) => {
            dst.extend_from_slice(b"+");
            dst.extend_from_slice(s.as_bytes());
            dst.extend_from_slice(CRLF);
        }
        RespFrame::Error(s) => {
            dst.extend_from_slice(b"-");
            dst.extend_from_slice(s.as_bytes());
            dst.extend_from_slice(CRLF);
        }
        RespFrame::Integer(i) => {
            dst.extend_from_slice(b":");
            dst.extend_from_slice(i.to_string().as_bytes());
            dst.extend_from_slice(CRLF);
        }
        RespFrame::BulkString(b) => {
            dst.extend_from_slice(b"$");
            dst.extend_from_slice(b.len().to_string().as_bytes());
            dst.extend_from_slice(CRLF);
            dst.extend_from_slice(b);
            dst.extend_from_slice(CRLF);
        }
        RespFrame::Null => dst.extend_from_slice(b"$-1\r\n"),
        RespFrame::NullArray => dst.extend_from_slice(b"*-1\r\n"),
        RespFrame::Array(items) => {
            dst.extend_from_slice(b"*");
            dst.extend_from_slice(items.len().to_string().as_bytes());
            dst.extend_from_slice(CRLF);
            for item in items {
                encode_frame(item, dst);
            }
        }
    }
}

/// Distinguishes "need more bytes" from a genuine protocol error so the
/// decoder can return `Ok(None)` instead of treating a partial frame as
/// malformed input.
#[derive(Debug)]
enum ParseError {
    Incomplete,
    Syntax,
}

impl Decoder for RespCodec {
    type Item = RespFrame;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match parse_frame(src) {
            Ok((frame, len)) => {
                src.advance(len);
                Ok(Some(frame))
            }
            Err(ParseError::Incomplete) => Ok(None),
            Err(ParseError::Syntax) => Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "malformed RESP frame",
            )),
        }
    }
}

fn find_crlf(src: &[u8]) -> Option<usize> {
    src.windows(CRLF_LEN).position(|w| w == CRLF)
}

fn parse_line(src: &[u8]) -> Result<(&[u8], usize), ParseError> {
    find_crlf(src)
        .map(|pos| (&src[..pos], pos + CRLF_LEN))
        .ok_or(ParseError::Incomplete)
}

fn parse_frame(src: &[u8]) -> Result<(RespFrame, usize), ParseError> {
    if src.is_empty() {
        return Err(ParseError::Incomplete);
    }
    match src[0] {
        b'+' => {
            let (line, len) = parse_line(&src[1..])?;
            Ok((
                RespFrame::SimpleString(String::from_utf8_lossy(line).to_string()),
                len + 1,
            ))
        }
        b'-' => {
            let (line, len) = parse_line(&src[1..])?;
            Ok((
                RespFrame::Error(String::from_utf8_lossy(line).to_string()),
                len + 1,
            ))
        }
        b':' => {
            let (line, len) = parse_line(&src[1..])?;
            let i = String::from_utf8_lossy(line)
                .parse::<i64>()
                .map_err(|_| ParseError::Syntax)?;
            Ok((RespFrame::Integer(i), len + 1))
        }
        b'$' => parse_bulk_string(src),
        b'*' => parse_array(src),
        _ => Err(ParseError::Syntax),
    }
}

fn parse_bulk_string(src: &[u8]) -> Result<(RespFrame, usize), ParseError> {
    let (line, len_of_line) = parse_line(&src[1..])?;
    let str_len = String::from_utf8_lossy(line)
        .parse::<isize>()
        .map_err(|_| ParseError::Syntax)?;

    if str_len == -1 {
        return Ok((RespFrame::Null, len_of_line + 1));
    }
    let str_len = str_len as usize;
    if str_len > MAX_BULK_STRING_SIZE {
        return Err(ParseError::Syntax);
    }

    let prefix_len = len_of_line + 1;
    if src.len() < prefix_len + str_len + CRLF_LEN {
        return Err(ParseError::Incomplete);
    }
    if &src[prefix_len + str_len..prefix_len + str_len + CRLF_LEN] != CRLF {
        return Err(ParseError::Syntax);
    }

    let data = Bytes::copy_from_slice(&src[prefix_len..prefix_len + str_len]);
    Ok((RespFrame::BulkString(data), prefix_len + str_len + CRLF_LEN))
}

fn parse_array(src: &[u8]) -> Result<(RespFrame, usize), ParseError> {
    let (line, len_of_line) = parse_line(&src[1..])?;
    let arr_len = String::from_utf8_lossy(line)
        .parse::<isize>()
        .map_err(|_| ParseError::Syntax)?;

    if arr_len == -1 {
        return Ok((RespFrame::NullArray, len_of_line + 1));
    }
    let arr_len = arr_len as usize;
    if arr_len > MAX_FRAME_ELEMENTS {
        return Err(ParseError::Syntax);
    }

    let mut items = Vec::with_capacity(arr_len);
    let mut cursor = len_of_line + 1;
    for _ in 0..arr_len {
        let (frame, frame_len) = parse_frame(&src[cursor..])?;
        items.push(frame);
        cursor += frame_len;
    }
    Ok((RespFrame::Array(items), cursor))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(frame: RespFrame) -> RespFrame {
        let mut codec = RespCodec;
        let mut buf = BytesMut::new();
        codec.encode(frame, &mut buf).unwrap();
        codec.decode(&mut buf).unwrap().unwrap()
    }

    #[test]
    fn encodes_and_decodes_simple_string() {
        assert_eq!(
            roundtrip(RespFrame::SimpleString("OK".into())),
            RespFrame::SimpleString("OK".into())
        );
    }

    #[test]
    fn encodes_and_decodes_error() {
        assert_eq!(
            roundtrip(RespFrame::Error("MOVED 1234 host:7002".into())),
            RespFrame::Error("MOVED 1234 host:7002".into())
        );
    }

    #[test]
    fn encodes_and_decodes_bulk_string_and_null() {
        assert_eq!(
            roundtrip(RespFrame::BulkString(Bytes::from_static(b"hello"))),
            RespFrame::BulkString(Bytes::from_static(b"hello"))
        );
        assert_eq!(roundtrip(RespFrame::Null), RespFrame::Null);
    }

    #[test]
    fn encodes_and_decodes_nested_array() {
        let frame = RespFrame::Array(vec![
            RespFrame::Integer(1),
            RespFrame::BulkString(Bytes::from_static(b"two")),
            RespFrame::Array(vec![RespFrame::SimpleString("nested".into())]),
        ]);
        assert_eq!(roundtrip(frame.clone()), frame);
    }

    #[test]
    fn decode_returns_none_on_partial_frame() {
        let mut codec = RespCodec;
        let mut buf = BytesMut::from(&b"$5\r\nhel"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }
}
