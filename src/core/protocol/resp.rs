// src/core/protocol/resp.rs

//! Implements the RESP (REdis Serialization Protocol) frame structure and the
//! corresponding `Encoder` and `Decoder` for network communication.
//!
//! In addition to the five RESP2 framings, the decoder accepts inline
//! commands (space-separated text terminated by CRLF), which are surfaced as
//! ordinary arrays of bulk strings.

use crate::core::OpalDBError;
use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// The CRLF (Carriage Return, Line Feed) sequence terminating lines in RESP.
const CRLF: &[u8] = b"\r\n";
const CRLF_LEN: usize = 2;

// Protocol-level limits to prevent denial-of-service from malformed frames.
const MAX_FRAME_ELEMENTS: usize = 1_024 * 1_024;
const MAX_BULK_STRING_SIZE: usize = 512 * 1024 * 1024; // 512MB

/// A single frame in the RESP protocol: the low-level representation of all
/// data exchanged between client and server, and of every AOF record.
#[derive(Debug, Clone, PartialEq)]
pub enum RespFrame {
    SimpleString(String),
    Error(String),
    Integer(i64),
    BulkString(Bytes),
    /// Null bulk string (`$-1\r\n`).
    Null,
    /// Null array (`*-1\r\n`).
    NullArray,
    Array(Vec<RespFrame>),
}

impl RespFrame {
    pub fn ok() -> Self {
        RespFrame::SimpleString("OK".into())
    }

    pub fn pong() -> Self {
        RespFrame::SimpleString("PONG".into())
    }

    pub fn queued() -> Self {
        RespFrame::SimpleString("QUEUED".into())
    }

    /// The empty array reply, used by EXEC to signal an optimistic-check
    /// conflict.
    pub fn empty_array() -> Self {
        RespFrame::Array(Vec::new())
    }

    /// Builds the multi-bulk framing of a command line.
    pub fn from_cmd_line(line: &[Bytes]) -> Self {
        RespFrame::Array(line.iter().cloned().map(RespFrame::BulkString).collect())
    }

    /// Interprets an array of bulk strings as a command line. Returns `None`
    /// for any other shape.
    pub fn as_cmd_line(&self) -> Option<Vec<Bytes>> {
        match self {
            RespFrame::Array(items) => items
                .iter()
                .map(|f| match f {
                    RespFrame::BulkString(b) => Some(b.clone()),
                    RespFrame::SimpleString(s) => Some(Bytes::from(s.clone().into_bytes())),
                    _ => None,
                })
                .collect(),
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, RespFrame::Error(_))
    }

    /// A convenience method to encode a frame into a `Vec<u8>`.
    /// Used by replication and AOF persistence where a complete byte vector
    /// is needed.
    pub fn encode_to_vec(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        encode_into(self, &mut buf);
        buf
    }
}

impl From<OpalDBError> for RespFrame {
    fn from(e: OpalDBError) -> Self {
        RespFrame::Error(e.to_resp_string())
    }
}

fn encode_into(frame: &RespFrame, dst: &mut Vec<u8>) {
    let mut int_buf = itoa::Buffer::new();
    match frame {
        RespFrame::SimpleString(s) => {
            dst.push(b'+');
            dst.extend_from_slice(s.as_bytes());
            dst.extend_from_slice(CRLF);
        }
        RespFrame::Error(s) => {
            dst.push(b'-');
            dst.extend_from_slice(s.as_bytes());
            dst.extend_from_slice(CRLF);
        }
        RespFrame::Integer(i) => {
            dst.push(b':');
            dst.extend_from_slice(int_buf.format(*i).as_bytes());
            dst.extend_from_slice(CRLF);
        }
        RespFrame::BulkString(b) => {
            dst.push(b'$');
            dst.extend_from_slice(int_buf.format(b.len()).as_bytes());
            dst.extend_from_slice(CRLF);
            dst.extend_from_slice(b);
            dst.extend_from_slice(CRLF);
        }
        RespFrame::Null => dst.extend_from_slice(b"$-1\r\n"),
        RespFrame::NullArray => dst.extend_from_slice(b"*-1\r\n"),
        RespFrame::Array(items) => {
            dst.push(b'*');
            dst.extend_from_slice(int_buf.format(items.len()).as_bytes());
            dst.extend_from_slice(CRLF);
            for item in items {
                encode_into(item, dst);
            }
        }
    }
}

/// A `tokio_util::codec` implementation for `RespFrame`s.
#[derive(Debug, Default)]
pub struct RespFrameCodec;

impl Encoder<RespFrame> for RespFrameCodec {
    type Error = OpalDBError;

    fn encode(&mut self, item: RespFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(&item.encode_to_vec());
        Ok(())
    }
}

impl Decoder for RespFrameCodec {
    type Item = RespFrame;
    type Error = OpalDBError;

    /// Returns `Ok(None)` while the buffer does not yet contain a full frame,
    /// letting the `Framed` stream wait for more data from the network.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match parse_frame(src) {
            Ok((frame, len)) => {
                src.advance(len);
                Ok(Some(frame))
            }
            Err(OpalDBError::IncompleteData) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Decodes a single frame from the front of `src`, reporting the number of
/// bytes it occupies. Returns `Ok(None)` when the buffer holds only a frame
/// prefix. The byte count is what the replication offset advances by.
pub fn decode_one(src: &[u8]) -> Result<Option<(RespFrame, usize)>, OpalDBError> {
    match parse_frame(src) {
        Ok(pair) => Ok(Some(pair)),
        Err(OpalDBError::IncompleteData) => Ok(None),
        Err(e) => Err(e),
    }
}

/// The main parsing entry point: inspects the type prefix and dispatches.
/// Any other first byte is treated as the start of an inline command.
fn parse_frame(src: &[u8]) -> Result<(RespFrame, usize), OpalDBError> {
    if src.is_empty() {
        return Err(OpalDBError::IncompleteData);
    }
    match src[0] {
        b'+' => parse_simple_string(src),
        b'-' => parse_error(src),
        b':' => parse_integer(src),
        b'$' => parse_bulk_string(src),
        b'*' => parse_array(src),
        _ => parse_inline(src),
    }
}

/// Finds the next CRLF sequence in a buffer.
fn find_crlf(src: &[u8]) -> Option<usize> {
    src.windows(CRLF_LEN).position(|window| window == CRLF)
}

/// Parses a single line (up to CRLF) from a buffer.
fn parse_line(src: &[u8]) -> Result<(&[u8], usize), OpalDBError> {
    find_crlf(src)
        .map(|pos| (&src[..pos], pos + CRLF_LEN))
        .ok_or(OpalDBError::IncompleteData)
}

fn parse_simple_string(src: &[u8]) -> Result<(RespFrame, usize), OpalDBError> {
    let (line, len) = parse_line(&src[1..])?;
    Ok((
        RespFrame::SimpleString(String::from_utf8_lossy(line).to_string()),
        len + 1,
    ))
}

fn parse_error(src: &[u8]) -> Result<(RespFrame, usize), OpalDBError> {
    let (line, len) = parse_line(&src[1..])?;
    Ok((
        RespFrame::Error(String::from_utf8_lossy(line).to_string()),
        len + 1,
    ))
}

fn parse_integer(src: &[u8]) -> Result<(RespFrame, usize), OpalDBError> {
    let (line, len) = parse_line(&src[1..])?;
    let s = String::from_utf8_lossy(line);
    let i = s.parse::<i64>().map_err(|_| OpalDBError::SyntaxError)?;
    Ok((RespFrame::Integer(i), len + 1))
}

fn parse_bulk_string(src: &[u8]) -> Result<(RespFrame, usize), OpalDBError> {
    let (line, len_of_line) = parse_line(&src[1..])?;
    let s = String::from_utf8_lossy(line);
    let str_len = s.parse::<isize>().map_err(|_| OpalDBError::SyntaxError)?;

    // Null Bulk String ($-1\r\n).
    if str_len == -1 {
        return Ok((RespFrame::Null, len_of_line + 1));
    }
    if str_len < 0 {
        return Err(OpalDBError::SyntaxError);
    }

    let str_len = str_len as usize;
    if str_len > MAX_BULK_STRING_SIZE {
        return Err(OpalDBError::SyntaxError);
    }

    let total_len_prefix = len_of_line + 1;
    // The entire bulk string (data plus final CRLF) must be in the buffer.
    if src.len() < total_len_prefix + str_len + CRLF_LEN {
        return Err(OpalDBError::IncompleteData);
    }
    if &src[total_len_prefix + str_len..total_len_prefix + str_len + CRLF_LEN] != CRLF {
        return Err(OpalDBError::SyntaxError);
    }

    let data = Bytes::copy_from_slice(&src[total_len_prefix..total_len_prefix + str_len]);
    Ok((RespFrame::BulkString(data), total_len_prefix + str_len + CRLF_LEN))
}

fn parse_array(src: &[u8]) -> Result<(RespFrame, usize), OpalDBError> {
    let (line, len_of_line) = parse_line(&src[1..])?;
    let s = String::from_utf8_lossy(line);
    let arr_len = s.parse::<isize>().map_err(|_| OpalDBError::SyntaxError)?;

    // Null Array (*-1\r\n).
    if arr_len == -1 {
        return Ok((RespFrame::NullArray, len_of_line + 1));
    }
    if arr_len < 0 {
        return Err(OpalDBError::SyntaxError);
    }

    let arr_len = arr_len as usize;
    if arr_len > MAX_FRAME_ELEMENTS {
        return Err(OpalDBError::SyntaxError);
    }

    let mut frames = Vec::with_capacity(arr_len);
    let mut cursor = len_of_line + 1;
    for _ in 0..arr_len {
        let (frame, frame_len) = parse_frame(&src[cursor..])?;
        frames.push(frame);
        cursor += frame_len;
    }
    Ok((RespFrame::Array(frames), cursor))
}

/// Longest accepted inline command line.
const MAX_INLINE_LINE: usize = 64 * 1024;

/// Parses an inline command: whitespace-separated words up to CRLF, surfaced
/// as an array of bulk strings. A blank line parses to an empty array, which
/// the connection loop skips.
fn parse_inline(src: &[u8]) -> Result<(RespFrame, usize), OpalDBError> {
    if find_crlf(src).is_none() && src.len() > MAX_INLINE_LINE {
        return Err(OpalDBError::ProtocolError("inline command too long".into()));
    }
    let (line, len) = parse_line(src)?;
    let words = line
        .split(|b| *b == b' ' || *b == b'\t')
        .filter(|w| !w.is_empty())
        .map(|w| RespFrame::BulkString(Bytes::copy_from_slice(w)))
        .collect();
    Ok((RespFrame::Array(words), len))
}
