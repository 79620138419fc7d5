//! The framed wire codec (C1): `magic(4) | length(u32 BE) | checksum(u32 BE) | payload`.
//!
//! These functions are pure encode/decode over any `Read`/`Write`; they do
//! not know about sockets, timeouts as a concept beyond what the OS already
//! signals through `io::ErrorKind`, or stats. [`crate::endpoint::Endpoint`]
//! is the layer that owns a socket and decides what to do with the errors
//! returned here.

use std::io::{self, Read, Write};

use serde_json::Value;

use crate::error::{Error, FailureKind, Result};

/// 4-byte magic prefacing every frame.
pub const MAGIC: [u8; 4] = *b"JSN1";

/// `magic(4) + length(4) + checksum(4)`.
pub const HEADER_SIZE: usize = 12;

/// Default cap on payload size, matching the original `DEFAULT_MAX_MESSAGE_SIZE`.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

fn is_timeout(err: &io::Error) -> bool {
  matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

/// Reads exactly `buf.len()` bytes. `allow_recoverable_timeout` controls
/// whether a timeout with zero bytes read so far surfaces as
/// [`Error::Timeout`] (header read) or is always escalated to a framing
/// fault (payload read), per spec §4.1's edge policy.
fn read_exact_framed(stream: &mut impl Read, buf: &mut [u8], allow_recoverable_timeout: bool) -> Result<()> {
  let mut received = 0;
  while received < buf.len() {
    match stream.read(&mut buf[received..]) {
      Ok(0) => return Err(Error::ConnectionBroken),
      Ok(n) => received += n,
      Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
      Err(e) if is_timeout(&e) => {
        if allow_recoverable_timeout && received == 0 {
          return Err(Error::Timeout);
        }
        return Err(Error::Framing(FailureKind::Framing));
      }
      Err(_) => return Err(Error::ConnectionBroken),
    }
  }
  Ok(())
}

/// Writes all of `buf`, looping on partial writes. A write that returns 0
/// bytes (the peer's receive buffer is closed) is `bad_write`.
fn write_all_framed(stream: &mut impl Write, buf: &[u8]) -> Result<()> {
  let mut sent = 0;
  while sent < buf.len() {
    match stream.write(&buf[sent..]) {
      Ok(0) => return Err(Error::Framing(FailureKind::BadWrite)),
      Ok(n) => sent += n,
      Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
      Err(_) => return Err(Error::Framing(FailureKind::BadWrite)),
    }
  }
  Ok(())
}

/// Encodes and writes one JSON value as a single frame. Fails with
/// `oversize` before any byte is written if the serialised payload exceeds
/// `max_message_size`.
pub fn encode(stream: &mut impl Write, value: &Value, max_message_size: usize) -> Result<usize> {
  let payload = serde_json::to_vec(value).expect("serde_json::Value always serialises");
  if payload.len() > max_message_size {
    return Err(Error::Framing(FailureKind::Oversize));
  }
  let checksum = crc32fast::hash(&payload);

  let mut header = [0u8; HEADER_SIZE];
  header[0..4].copy_from_slice(&MAGIC);
  header[4..8].copy_from_slice(&(payload.len() as u32).to_be_bytes());
  header[8..12].copy_from_slice(&checksum.to_be_bytes());

  write_all_framed(stream, &header)?;
  write_all_framed(stream, &payload)?;
  Ok(payload.len())
}

/// The result of a successful decode: the JSON value plus the payload size
/// in bytes, so callers can record `bytes_in` without re-serialising.
pub struct Decoded {
  pub value: Value,
  pub payload_len: usize,
}

/// Reads and decodes exactly one frame, validating magic, length, checksum,
/// UTF-8, and JSON syntax in that order, per spec §4.1.
pub fn decode(stream: &mut impl Read, max_message_size: usize) -> Result<Decoded> {
  let mut header = [0u8; HEADER_SIZE];
  read_exact_framed(stream, &mut header, true)?;

  if header[0..4] != MAGIC {
    return Err(Error::Framing(FailureKind::BadHeader));
  }
  let length = u32::from_be_bytes(header[4..8].try_into().unwrap()) as usize;
  let checksum = u32::from_be_bytes(header[8..12].try_into().unwrap());
  if length > max_message_size {
    return Err(Error::Framing(FailureKind::Oversize));
  }

  let mut payload = vec![0u8; length];
  read_exact_framed(stream, &mut payload, false)?;

  if crc32fast::hash(&payload) != checksum {
    return Err(Error::Framing(FailureKind::BadCrc));
  }
  let text = std::str::from_utf8(&payload).map_err(|_| Error::Framing(FailureKind::InvalidUtf8))?;
  let value: Value = serde_json::from_str(text).map_err(|_| Error::Framing(FailureKind::InvalidJson))?;

  Ok(Decoded { value, payload_len: length })
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Cursor;
  use serde_json::json;

  fn round_trip(value: Value) -> Value {
    let mut buf = Vec::new();
    encode(&mut buf, &value, DEFAULT_MAX_MESSAGE_SIZE).unwrap();
    let mut cursor = Cursor::new(buf);
    decode(&mut cursor, DEFAULT_MAX_MESSAGE_SIZE).unwrap().value
  }

  #[test]
  fn round_trips_scalars_and_structures() {
    assert_eq!(round_trip(json!(null)), json!(null));
    assert_eq!(round_trip(json!(42)), json!(42));
    assert_eq!(round_trip(json!("hello")), json!("hello"));
    let value = json!({"echo": "hi", "i": 1, "nested": [1,2,3]});
    assert_eq!(round_trip(value.clone()), value);
  }

  #[test]
  fn header_layout_is_bit_exact() {
    let mut buf = Vec::new();
    encode(&mut buf, &json!({"a": 1}), DEFAULT_MAX_MESSAGE_SIZE).unwrap();
    assert_eq!(&buf[0..4], b"JSN1");
    let payload = serde_json::to_vec(&json!({"a": 1})).unwrap();
    let length = u32::from_be_bytes(buf[4..8].try_into().unwrap());
    assert_eq!(length as usize, payload.len());
    let checksum = u32::from_be_bytes(buf[8..12].try_into().unwrap());
    assert_eq!(checksum, crc32fast::hash(&payload));
    assert_eq!(&buf[12..], payload.as_slice());
  }

  #[test]
  fn rejects_bad_magic() {
    let mut buf = Vec::new();
    encode(&mut buf, &json!({"a": 1}), DEFAULT_MAX_MESSAGE_SIZE).unwrap();
    buf[0] = b'X';
    let mut cursor = Cursor::new(buf);
    let err = decode(&mut cursor, DEFAULT_MAX_MESSAGE_SIZE).unwrap_err();
    assert!(matches!(err, Error::Framing(FailureKind::BadHeader)));
  }

  #[test]
  fn rejects_corrupted_payload() {
    let mut buf = Vec::new();
    encode(&mut buf, &json!({"a": 1}), DEFAULT_MAX_MESSAGE_SIZE).unwrap();
    let last = buf.len() - 1;
    buf[last] ^= 0xFF;
    let mut cursor = Cursor::new(buf);
    let err = decode(&mut cursor, DEFAULT_MAX_MESSAGE_SIZE).unwrap_err();
    assert!(matches!(err, Error::Framing(FailureKind::BadCrc)));
  }

  #[test]
  fn rejects_invalid_json_payload() {
    let payload = b"not-json";
    let checksum = crc32fast::hash(payload);
    let mut buf = Vec::new();
    buf.extend_from_slice(&MAGIC);
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(&checksum.to_be_bytes());
    buf.extend_from_slice(payload);
    let mut cursor = Cursor::new(buf);
    let err = decode(&mut cursor, DEFAULT_MAX_MESSAGE_SIZE).unwrap_err();
    assert!(matches!(err, Error::Framing(FailureKind::InvalidJson)));
  }

  #[test]
  fn rejects_invalid_utf8_payload() {
    let payload: &[u8] = &[0xFF, 0xFE, 0xFD];
    let checksum = crc32fast::hash(payload);
    let mut buf = Vec::new();
    buf.extend_from_slice(&MAGIC);
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(&checksum.to_be_bytes());
    buf.extend_from_slice(payload);
    let mut cursor = Cursor::new(buf);
    let err = decode(&mut cursor, DEFAULT_MAX_MESSAGE_SIZE).unwrap_err();
    assert!(matches!(err, Error::Framing(FailureKind::InvalidUtf8)));
  }

  #[test]
  fn rejects_oversize_on_encode_and_decode() {
    let big = json!("x".repeat(64));
    let err = encode(&mut Vec::new(), &big, 8).unwrap_err();
    assert!(matches!(err, Error::Framing(FailureKind::Oversize)));

    let mut buf = Vec::new();
    encode(&mut buf, &big, DEFAULT_MAX_MESSAGE_SIZE).unwrap();
    let mut cursor = Cursor::new(buf);
    let err = decode(&mut cursor, 8).unwrap_err();
    assert!(matches!(err, Error::Framing(FailureKind::Oversize)));
  }

  #[test]
  fn truncated_payload_is_connection_broken() {
    let mut buf = Vec::new();
    encode(&mut buf, &json!({"echo": "hello world"}), DEFAULT_MAX_MESSAGE_SIZE).unwrap();
    buf.truncate(HEADER_SIZE + 5);
    let mut cursor = Cursor::new(buf);
    let err = decode(&mut cursor, DEFAULT_MAX_MESSAGE_SIZE).unwrap_err();
    assert!(matches!(err, Error::ConnectionBroken));
  }
}
