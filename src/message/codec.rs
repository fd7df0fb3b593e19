// src/message/codec.rs

//! Typed field encoding for command and reply payloads.
//!
//! A payload is a flat sequence of fields written in a fixed order per
//! message type. There is no schema on the wire: integers are big-endian and
//! fixed width, byte strings carry a `u32` length prefix, UTF-8 strings a
//! `u16` byte-length prefix and UTF-16 strings a `u16` code-unit count.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::{MessageType, Msg};
use crate::error::{CoraError, CoraResult};

/// Builds a payload field by field.
///
/// Length overflows are remembered and reported by [`PayloadWriter::finish`]
/// so call sites can chain puts without checking each one.
#[derive(Debug)]
pub struct PayloadWriter {
  msg_type: MessageType,
  buf: BytesMut,
  overflow: Option<String>,
}

impl PayloadWriter {
  pub fn new(msg_type: MessageType) -> Self {
    Self {
      msg_type,
      buf: BytesMut::with_capacity(64),
      overflow: None,
    }
  }

  pub fn msg_type(&self) -> MessageType {
    self.msg_type
  }

  pub fn put_u8(&mut self, v: u8) -> &mut Self {
    self.buf.put_u8(v);
    self
  }

  pub fn put_bool(&mut self, v: bool) -> &mut Self {
    self.put_u8(v as u8)
  }

  pub fn put_u16(&mut self, v: u16) -> &mut Self {
    self.buf.put_u16(v);
    self
  }

  pub fn put_u32(&mut self, v: u32) -> &mut Self {
    self.buf.put_u32(v);
    self
  }

  pub fn put_u64(&mut self, v: u64) -> &mut Self {
    self.buf.put_u64(v);
    self
  }

  pub fn put_i8(&mut self, v: i8) -> &mut Self {
    self.buf.put_i8(v);
    self
  }

  pub fn put_i16(&mut self, v: i16) -> &mut Self {
    self.buf.put_i16(v);
    self
  }

  pub fn put_i32(&mut self, v: i32) -> &mut Self {
    self.buf.put_i32(v);
    self
  }

  pub fn put_i64(&mut self, v: i64) -> &mut Self {
    self.buf.put_i64(v);
    self
  }

  pub fn put_f64(&mut self, v: f64) -> &mut Self {
    self.buf.put_f64(v);
    self
  }

  /// Byte string with a `u32` length prefix.
  pub fn put_bytes(&mut self, v: &[u8]) -> &mut Self {
    match u32::try_from(v.len()) {
      Ok(len) => {
        self.buf.reserve(4 + v.len());
        self.buf.put_u32(len);
        self.buf.put_slice(v);
      }
      Err(_) => self.note_overflow(format!("byte string of {} bytes", v.len())),
    }
    self
  }

  /// UTF-8 string with a `u16` byte-length prefix.
  pub fn put_str(&mut self, v: &str) -> &mut Self {
    match u16::try_from(v.len()) {
      Ok(len) => {
        self.buf.reserve(2 + v.len());
        self.buf.put_u16(len);
        self.buf.put_slice(v.as_bytes());
      }
      Err(_) => self.note_overflow(format!("UTF-8 string of {} bytes", v.len())),
    }
    self
  }

  /// UTF-16 string with a `u16` code-unit count prefix.
  pub fn put_wstr(&mut self, v: &str) -> &mut Self {
    let units: Vec<u16> = v.encode_utf16().collect();
    match u16::try_from(units.len()) {
      Ok(count) => {
        self.buf.reserve(2 + units.len() * 2);
        self.buf.put_u16(count);
        for unit in units {
          self.buf.put_u16(unit);
        }
      }
      Err(_) => self.note_overflow(format!("UTF-16 string of {} code units", units.len())),
    }
    self
  }

  fn note_overflow(&mut self, what: String) {
    if self.overflow.is_none() {
      self.overflow = Some(what);
    }
  }

  /// Finishes the payload. Fails if any field exceeded its length prefix.
  pub fn finish(self) -> CoraResult<Msg> {
    if let Some(what) = self.overflow {
      return Err(CoraError::InvalidArgument(format!(
        "{} does not fit its length prefix in message {}",
        what, self.msg_type
      )));
    }
    Ok(Msg::new(self.msg_type, self.buf.freeze()))
  }
}

/// Reads typed fields from a payload in declaration order.
#[derive(Debug, Clone)]
pub struct PayloadReader<'a> {
  buf: &'a [u8],
}

impl<'a> PayloadReader<'a> {
  pub fn new(buf: &'a [u8]) -> Self {
    Self { buf }
  }

  pub fn remaining(&self) -> usize {
    self.buf.remaining()
  }

  pub fn is_empty(&self) -> bool {
    self.buf.is_empty()
  }

  fn need(&self, n: usize, field: &'static str) -> CoraResult<()> {
    if self.buf.remaining() < n {
      return Err(CoraError::InvalidMessage(format!(
        "payload truncated reading {} (need {} bytes, have {})",
        field,
        n,
        self.buf.remaining()
      )));
    }
    Ok(())
  }

  pub fn get_u8(&mut self) -> CoraResult<u8> {
    self.need(1, "u8")?;
    Ok(self.buf.get_u8())
  }

  pub fn get_bool(&mut self) -> CoraResult<bool> {
    Ok(self.get_u8()? != 0)
  }

  pub fn get_u16(&mut self) -> CoraResult<u16> {
    self.need(2, "u16")?;
    Ok(self.buf.get_u16())
  }

  pub fn get_u32(&mut self) -> CoraResult<u32> {
    self.need(4, "u32")?;
    Ok(self.buf.get_u32())
  }

  pub fn get_u64(&mut self) -> CoraResult<u64> {
    self.need(8, "u64")?;
    Ok(self.buf.get_u64())
  }

  pub fn get_i8(&mut self) -> CoraResult<i8> {
    self.need(1, "i8")?;
    Ok(self.buf.get_i8())
  }

  pub fn get_i16(&mut self) -> CoraResult<i16> {
    self.need(2, "i16")?;
    Ok(self.buf.get_i16())
  }

  pub fn get_i32(&mut self) -> CoraResult<i32> {
    self.need(4, "i32")?;
    Ok(self.buf.get_i32())
  }

  pub fn get_i64(&mut self) -> CoraResult<i64> {
    self.need(8, "i64")?;
    Ok(self.buf.get_i64())
  }

  pub fn get_f64(&mut self) -> CoraResult<f64> {
    self.need(8, "f64")?;
    Ok(self.buf.get_f64())
  }

  /// Byte string with a `u32` length prefix.
  pub fn get_bytes(&mut self) -> CoraResult<Bytes> {
    let len = self.get_u32()? as usize;
    self.need(len, "byte string body")?;
    let body = Bytes::copy_from_slice(&self.buf[..len]);
    self.buf.advance(len);
    Ok(body)
  }

  /// UTF-8 string with a `u16` byte-length prefix.
  pub fn get_str(&mut self) -> CoraResult<String> {
    let len = self.get_u16()? as usize;
    self.need(len, "UTF-8 string body")?;
    let text = std::str::from_utf8(&self.buf[..len])
      .map_err(|e| CoraError::InvalidMessage(format!("invalid UTF-8 string: {}", e)))?
      .to_string();
    self.buf.advance(len);
    Ok(text)
  }

  /// UTF-16 string with a `u16` code-unit count prefix.
  pub fn get_wstr(&mut self) -> CoraResult<String> {
    let count = self.get_u16()? as usize;
    self.need(count * 2, "UTF-16 string body")?;
    let mut units = Vec::with_capacity(count);
    for _ in 0..count {
      units.push(self.buf.get_u16());
    }
    String::from_utf16(&units).map_err(|e| CoraError::InvalidMessage(format!("invalid UTF-16 string: {}", e)))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const TEST_TYPE: MessageType = MessageType(0x7001);

  #[test]
  fn fields_read_back_in_declared_order() {
    let mut w = PayloadWriter::new(TEST_TYPE);
    w.put_u32(42)
      .put_str("Station1")
      .put_wstr("Température")
      .put_i64(-7)
      .put_bool(true)
      .put_bytes(&[1, 2, 3]);
    let msg = w.finish().unwrap();
    assert_eq!(msg.msg_type(), TEST_TYPE);

    let mut r = msg.reader();
    assert_eq!(r.get_u32().unwrap(), 42);
    assert_eq!(r.get_str().unwrap(), "Station1");
    assert_eq!(r.get_wstr().unwrap(), "Température");
    assert_eq!(r.get_i64().unwrap(), -7);
    assert!(r.get_bool().unwrap());
    assert_eq!(&r.get_bytes().unwrap()[..], &[1, 2, 3]);
    assert!(r.is_empty());
  }

  #[test]
  fn truncated_payload_is_an_invalid_message() {
    let payload = [0u8, 0, 0, 9, b'a', b'b'];
    let mut r = PayloadReader::new(&payload);
    match r.get_bytes() {
      Err(CoraError::InvalidMessage(reason)) => assert!(reason.contains("byte string body")),
      other => panic!("expected truncation error, got {:?}", other),
    }

    let mut short = PayloadReader::new(&[0u8, 1]);
    assert!(short.get_u32().is_err());
  }

  #[test]
  fn invalid_utf8_is_rejected() {
    let payload = [0u8, 2, 0xff, 0xfe];
    let mut r = PayloadReader::new(&payload);
    assert!(matches!(r.get_str(), Err(CoraError::InvalidMessage(_))));
  }

  #[test]
  fn oversized_string_fails_at_finish() {
    let long = "x".repeat(u16::MAX as usize + 1);
    let mut w = PayloadWriter::new(TEST_TYPE);
    w.put_u32(1).put_str(&long);
    assert!(matches!(w.finish(), Err(CoraError::InvalidArgument(_))));
  }
}
