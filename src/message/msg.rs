// src/message/msg.rs

use bytes::Bytes;
use std::fmt;

use super::codec::PayloadReader;

/// Numeric message type code carried beside every payload.
///
/// The code and the field layout behind it are a hard contract with the
/// server version; see `crate::protocol::types` for the codes this crate
/// speaks.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct MessageType(pub u32);

impl MessageType {
  pub const fn code(self) -> u32 {
    self.0
  }
}

impl fmt::Debug for MessageType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "MessageType({:#06x})", self.0)
  }
}

impl fmt::Display for MessageType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{:#06x}", self.0)
  }
}

/// One message exchanged with the server over a router session.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Msg {
  msg_type: MessageType,
  // Bytes keeps clones cheap when a router fans a message out.
  payload: Bytes,
}

impl Msg {
  pub fn new(msg_type: MessageType, payload: Bytes) -> Self {
    Self { msg_type, payload }
  }

  /// Creates a message from a `Vec<u8>`, taking ownership.
  pub fn from_vec(msg_type: MessageType, payload: Vec<u8>) -> Self {
    Self::new(msg_type, Bytes::from(payload))
  }

  /// Creates a message from a static byte slice (zero-copy).
  pub fn from_static(msg_type: MessageType, payload: &'static [u8]) -> Self {
    Self::new(msg_type, Bytes::from_static(payload))
  }

  pub fn msg_type(&self) -> MessageType {
    self.msg_type
  }

  pub fn payload(&self) -> &[u8] {
    &self.payload
  }

  /// Returns the internal `Bytes` handle (reference counted).
  pub fn payload_bytes(&self) -> Bytes {
    self.payload.clone()
  }

  pub fn size(&self) -> usize {
    self.payload.len()
  }

  /// Starts a typed field reader over the payload.
  pub fn reader(&self) -> PayloadReader<'_> {
    PayloadReader::new(&self.payload)
  }
}

impl fmt::Debug for Msg {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Msg")
      .field("msg_type", &self.msg_type)
      .field("payload", &format!("{} bytes", self.payload.len())) // Avoid printing large payloads
      .finish()
  }
}
