// src/transport/frame.rs

//! Framing used by the TCP router.
//!
//! Every frame is `[u32 body_len][u32 session][u32 type][payload]`, big-endian,
//! where `body_len` counts the session, type and payload bytes. Types in the
//! control range open, close and break sessions; everything else is a
//! session message.

use super::{BrokenReason, SessionId};
use crate::error::CoraError;
use crate::message::{MessageType, Msg};
use crate::options::DEFAULT_MAX_FRAME_LEN;
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

pub const CONTROL_SESSION_OPEN: u32 = 0xFFFF_0001;
pub const CONTROL_SESSION_CLOSE: u32 = 0xFFFF_0002;
pub const CONTROL_SESSION_BROKEN: u32 = 0xFFFF_0003;

const LEN_PREFIX: usize = 4;
const HEADER_LEN: usize = 8; // session + type
const EMPTY: &[u8] = &[];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
  Open { session: SessionId },
  Close { session: SessionId },
  Broken { session: SessionId, reason: BrokenReason },
  Data { session: SessionId, msg: Msg },
}

impl Frame {
  pub fn session(&self) -> SessionId {
    match self {
      Frame::Open { session }
      | Frame::Close { session }
      | Frame::Broken { session, .. }
      | Frame::Data { session, .. } => *session,
    }
  }
}

/// `tokio-util` codec for [`Frame`]s.
#[derive(Debug)]
pub struct FrameCodec {
  max_frame_len: usize,
  /// Body length of a frame whose header has been read.
  pending_body: Option<usize>,
}

impl FrameCodec {
  pub fn new(max_frame_len: usize) -> Self {
    Self {
      max_frame_len,
      pending_body: None,
    }
  }
}

impl Default for FrameCodec {
  fn default() -> Self {
    Self::new(DEFAULT_MAX_FRAME_LEN)
  }
}

impl Encoder<Frame> for FrameCodec {
  type Error = CoraError;

  fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
    let (session, type_code, payload): (SessionId, u32, &[u8]) = match &item {
      Frame::Open { session } => (*session, CONTROL_SESSION_OPEN, EMPTY),
      Frame::Close { session } => (*session, CONTROL_SESSION_CLOSE, EMPTY),
      Frame::Broken { session, .. } => (*session, CONTROL_SESSION_BROKEN, EMPTY),
      Frame::Data { session, msg } => {
        if msg.msg_type().code() >= CONTROL_SESSION_OPEN {
          return Err(CoraError::InvalidArgument(format!(
            "message type {} is reserved for router control",
            msg.msg_type()
          )));
        }
        (*session, msg.msg_type().code(), msg.payload())
      }
    };
    let reason_len = if let Frame::Broken { .. } = item { 4 } else { 0 };
    let body_len = HEADER_LEN + reason_len + payload.len();
    if body_len > self.max_frame_len {
      return Err(CoraError::InvalidArgument(format!(
        "frame of {} bytes exceeds limit of {}",
        body_len, self.max_frame_len
      )));
    }

    dst.reserve(LEN_PREFIX + body_len);
    dst.put_u32(body_len as u32);
    dst.put_u32(session.0);
    dst.put_u32(type_code);
    if let Frame::Broken { reason, .. } = item {
      dst.put_u32(reason.code());
    }
    dst.put_slice(payload);
    Ok(())
  }
}

impl Decoder for FrameCodec {
  type Item = Frame;
  type Error = CoraError;

  fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
    let body_len = match self.pending_body {
      Some(len) => len,
      None => {
        if src.len() < LEN_PREFIX {
          return Ok(None);
        }
        let len = src.get_u32() as usize;
        if len < HEADER_LEN || len > self.max_frame_len {
          return Err(CoraError::ProtocolViolation(format!("invalid frame length {}", len)));
        }
        self.pending_body = Some(len);
        len
      }
    };

    if src.len() < body_len {
      src.reserve(body_len - src.len());
      return Ok(None);
    }
    self.pending_body = None;

    let mut body = src.split_to(body_len);
    let session = SessionId(body.get_u32());
    let type_code = body.get_u32();
    let frame = match type_code {
      CONTROL_SESSION_OPEN => Frame::Open { session },
      CONTROL_SESSION_CLOSE => Frame::Close { session },
      CONTROL_SESSION_BROKEN => {
        if body.len() < 4 {
          return Err(CoraError::ProtocolViolation(
            "session broken frame without reason".to_string(),
          ));
        }
        Frame::Broken {
          session,
          reason: BrokenReason::from_code(body.get_u32()),
        }
      }
      code if code >= CONTROL_SESSION_OPEN => {
        return Err(CoraError::ProtocolViolation(format!(
          "unknown control frame type {:#x}",
          code
        )));
      }
      code => Frame::Data {
        session,
        msg: Msg::new(MessageType(code), body.freeze()),
      },
    };
    Ok(Some(frame))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn decodes_frames_split_across_reads() {
    let mut codec = FrameCodec::default();
    let mut wire = BytesMut::new();
    codec
      .encode(
        Frame::Data {
          session: SessionId(4),
          msg: Msg::from_static(MessageType(102), b"\x00\x00\x00\x07\x00\x00\x00\x01"),
        },
        &mut wire,
      )
      .unwrap();
    codec
      .encode(
        Frame::Broken {
          session: SessionId(4),
          reason: BrokenReason::ClosedByServer,
        },
        &mut wire,
      )
      .unwrap();

    let mut src = BytesMut::new();
    src.extend_from_slice(&wire[..6]);
    assert!(codec.decode(&mut src).unwrap().is_none());
    src.extend_from_slice(&wire[6..]);

    match codec.decode(&mut src).unwrap() {
      Some(Frame::Data { session, msg }) => {
        assert_eq!(session, SessionId(4));
        assert_eq!(msg.msg_type(), MessageType(102));
        assert_eq!(msg.size(), 8);
      }
      other => panic!("expected data frame, got {:?}", other),
    }
    assert_eq!(
      codec.decode(&mut src).unwrap(),
      Some(Frame::Broken {
        session: SessionId(4),
        reason: BrokenReason::ClosedByServer
      })
    );
    assert!(src.is_empty());
  }

  #[test]
  fn oversized_length_is_a_protocol_violation() {
    let mut codec = FrameCodec::new(64);
    let mut src = BytesMut::new();
    src.put_u32(65);
    assert!(matches!(codec.decode(&mut src), Err(CoraError::ProtocolViolation(_))));
  }

  #[test]
  fn reserved_message_types_are_not_encodable() {
    let mut codec = FrameCodec::default();
    let mut dst = BytesMut::new();
    let res = codec.encode(
      Frame::Data {
        session: SessionId(1),
        msg: Msg::from_static(MessageType(CONTROL_SESSION_CLOSE), b""),
      },
      &mut dst,
    );
    assert!(matches!(res, Err(CoraError::InvalidArgument(_))));
  }
}
