// src/protocol/device.rs

//! The open-device exchange that binds a router session to one datalogger.
//!
//! Command: `{tran_no u32, logon_session u32, device_name str}`.
//! Ack: `{tran_no u32, resp u32, access_level u32}`.

use super::logon::expect_type;
use super::types::{OPEN_DEVICE_ACK, OPEN_DEVICE_CMD};
use super::AckStatus;
use crate::error::CoraResult;
use crate::message::{Msg, PayloadWriter};
use crate::transaction::ClientFailure;
use crate::transport::SessionId;

pub const DEVICE_OK: u32 = 1;
pub const DEVICE_INVALID_NAME: u32 = 2;
pub const DEVICE_SECURITY_BLOCKED: u32 = 3;
pub const DEVICE_UNSUPPORTED: u32 = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenDeviceRequest {
  pub tran_no: u32,
  /// The router session that carried the logon.
  pub logon_session: SessionId,
  pub device_name: String,
}

impl OpenDeviceRequest {
  pub fn encode(&self) -> CoraResult<Msg> {
    let mut w = PayloadWriter::new(OPEN_DEVICE_CMD);
    w.put_u32(self.tran_no)
      .put_u32(self.logon_session.0)
      .put_str(&self.device_name);
    w.finish()
  }

  pub fn decode(msg: &Msg) -> CoraResult<Self> {
    expect_type(msg, OPEN_DEVICE_CMD)?;
    let mut r = msg.reader();
    Ok(Self {
      tran_no: r.get_u32()?,
      logon_session: SessionId(r.get_u32()?),
      device_name: r.get_str()?,
    })
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceAck {
  pub tran_no: u32,
  pub resp: u32,
  pub access_level: u32,
}

impl DeviceAck {
  pub fn encode(&self) -> Msg {
    let mut w = PayloadWriter::new(OPEN_DEVICE_ACK);
    w.put_u32(self.tran_no).put_u32(self.resp).put_u32(self.access_level);
    w.finish().unwrap_or_default()
  }

  pub fn decode(msg: &Msg) -> CoraResult<Self> {
    expect_type(msg, OPEN_DEVICE_ACK)?;
    let mut r = msg.reader();
    Ok(Self {
      tran_no: r.get_u32()?,
      resp: r.get_u32()?,
      access_level: r.get_u32()?,
    })
  }

  pub fn status(&self) -> AckStatus {
    match self.resp {
      DEVICE_OK => AckStatus::Ok,
      DEVICE_INVALID_NAME => AckStatus::Failed(ClientFailure::InvalidDeviceName),
      DEVICE_SECURITY_BLOCKED => AckStatus::Failed(ClientFailure::ServerSecurityBlocked),
      DEVICE_UNSUPPORTED => AckStatus::Failed(ClientFailure::Unsupported),
      other => AckStatus::Unrecognized(other),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::CoraError;

  #[test]
  fn device_ack_status_table() {
    let ack = |resp| {
      DeviceAck {
        tran_no: 3,
        resp,
        access_level: 0,
      }
      .status()
    };
    assert_eq!(ack(DEVICE_OK), AckStatus::Ok);
    assert_eq!(ack(DEVICE_INVALID_NAME), AckStatus::Failed(ClientFailure::InvalidDeviceName));
    assert_eq!(ack(42), AckStatus::Unrecognized(42));
  }

  #[test]
  fn decoding_the_wrong_type_is_a_protocol_violation() {
    let ack = DeviceAck {
      tran_no: 1,
      resp: 1,
      access_level: 3,
    }
    .encode();
    assert!(matches!(
      OpenDeviceRequest::decode(&ack),
      Err(CoraError::ProtocolViolation(_))
    ));
    assert_eq!(DeviceAck::decode(&ack).unwrap().access_level, 3);
  }
}
