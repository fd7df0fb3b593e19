// src/protocol/logon.rs

//! The logon exchange that opens a server session.
//!
//! Command: `{tran_no u32, user str, password str, application str}`.
//! Ack: `{tran_no u32, resp u32}`.

use super::types::{LOGON_ACK, LOGON_CMD};
use super::AckStatus;
use crate::error::{CoraError, CoraResult};
use crate::message::{Msg, PayloadWriter};
use crate::transaction::ClientFailure;
use std::fmt;

pub const LOGON_OK: u32 = 1;
pub const LOGON_INVALID: u32 = 2;
pub const LOGON_SECURITY_BLOCKED: u32 = 3;
pub const LOGON_UNSUPPORTED: u32 = 4;

/// User name and password presented at logon.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Credentials {
  user: String,
  password: String,
}

impl Credentials {
  pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
    Self {
      user: user.into(),
      password: password.into(),
    }
  }

  pub fn user(&self) -> &str {
    &self.user
  }

  pub fn password(&self) -> &str {
    &self.password
  }
}

impl fmt::Debug for Credentials {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Credentials")
      .field("user", &self.user)
      .field("password", &"<redacted>")
      .finish()
  }
}

/// A decoded logon command, as a server sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogonRequest {
  pub tran_no: u32,
  pub credentials: Credentials,
  pub application: String,
}

impl LogonRequest {
  pub fn encode(&self) -> CoraResult<Msg> {
    let mut w = PayloadWriter::new(LOGON_CMD);
    w.put_u32(self.tran_no)
      .put_str(self.credentials.user())
      .put_str(self.credentials.password())
      .put_str(&self.application);
    w.finish()
  }

  pub fn decode(msg: &Msg) -> CoraResult<Self> {
    expect_type(msg, LOGON_CMD)?;
    let mut r = msg.reader();
    let tran_no = r.get_u32()?;
    let user = r.get_str()?;
    let password = r.get_str()?;
    let application = r.get_str()?;
    Ok(Self {
      tran_no,
      credentials: Credentials::new(user, password),
      application,
    })
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogonAck {
  pub tran_no: u32,
  pub resp: u32,
}

impl LogonAck {
  pub fn encode(&self) -> Msg {
    let mut w = PayloadWriter::new(LOGON_ACK);
    w.put_u32(self.tran_no).put_u32(self.resp);
    // Fixed-width fields cannot overflow.
    w.finish().unwrap_or_default()
  }

  pub fn decode(msg: &Msg) -> CoraResult<Self> {
    expect_type(msg, LOGON_ACK)?;
    let mut r = msg.reader();
    Ok(Self {
      tran_no: r.get_u32()?,
      resp: r.get_u32()?,
    })
  }

  /// Any code outside the table is a rejected logon.
  pub fn status(&self) -> AckStatus {
    match self.resp {
      LOGON_OK => AckStatus::Ok,
      LOGON_SECURITY_BLOCKED => AckStatus::Failed(ClientFailure::ServerSecurityBlocked),
      LOGON_UNSUPPORTED => AckStatus::Failed(ClientFailure::Unsupported),
      _ => AckStatus::Failed(ClientFailure::LogonFailed),
    }
  }
}

pub(crate) fn expect_type(msg: &Msg, expected: crate::message::MessageType) -> CoraResult<()> {
  if msg.msg_type() != expected {
    return Err(CoraError::ProtocolViolation(format!(
      "expected message {} but got {}",
      expected,
      msg.msg_type()
    )));
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn logon_request_carries_credentials_and_application() {
    let req = LogonRequest {
      tran_no: 1,
      credentials: Credentials::new("admin", "s3cret"),
      application: "rcora".to_string(),
    };
    let decoded = LogonRequest::decode(&req.encode().unwrap()).unwrap();
    assert_eq!(decoded, req);
    assert!(!format!("{:?}", decoded.credentials).contains("s3cret"));
  }

  #[test]
  fn unknown_logon_codes_are_rejections() {
    let ack = |resp| LogonAck { tran_no: 1, resp }.status();
    assert_eq!(ack(LOGON_OK), AckStatus::Ok);
    assert_eq!(ack(LOGON_INVALID), AckStatus::Failed(ClientFailure::LogonFailed));
    assert_eq!(
      ack(LOGON_SECURITY_BLOCKED),
      AckStatus::Failed(ClientFailure::ServerSecurityBlocked)
    );
    assert_eq!(ack(LOGON_UNSUPPORTED), AckStatus::Failed(ClientFailure::Unsupported));
    assert_eq!(ack(77), AckStatus::Failed(ClientFailure::LogonFailed));
  }
}
