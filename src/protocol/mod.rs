// src/protocol/mod.rs

//! Wire vocabulary shared by sessions and transactions: message type codes,
//! the logon and open-device exchanges, and the reply header.

pub mod device;
pub mod logon;
pub mod types;

pub use device::{DeviceAck, OpenDeviceRequest};
pub use logon::{Credentials, LogonAck, LogonRequest};
pub use types::*;

use crate::message::Msg;
use crate::transaction::ClientFailure;

/// Every command and reply payload starts with the transaction number.
pub fn peek_tran_no(msg: &Msg) -> Option<u32> {
  msg.reader().get_u32().ok()
}

/// How the server answered a logon or open-device command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckStatus {
  Ok,
  Failed(ClientFailure),
  /// A response code outside the known table.
  Unrecognized(u32),
}
