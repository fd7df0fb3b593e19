// src/transaction/state.rs

use std::fmt;

/// Where a transaction is in its lifecycle.
///
/// `Standby -> Delegate -> Active [-> AwaitingAck -> Active ...] -> Standby`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionState {
  /// Idle. Parameters may be changed and `start()` is allowed.
  Standby,
  /// Binding: waiting for the session logon and the device sub-session.
  Delegate,
  /// The command has been sent; waiting for replies.
  Active,
  /// A batch was delivered with automatic acknowledgement off; the next one
  /// is not requested until `send_ack()`.
  AwaitingAck,
}

impl TransactionState {
  pub fn is_standby(self) -> bool {
    self == TransactionState::Standby
  }

  pub fn name(self) -> &'static str {
    match self {
      TransactionState::Standby => "standby",
      TransactionState::Delegate => "delegate",
      TransactionState::Active => "active",
      TransactionState::AwaitingAck => "awaiting_ack",
    }
  }
}

impl fmt::Display for TransactionState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}
