// src/transaction/outcome.rs

//! The outcome vocabulary.
//!
//! Failures that can happen to any transaction, whatever its type, are
//! described by [`ClientFailure`]. Each transaction type then has its own
//! outcome enum, generated with [`cora_outcome!`](crate::cora_outcome), that
//! contains its response-code table, one variant per shared failure and
//! `UnknownFailure` for every code the table does not list.

use std::fmt;

/// Failures shared by every transaction type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientFailure {
  /// The server rejected the logon credentials.
  LogonFailed,
  /// The connection or session went away before the device was ready.
  ConnectionFailed,
  /// The server does not know the device name.
  InvalidDeviceName,
  /// The server does not support the transaction.
  Unsupported,
  /// The server's security settings refused the logon or device access.
  ServerSecurityBlocked,
  /// The session or device sub-session broke while the transaction was active.
  SessionFailed,
}

impl fmt::Display for ClientFailure {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let text = match self {
      ClientFailure::LogonFailed => "logon failed",
      ClientFailure::ConnectionFailed => "connection failed",
      ClientFailure::InvalidDeviceName => "invalid device name",
      ClientFailure::Unsupported => "unsupported",
      ClientFailure::ServerSecurityBlocked => "server security blocked",
      ClientFailure::SessionFailed => "session failed",
    };
    f.write_str(text)
  }
}

/// A typed transaction outcome.
///
/// Mapping never fails: every failure and every response code produces a
/// value.
pub trait IOutcome: Clone + fmt::Debug + Send + Sync + 'static {
  fn from_failure(failure: ClientFailure) -> Self;
  /// Maps a server response code. Codes outside the table give
  /// [`IOutcome::unknown_failure`].
  fn from_response_code(code: u32) -> Self;
  fn unknown_failure() -> Self;
  fn is_success(&self) -> bool;
}

/// Declares a transaction outcome enum.
///
/// The listed variants are the transaction's response-code table. The
/// shared failures (`LogonFailed`, `ConnectionFailed`, `InvalidDeviceName`,
/// `Unsupported`, `ServerSecurityBlocked`, `SessionFailed`) and
/// `UnknownFailure` are appended, and [`IOutcome`] is implemented.
///
/// ```
/// rcora::cora_outcome! {
///   pub enum PingOutcome {
///     Success = 1,
///     Busy = 2,
///   }
///   success = Success;
/// }
///
/// use rcora::transaction::IOutcome;
/// assert_eq!(PingOutcome::from_response_code(2), PingOutcome::Busy);
/// assert_eq!(PingOutcome::from_response_code(9), PingOutcome::UnknownFailure);
/// ```
#[macro_export]
macro_rules! cora_outcome {
  (
    $(#[$meta:meta])*
    $vis:vis enum $name:ident {
      $( $(#[$vmeta:meta])* $variant:ident = $code:literal ),+ $(,)?
    }
    success = $success:ident;
  ) => {
    $(#[$meta])*
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    $vis enum $name {
      $( $(#[$vmeta])* $variant, )+
      LogonFailed,
      ConnectionFailed,
      InvalidDeviceName,
      Unsupported,
      ServerSecurityBlocked,
      SessionFailed,
      UnknownFailure,
    }

    impl $name {
      /// The server response code this outcome came from, if any.
      pub fn response_code(&self) -> Option<u32> {
        match self {
          $( $name::$variant => Some($code), )+
          _ => None,
        }
      }
    }

    impl $crate::transaction::IOutcome for $name {
      fn from_failure(failure: $crate::transaction::ClientFailure) -> Self {
        use $crate::transaction::ClientFailure;
        match failure {
          ClientFailure::LogonFailed => $name::LogonFailed,
          ClientFailure::ConnectionFailed => $name::ConnectionFailed,
          ClientFailure::InvalidDeviceName => $name::InvalidDeviceName,
          ClientFailure::Unsupported => $name::Unsupported,
          ClientFailure::ServerSecurityBlocked => $name::ServerSecurityBlocked,
          ClientFailure::SessionFailed => $name::SessionFailed,
        }
      }

      fn from_response_code(code: u32) -> Self {
        match code {
          $( $code => $name::$variant, )+
          _ => $name::UnknownFailure,
        }
      }

      fn unknown_failure() -> Self {
        $name::UnknownFailure
      }

      fn is_success(&self) -> bool {
        matches!(self, $name::$success)
      }
    }
  };
}
