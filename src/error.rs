// src/error.rs

use std::io;
use thiserror::Error;

/// Errors surfaced synchronously by the client API.
///
/// Failures that happen while a transaction is in flight (logon rejected,
/// device unknown, server response codes) never appear here; they are
/// delivered as typed outcomes through the transaction callback.
#[derive(Error, Debug, Clone)]
#[non_exhaustive] // Allows adding more variants later without breaking change
pub enum CoraError {
  // --- I/O Errors ---
  #[error("I/O error: {0}")]
  Io(String),

  #[error("Invalid argument provided: {0}")]
  InvalidArgument(String),

  // --- Timeouts ---
  #[error("Operation timed out")]
  Timeout,

  // --- Connection Errors ---
  #[error("Connection refused by server: {0}")]
  ConnectionRefused(String),
  #[error("Connection closed by peer or transport")]
  ConnectionClosed,
  #[error("Router session {0} is not open")]
  SessionNotOpen(u32),

  // --- Option Errors ---
  #[error("Invalid option ID: {0}")]
  InvalidOption(i32),
  #[error("Invalid value provided for option ID {0}")]
  InvalidOptionValue(i32),

  // --- State Errors ---
  #[error("Operation is invalid for the current state: {0}")]
  InvalidState(&'static str),

  // --- Protocol Errors ---
  #[error("Cora protocol violation: {0}")]
  ProtocolViolation(String),
  #[error("Invalid message format: {0}")]
  InvalidMessage(String),

  // --- Unsupported ---
  #[error("Feature not supported: {0}")]
  UnsupportedFeature(&'static str),

  // --- Internal Errors ---
  #[error("Internal library error: {0}")]
  Internal(String),
}

pub type CoraResult<T> = Result<T, CoraError>;

impl From<io::Error> for CoraError {
  fn from(e: io::Error) -> Self {
    CoraError::from_io(e, "")
  }
}

impl CoraError {
  /// Maps common `std::io::Error` kinds onto the closest variant.
  /// `endpoint` is only used to annotate refused connections.
  pub fn from_io(e: io::Error, endpoint: &str) -> Self {
    match e.kind() {
      io::ErrorKind::ConnectionRefused => CoraError::ConnectionRefused(endpoint.to_string()),
      io::ErrorKind::TimedOut => CoraError::Timeout,
      io::ErrorKind::ConnectionReset
      | io::ErrorKind::ConnectionAborted
      | io::ErrorKind::BrokenPipe
      | io::ErrorKind::UnexpectedEof => CoraError::ConnectionClosed,
      _ => CoraError::Io(e.to_string()),
    }
  }

  /// True for errors that mean the transport underneath is gone.
  pub fn is_connection_loss(&self) -> bool {
    matches!(
      self,
      CoraError::ConnectionClosed | CoraError::ConnectionRefused(_) | CoraError::SessionNotOpen(_)
    )
  }
}
