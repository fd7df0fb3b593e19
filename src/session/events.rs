// src/session/events.rs

use crate::transaction::ClientFailure;
use crate::transport::{BrokenReason, SessionId};

/// Lifecycle events reported by a [`Session`](super::Session) monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive] // Allow adding more events later
pub enum SessionEvent {
  /// A logon command was sent on a new router session.
  LogonStarted { logon_session: SessionId },
  /// The server accepted the logon.
  LogonSucceeded { logon_session: SessionId },
  /// The logon was rejected or the connection failed before it completed.
  LogonFailed { failure: ClientFailure },
  /// A transaction opened a device sub-session.
  DeviceOpened {
    device_name: String,
    device_session: SessionId,
    access_level: u32,
  },
  /// A device sub-session was released.
  DeviceClosed {
    device_name: String,
    device_session: SessionId,
  },
  /// The router reported the logon session broken.
  Broken { reason: BrokenReason },
  /// The application closed the session.
  Closed,
}

// Type alias for the channel sender used for monitor events
pub type MonitorSender = async_channel::Sender<SessionEvent>;
// Type alias for the channel receiver used for monitor events
pub type MonitorReceiver = async_channel::Receiver<SessionEvent>;
