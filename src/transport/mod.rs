// src/transport/mod.rs

//! The router seam: how sessions and transactions reach the server.
//!
//! A router multiplexes numbered sessions over one connection. It is driven
//! from network tasks, so it never calls back into session or transaction
//! code directly. Deliveries are posted through a [`RouterSink`] onto the
//! owning context's event queue.

pub mod frame;
#[cfg(feature = "inproc")]
pub mod inproc;
pub mod tcp;

use crate::error::CoraResult;
use crate::message::Msg;
use crate::runtime::{EventKind, EventPoster};
use std::fmt;

#[cfg(feature = "inproc")]
pub use inproc::{IInprocServer, InprocLink, InprocRouter};
pub use tcp::TcpRouter;

/// Router-assigned id of one logical session.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u32);

impl fmt::Debug for SessionId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "SessionId({})", self.0)
  }
}

impl fmt::Display for SessionId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Why a router gave up on a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokenReason {
  /// The connection underneath failed or hit end of stream.
  ConnectionLost,
  /// The server closed the session.
  ClosedByServer,
  /// The router itself was shut down.
  RouterShutdown,
  Other(u32),
}

impl BrokenReason {
  pub fn code(self) -> u32 {
    match self {
      BrokenReason::ConnectionLost => 1,
      BrokenReason::ClosedByServer => 2,
      BrokenReason::RouterShutdown => 3,
      BrokenReason::Other(code) => code,
    }
  }

  pub fn from_code(code: u32) -> Self {
    match code {
      1 => BrokenReason::ConnectionLost,
      2 => BrokenReason::ClosedByServer,
      3 => BrokenReason::RouterShutdown,
      other => BrokenReason::Other(other),
    }
  }
}

/// Where a router delivers traffic for one session.
///
/// The sink names a recipient on a context and a `run` tag chosen by that
/// recipient; both travel with every posted event.
#[derive(Debug, Clone)]
pub struct RouterSink {
  poster: EventPoster,
  recipient: usize,
  run: u64,
}

impl RouterSink {
  pub fn new(poster: EventPoster, recipient: usize, run: u64) -> Self {
    Self { poster, recipient, run }
  }

  pub fn recipient(&self) -> usize {
    self.recipient
  }

  pub fn on_message(&self, session: SessionId, msg: Msg) {
    self.poster.post(
      self.recipient,
      EventKind::Message {
        run: self.run,
        session,
        msg,
      },
    );
  }

  pub fn on_session_broken(&self, session: SessionId, reason: BrokenReason) {
    self.poster.post(
      self.recipient,
      EventKind::Broken {
        run: self.run,
        session,
        reason,
      },
    );
  }
}

/// The message router a session talks through.
///
/// Implementations must be callable from the dispatching thread without
/// blocking: `send_message` queues and returns.
pub trait IRouter: Send + Sync + fmt::Debug {
  /// Opens a new session whose traffic is delivered to `sink`.
  fn open_session(&self, sink: RouterSink) -> CoraResult<SessionId>;

  /// Queues one message on an open session.
  fn send_message(&self, session: SessionId, msg: Msg) -> CoraResult<()>;

  /// Closes a session. Closing an unknown session is not an error.
  fn close_session(&self, session: SessionId);
}
