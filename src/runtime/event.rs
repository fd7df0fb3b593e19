// src/runtime/event.rs

//! Events queued from producers (router tasks, sessions, transactions) to
//! recipients running inside `Context::dispatch`.

use crate::message::Msg;
use crate::transaction::ClientFailure;
use crate::transport::{BrokenReason, SessionId};

/// The closed set of events carried by the dispatch queue.
///
/// Every variant has a fixed numeric type id and a name, used for logging
/// and for recipients that route on the id alone.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum EventKind {
  /// A router delivered a message on one of the recipient's sessions.
  /// `run` is the tag the recipient attached when it opened the session.
  Message { run: u64, session: SessionId, msg: Msg },
  /// A router reported one of the recipient's sessions broken.
  Broken { run: u64, session: SessionId, reason: BrokenReason },
  /// A transaction asked itself to start binding for `run`.
  Kickoff { run: u64 },
  /// The shared session identified by `session_key` finished its logon.
  LogonSucceeded { session_key: usize, logon_session: SessionId },
  /// The shared session identified by `session_key` could not log on.
  LogonFailed { session_key: usize, failure: ClientFailure },
  /// The shared session a transaction is attached to broke or was closed.
  ParentBroken { session_key: usize },
}

impl EventKind {
  pub const MESSAGE: u32 = 1;
  pub const BROKEN: u32 = 2;
  pub const KICKOFF: u32 = 3;
  pub const LOGON_SUCCEEDED: u32 = 4;
  pub const LOGON_FAILED: u32 = 5;
  pub const PARENT_BROKEN: u32 = 6;

  pub fn type_id(&self) -> u32 {
    match self {
      EventKind::Message { .. } => Self::MESSAGE,
      EventKind::Broken { .. } => Self::BROKEN,
      EventKind::Kickoff { .. } => Self::KICKOFF,
      EventKind::LogonSucceeded { .. } => Self::LOGON_SUCCEEDED,
      EventKind::LogonFailed { .. } => Self::LOGON_FAILED,
      EventKind::ParentBroken { .. } => Self::PARENT_BROKEN,
    }
  }

  pub fn name(&self) -> &'static str {
    match self {
      EventKind::Message { .. } => "Message",
      EventKind::Broken { .. } => "Broken",
      EventKind::Kickoff { .. } => "Kickoff",
      EventKind::LogonSucceeded { .. } => "LogonSucceeded",
      EventKind::LogonFailed { .. } => "LogonFailed",
      EventKind::ParentBroken { .. } => "ParentBroken",
    }
  }
}

/// One queued unit of work: an event and the handle of its recipient.
#[derive(Debug, Clone)]
pub struct PendingEvent {
  pub recipient: usize,
  pub kind: EventKind,
}

/// Something `Context::dispatch` can route events to.
///
/// `receive` always runs on the dispatching thread and never concurrently
/// with another `receive` from the same context.
pub trait IEventRecipient: Send + Sync {
  fn receive(&self, event: EventKind);
}
