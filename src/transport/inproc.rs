// src/transport/inproc.rs

//! An in-process router backed by a server object living in the same
//! process. Used for embedding a scripted server and for tests.

use super::{BrokenReason, IRouter, RouterSink, SessionId};
use crate::error::{CoraError, CoraResult};
use crate::message::Msg;

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// The server side of an [`InprocRouter`].
///
/// Called synchronously from whichever thread uses the router. Replies go
/// through the [`InprocLink`], which only posts events, so a server may
/// reply from inside `on_message` or keep the link and reply later.
pub trait IInprocServer: Send + Sync {
  fn on_open(&self, _link: &InprocLink, _session: SessionId) {}
  fn on_message(&self, link: &InprocLink, session: SessionId, msg: Msg);
  fn on_close(&self, _link: &InprocLink, _session: SessionId) {}
}

struct InprocShared {
  sessions: RwLock<HashMap<SessionId, RouterSink>>,
  next_id: AtomicU32,
}

/// The server's handle for talking back to clients of an [`InprocRouter`].
#[derive(Clone)]
pub struct InprocLink {
  shared: Arc<InprocShared>,
}

impl InprocLink {
  /// Delivers `msg` to the client side of `session`.
  pub fn reply(&self, session: SessionId, msg: Msg) -> CoraResult<()> {
    let sink = self
      .shared
      .sessions
      .read()
      .get(&session)
      .cloned()
      .ok_or(CoraError::SessionNotOpen(session.0))?;
    tracing::trace!(session = session.0, msg_type = %msg.msg_type(), "Inproc server reply");
    sink.on_message(session, msg);
    Ok(())
  }

  /// Drops `session` and reports it broken to the client.
  pub fn break_session(&self, session: SessionId, reason: BrokenReason) {
    let removed = self.shared.sessions.write().remove(&session);
    if let Some(sink) = removed {
      tracing::debug!(session = session.0, reason = ?reason, "Inproc session broken");
      sink.on_session_broken(session, reason);
    }
  }

  /// Breaks every open session, as if the connection had dropped.
  pub fn break_all(&self, reason: BrokenReason) {
    let drained: Vec<(SessionId, RouterSink)> = self.shared.sessions.write().drain().collect();
    for (session, sink) in drained {
      sink.on_session_broken(session, reason);
    }
  }

  pub fn is_open(&self, session: SessionId) -> bool {
    self.shared.sessions.read().contains_key(&session)
  }

  pub fn open_sessions(&self) -> Vec<SessionId> {
    let mut ids: Vec<SessionId> = self.shared.sessions.read().keys().copied().collect();
    ids.sort();
    ids
  }
}

impl fmt::Debug for InprocLink {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("InprocLink")
      .field("open_sessions", &self.shared.sessions.read().len())
      .finish()
  }
}

/// Router whose "server" is an [`IInprocServer`] in this process.
pub struct InprocRouter {
  shared: Arc<InprocShared>,
  server: Arc<dyn IInprocServer>,
}

impl InprocRouter {
  pub fn new(server: Arc<dyn IInprocServer>) -> Self {
    Self {
      shared: Arc::new(InprocShared {
        sessions: RwLock::new(HashMap::new()),
        next_id: AtomicU32::new(1),
      }),
      server,
    }
  }

  pub fn link(&self) -> InprocLink {
    InprocLink {
      shared: self.shared.clone(),
    }
  }

  /// Breaks every session with [`BrokenReason::RouterShutdown`].
  pub fn shutdown(&self) {
    self.link().break_all(BrokenReason::RouterShutdown);
  }
}

impl fmt::Debug for InprocRouter {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("InprocRouter")
      .field("open_sessions", &self.shared.sessions.read().len())
      .finish()
  }
}

impl IRouter for InprocRouter {
  fn open_session(&self, sink: RouterSink) -> CoraResult<SessionId> {
    let session = SessionId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
    self.shared.sessions.write().insert(session, sink);
    tracing::debug!(session = session.0, "Inproc session opened");
    self.server.on_open(&self.link(), session);
    Ok(session)
  }

  fn send_message(&self, session: SessionId, msg: Msg) -> CoraResult<()> {
    if !self.shared.sessions.read().contains_key(&session) {
      return Err(CoraError::SessionNotOpen(session.0));
    }
    tracing::trace!(session = session.0, msg_type = %msg.msg_type(), "Inproc client send");
    self.server.on_message(&self.link(), session, msg);
    Ok(())
  }

  fn close_session(&self, session: SessionId) {
    if self.shared.sessions.write().remove(&session).is_some() {
      tracing::debug!(session = session.0, "Inproc session closed");
      self.server.on_close(&self.link(), session);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::context::Context;
  use crate::message::MessageType;
  use crate::runtime::{EventKind, IEventRecipient};
  use parking_lot::Mutex;
  use std::sync::Weak;

  struct Echo;

  impl IInprocServer for Echo {
    fn on_message(&self, link: &InprocLink, session: SessionId, msg: Msg) {
      let _ = link.reply(session, msg);
    }
  }

  #[derive(Default)]
  struct Sink {
    events: Mutex<Vec<&'static str>>,
  }

  impl IEventRecipient for Sink {
    fn receive(&self, event: EventKind) {
      self.events.lock().push(event.name());
    }
  }

  #[test]
  fn replies_and_breaks_are_posted_not_called() {
    let ctx = Context::new();
    let sink = Arc::new(Sink::default());
    let handle = ctx.next_handle();
    ctx.register(handle, Arc::downgrade(&sink) as Weak<dyn IEventRecipient>);

    let router = InprocRouter::new(Arc::new(Echo));
    let session = router.open_session(RouterSink::new(ctx.poster(), handle, 0)).unwrap();
    router
      .send_message(session, Msg::from_static(MessageType(9), b"ping"))
      .unwrap();
    router.link().break_session(session, BrokenReason::ClosedByServer);
    assert!(sink.events.lock().is_empty());

    assert_eq!(ctx.dispatch(), 2);
    assert_eq!(*sink.events.lock(), vec!["Message", "Broken"]);

    let err = router.send_message(session, Msg::default()).unwrap_err();
    assert!(matches!(err, CoraError::SessionNotOpen(id) if id == session.0));
  }
}
