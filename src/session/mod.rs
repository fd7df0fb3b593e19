// src/session/mod.rs

//! Server sessions and the device sub-sessions bound on top of them.

pub mod binder;
pub mod events;

pub use binder::DeviceHandle;
pub use events::{MonitorReceiver, MonitorSender, SessionEvent};

use crate::context::Context;
use crate::error::CoraResult;
use crate::message::Msg;
use crate::options::SessionOptions;
use crate::protocol::{AckStatus, Credentials, LogonAck, LogonRequest, LOGON_ACK};
use crate::runtime::{EventKind, IEventRecipient};
use crate::transaction::ClientFailure;
use crate::transport::{IRouter, RouterSink, SessionId};

use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

/// Where a session is in its logon lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
  /// Not logged on. The next bind starts a logon.
  Idle,
  /// A logon command is outstanding.
  LoggingOn { logon_session: SessionId, tran_no: u32 },
  /// Logged on; device sub-sessions can be opened.
  Ready { logon_session: SessionId },
  /// The router reported the logon session broken. Terminal.
  Broken,
  /// Closed by the application. Terminal.
  Closed,
}

/// What a binder learns when it asks the session for a logon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LogonProgress {
  Ready(SessionId),
  /// `LogonSucceeded` or `LogonFailed` will be posted to the waiter.
  Pending,
  Failed(ClientFailure),
}

struct SessionShared {
  state: SessionState,
  /// Recipients waiting for the outstanding logon.
  waiters: HashSet<usize>,
  /// Transactions holding a device sub-session on this session.
  attached: HashSet<usize>,
  monitor: Option<MonitorSender>,
}

pub(crate) struct SessionCore {
  handle: usize,
  ctx: Context,
  router: Arc<dyn IRouter>,
  credentials: Credentials,
  options: SessionOptions,
  tran_counter: AtomicU32,
  shared: Mutex<SessionShared>,
}

impl SessionCore {
  pub(crate) fn handle(&self) -> usize {
    self.handle
  }

  fn emit(shared: &SessionShared, event: SessionEvent) {
    if let Some(tx) = &shared.monitor {
      // Best-effort, like every monitor.
      let _ = tx.try_send(event);
    }
  }

  /// Fails waiters and notifies attached transactions. Leaves the state
  /// change to the caller.
  fn fail_everyone(&self, shared: &mut SessionShared) {
    for waiter in shared.waiters.drain() {
      self.ctx.post(
        waiter,
        EventKind::LogonFailed {
          session_key: self.handle,
          failure: ClientFailure::ConnectionFailed,
        },
      );
    }
    for tran in shared.attached.drain() {
      self.ctx.post(tran, EventKind::ParentBroken { session_key: self.handle });
    }
  }

  fn on_logon_ack(&self, shared: &mut SessionShared, logon_session: SessionId, expected: u32, msg: Msg) {
    let ack = match LogonAck::decode(&msg) {
      Ok(ack) => ack,
      Err(e) => {
        tracing::error!(session = self.handle, error = %e, "Malformed logon acknowledgement");
        self.reject_logon(shared, logon_session, ClientFailure::LogonFailed);
        return;
      }
    };
    if ack.tran_no != expected {
      tracing::warn!(
        session = self.handle,
        tran_no = ack.tran_no,
        expected = expected,
        "Logon acknowledgement for another transaction ignored"
      );
      return;
    }
    match ack.status() {
      AckStatus::Ok => {
        tracing::info!(session = self.handle, logon_session = logon_session.0, "Logon succeeded");
        shared.state = SessionState::Ready { logon_session };
        Self::emit(shared, SessionEvent::LogonSucceeded { logon_session });
        for waiter in shared.waiters.drain() {
          self.ctx.post(
            waiter,
            EventKind::LogonSucceeded {
              session_key: self.handle,
              logon_session,
            },
          );
        }
      }
      AckStatus::Failed(failure) => self.reject_logon(shared, logon_session, failure),
      AckStatus::Unrecognized(_) => self.reject_logon(shared, logon_session, ClientFailure::LogonFailed),
    }
  }

  fn reject_logon(&self, shared: &mut SessionShared, logon_session: SessionId, failure: ClientFailure) {
    tracing::info!(session = self.handle, failure = %failure, "Logon rejected");
    self.router.close_session(logon_session);
    shared.state = SessionState::Idle;
    Self::emit(shared, SessionEvent::LogonFailed { failure });
    for waiter in shared.waiters.drain() {
      self.ctx.post(
        waiter,
        EventKind::LogonFailed {
          session_key: self.handle,
          failure,
        },
      );
    }
  }
}

impl IEventRecipient for SessionCore {
  fn receive(&self, event: EventKind) {
    let mut shared = self.shared.lock();
    match event {
      EventKind::Message { session, msg, .. } => match shared.state {
        SessionState::LoggingOn { logon_session, tran_no } if logon_session == session => {
          if msg.msg_type() == LOGON_ACK {
            self.on_logon_ack(&mut shared, logon_session, tran_no, msg);
          } else {
            tracing::debug!(session = self.handle, msg_type = %msg.msg_type(), "Unexpected message during logon ignored");
          }
        }
        _ => {
          tracing::trace!(session = self.handle, router_session = session.0, msg_type = %msg.msg_type(), "Unrecognized session message ignored");
        }
      },
      EventKind::Broken { session, reason, .. } => {
        let ours = match shared.state {
          SessionState::LoggingOn { logon_session, .. } | SessionState::Ready { logon_session } => {
            logon_session == session
          }
          _ => false,
        };
        if !ours {
          return;
        }
        tracing::info!(session = self.handle, reason = ?reason, "Session broken");
        shared.state = SessionState::Broken;
        Self::emit(&shared, SessionEvent::Broken { reason });
        self.fail_everyone(&mut shared);
      }
      other => {
        tracing::trace!(session = self.handle, event = other.name(), "Event not handled by session");
      }
    }
  }
}

impl Drop for SessionCore {
  fn drop(&mut self) {
    let shared = self.shared.get_mut();
    if let SessionState::LoggingOn { logon_session, .. } | SessionState::Ready { logon_session } = shared.state {
      self.router.close_session(logon_session);
    }
    self.ctx.unregister(self.handle);
  }
}

/// A logical connection to the server: a router, credentials and the logon
/// performed with them.
///
/// Sessions are cheap handles and may be shared by any number of
/// transactions, which then share one logon and draw transaction numbers
/// from one counter. The logon happens lazily, the first time a transaction
/// bound to the session starts.
#[derive(Clone)]
pub struct Session {
  core: Arc<SessionCore>,
}

impl Session {
  pub fn new(ctx: &Context, router: Arc<dyn IRouter>, credentials: Credentials) -> Self {
    Self::with_options(ctx, router, credentials, SessionOptions::default())
  }

  pub fn with_options(
    ctx: &Context,
    router: Arc<dyn IRouter>,
    credentials: Credentials,
    options: SessionOptions,
  ) -> Self {
    let handle = ctx.next_handle();
    let core = Arc::new(SessionCore {
      handle,
      ctx: ctx.clone(),
      router,
      credentials,
      options,
      tran_counter: AtomicU32::new(1),
      shared: Mutex::new(SessionShared {
        state: SessionState::Idle,
        waiters: HashSet::new(),
        attached: HashSet::new(),
        monitor: None,
      }),
    });
    let weak: Weak<dyn IEventRecipient> = Arc::downgrade(&core) as Weak<dyn IEventRecipient>;
    ctx.register(handle, weak);
    tracing::debug!(session = handle, user = core.credentials.user(), "Session created");
    Self { core }
  }

  pub(crate) fn from_core(core: Arc<SessionCore>) -> Self {
    Self { core }
  }

  pub(crate) fn downgrade(&self) -> Weak<SessionCore> {
    Arc::downgrade(&self.core)
  }

  /// Context-unique key of this session.
  pub fn handle(&self) -> usize {
    self.core.handle
  }

  pub fn context(&self) -> &Context {
    &self.core.ctx
  }

  pub fn router(&self) -> &Arc<dyn IRouter> {
    &self.core.router
  }

  pub fn credentials(&self) -> &Credentials {
    &self.core.credentials
  }

  pub fn state(&self) -> SessionState {
    self.core.shared.lock().state
  }

  pub fn is_ready(&self) -> bool {
    matches!(self.state(), SessionState::Ready { .. })
  }

  /// The router session carrying the logon, once one is open.
  pub fn logon_session(&self) -> Option<SessionId> {
    match self.state() {
      SessionState::LoggingOn { logon_session, .. } | SessionState::Ready { logon_session } => Some(logon_session),
      _ => None,
    }
  }

  /// Allocates a transaction number. Numbers start at 1 and skip 0 when
  /// the counter wraps.
  pub fn next_tran_no(&self) -> u32 {
    loop {
      let n = self.core.tran_counter.fetch_add(1, Ordering::Relaxed);
      if n != 0 {
        return n;
      }
    }
  }

  /// Starts a monitor for this session's lifecycle events, replacing any
  /// previous monitor.
  pub fn monitor(&self) -> MonitorReceiver {
    let (tx, rx) = async_channel::bounded(self.core.options.monitor_capacity.max(1));
    self.core.shared.lock().monitor = Some(tx);
    rx
  }

  /// Closes the logon session. Waiting binders fail with a connection
  /// failure and active transactions end with a session failure.
  pub fn close(&self) {
    let mut shared = self.core.shared.lock();
    match shared.state {
      SessionState::Closed => return,
      SessionState::LoggingOn { logon_session, .. } | SessionState::Ready { logon_session } => {
        self.core.router.close_session(logon_session);
      }
      SessionState::Idle | SessionState::Broken => {}
    }
    shared.state = SessionState::Closed;
    tracing::info!(session = self.core.handle, "Session closed");
    SessionCore::emit(&shared, SessionEvent::Closed);
    self.core.fail_everyone(&mut shared);
  }

  /// Registers `waiter` for the logon, starting one if none is running.
  pub(crate) fn request_logon(&self, waiter: usize) -> LogonProgress {
    let mut shared = self.core.shared.lock();
    match shared.state {
      SessionState::Ready { logon_session } => LogonProgress::Ready(logon_session),
      SessionState::LoggingOn { .. } => {
        shared.waiters.insert(waiter);
        LogonProgress::Pending
      }
      SessionState::Broken | SessionState::Closed => LogonProgress::Failed(ClientFailure::ConnectionFailed),
      SessionState::Idle => match self.start_logon(&mut shared) {
        Ok(()) => {
          shared.waiters.insert(waiter);
          LogonProgress::Pending
        }
        Err(e) => {
          tracing::warn!(session = self.core.handle, error = %e, "Could not start logon");
          LogonProgress::Failed(ClientFailure::ConnectionFailed)
        }
      },
    }
  }

  fn start_logon(&self, shared: &mut SessionShared) -> CoraResult<()> {
    let sink = RouterSink::new(self.core.ctx.poster(), self.core.handle, 0);
    let logon_session = self.core.router.open_session(sink)?;
    let tran_no = self.next_tran_no();
    let request = LogonRequest {
      tran_no,
      credentials: self.core.credentials.clone(),
      application: self.core.options.application_name.clone(),
    };
    let sent = request.encode().and_then(|msg| self.core.router.send_message(logon_session, msg));
    if let Err(e) = sent {
      self.core.router.close_session(logon_session);
      return Err(e);
    }
    tracing::info!(
      session = self.core.handle,
      logon_session = logon_session.0,
      tran_no = tran_no,
      user = self.core.credentials.user(),
      "Logon started"
    );
    shared.state = SessionState::LoggingOn { logon_session, tran_no };
    SessionCore::emit(shared, SessionEvent::LogonStarted { logon_session });
    Ok(())
  }

  pub(crate) fn remove_waiter(&self, waiter: usize) {
    self.core.shared.lock().waiters.remove(&waiter);
  }

  /// Records a transaction opening a device sub-session, so it hears
  /// about the session breaking. Returns false if the session is no longer
  /// logged on.
  pub(crate) fn attach(&self, tran: usize) -> bool {
    let mut shared = self.core.shared.lock();
    if !matches!(shared.state, SessionState::Ready { .. }) {
      return false;
    }
    shared.attached.insert(tran);
    true
  }

  pub(crate) fn device_opened(&self, device: &DeviceHandle) {
    let shared = self.core.shared.lock();
    SessionCore::emit(
      &shared,
      SessionEvent::DeviceOpened {
        device_name: device.device_name.clone(),
        device_session: device.session_id,
        access_level: device.access_level,
      },
    );
  }

  pub(crate) fn detach(&self, tran: usize, device: Option<&DeviceHandle>) {
    let mut shared = self.core.shared.lock();
    shared.attached.remove(&tran);
    if let Some(device) = device {
      SessionCore::emit(
        &shared,
        SessionEvent::DeviceClosed {
          device_name: device.device_name.clone(),
          device_session: device.session_id,
        },
      );
    }
  }

  /// Number of transactions holding or opening a device sub-session.
  pub fn attached_count(&self) -> usize {
    self.core.shared.lock().attached.len()
  }
}

impl PartialEq for Session {
  fn eq(&self, other: &Self) -> bool {
    Arc::ptr_eq(&self.core, &other.core)
  }
}

impl Eq for Session {}

impl fmt::Debug for Session {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Session")
      .field("handle", &self.core.handle)
      .field("state", &self.state())
      .field("router", &self.core.router)
      .finish()
  }
}
