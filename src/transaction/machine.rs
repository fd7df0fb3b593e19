// src/transaction/machine.rs

//! The generic transaction state machine.
//!
//! One [`Transaction`] drives one [`IOperation`] through bind, command,
//! replies and outcome. Nothing happens outside `Context::dispatch`:
//! `start()` only posts a kickoff event to the transaction itself, and
//! every reply, break or logon result arrives as a queued event.

use super::operation::{IOperation, ITransactionClient, Reply};
use super::outcome::{ClientFailure, IOutcome};
use super::state::TransactionState;
use crate::context::Context;
use crate::error::{CoraError, CoraResult};
use crate::message::{Msg, PayloadWriter};
use crate::options::SessionOptions;
use crate::protocol::{peek_tran_no, Credentials};
use crate::runtime::{EventKind, IEventRecipient};
use crate::session::binder::{BindSignal, SessionBinder};
use crate::session::{DeviceHandle, Session, SessionCore};
use crate::transport::{IRouter, SessionId};

use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};

/// Where the session comes from.
enum Target {
  None,
  /// A shared session, held weakly while in standby.
  Shared(Weak<SessionCore>),
  /// A private connection, opened at start and closed when the run ends.
  Private {
    router: Arc<dyn IRouter>,
    credentials: Credentials,
    options: SessionOptions,
  },
}

struct TransactionInner<O: IOperation> {
  state: TransactionState,
  /// Bumped by `start()` and `finish()`; events tagged with an older run
  /// are stale.
  run: u64,
  op: O,
  device_name: Option<String>,
  target: Target,
  auto_ack: bool,
  client: Option<Weak<dyn ITransactionClient<O>>>,
  binder: Option<SessionBinder>,
  tran_no: Option<u32>,
  buffered: Option<O::Progress>,
}

/// Callback work collected under the lock and run after it is released.
enum Effect<O: IOperation> {
  Started,
  Progress(O::Progress),
  AutoAck { run: u64 },
  Complete { run: u64, outcome: O::Outcome },
}

pub(crate) struct TransactionCore<O: IOperation> {
  handle: usize,
  ctx: Context,
  this: Weak<TransactionCore<O>>,
  inner: Mutex<TransactionInner<O>>,
}

impl<O: IOperation> TransactionCore<O> {
  fn handle_event(&self, inner: &mut TransactionInner<O>, event: EventKind, effects: &mut Vec<Effect<O>>) {
    match event {
      EventKind::Kickoff { run } => {
        if run == inner.run && inner.state == TransactionState::Delegate && inner.binder.is_none() {
          self.begin_bind(inner, effects);
        }
      }
      EventKind::LogonSucceeded {
        session_key,
        logon_session,
      } => {
        if inner.state != TransactionState::Delegate {
          return;
        }
        let signal = inner
          .binder
          .as_mut()
          .and_then(|b| b.on_logon_succeeded(session_key, logon_session));
        if let Some(signal) = signal {
          self.on_bind_signal(inner, signal, effects);
        }
      }
      EventKind::LogonFailed { session_key, failure } => {
        if inner.state != TransactionState::Delegate {
          return;
        }
        let signal = inner.binder.as_mut().and_then(|b| b.on_logon_failed(session_key, failure));
        if let Some(signal) = signal {
          self.on_bind_signal(inner, signal, effects);
        }
      }
      EventKind::ParentBroken { session_key } => {
        if inner.binder.as_ref().map_or(false, |b| b.is_parent(session_key)) {
          tracing::debug!(tran = self.handle, op = O::NAME, "Parent session broken");
          self.fail_on_break(inner, effects);
        }
      }
      EventKind::Message { run, session, msg } => {
        if run != inner.run {
          tracing::trace!(tran = self.handle, run = run, "Message from an earlier run ignored");
          return;
        }
        match inner.state {
          TransactionState::Delegate => {
            let signal = inner.binder.as_mut().and_then(|b| b.on_device_message(session, &msg));
            if let Some(signal) = signal {
              self.on_bind_signal(inner, signal, effects);
            }
          }
          TransactionState::Active | TransactionState::AwaitingAck => {
            if self.owns(inner, session) {
              self.on_reply(inner, msg, effects);
            }
          }
          TransactionState::Standby => {}
        }
      }
      EventKind::Broken { run, session, reason } => {
        if run == inner.run && self.owns(inner, session) {
          tracing::debug!(tran = self.handle, op = O::NAME, reason = ?reason, "Device session broken");
          self.fail_on_break(inner, effects);
        }
      }
      other => {
        tracing::trace!(tran = self.handle, event = other.name(), "Event not handled by transaction");
      }
    }
  }

  fn owns(&self, inner: &TransactionInner<O>, session: SessionId) -> bool {
    inner.binder.as_ref().map_or(false, |b| b.owns_router_session(session))
  }

  /// A break before the device is ready is a connection failure; after,
  /// a session failure.
  fn fail_on_break(&self, inner: &mut TransactionInner<O>, effects: &mut Vec<Effect<O>>) {
    let failure = match inner.state {
      TransactionState::Delegate => ClientFailure::ConnectionFailed,
      TransactionState::Active | TransactionState::AwaitingAck => ClientFailure::SessionFailed,
      TransactionState::Standby => return,
    };
    self.complete(inner, O::Outcome::from_failure(failure), effects);
  }

  fn begin_bind(&self, inner: &mut TransactionInner<O>, effects: &mut Vec<Effect<O>>) {
    let (session, owned) = match &inner.target {
      Target::Shared(weak) => match weak.upgrade() {
        Some(core) => (Session::from_core(core), false),
        None => {
          tracing::warn!(tran = self.handle, op = O::NAME, "Shared session dropped before bind");
          self.complete(inner, O::Outcome::from_failure(ClientFailure::ConnectionFailed), effects);
          return;
        }
      },
      Target::Private {
        router,
        credentials,
        options,
      } => (
        Session::with_options(&self.ctx, router.clone(), credentials.clone(), options.clone()),
        true,
      ),
      Target::None => {
        self.complete(inner, O::Outcome::from_failure(ClientFailure::ConnectionFailed), effects);
        return;
      }
    };
    let device_name = inner.device_name.clone().unwrap_or_default();
    tracing::debug!(tran = self.handle, op = O::NAME, device = %device_name, session = session.handle(), "Binding");
    let mut binder = SessionBinder::new(self.handle, inner.run, session, owned, device_name);
    let signal = binder.begin();
    inner.binder = Some(binder);
    self.on_bind_signal(inner, signal, effects);
  }

  fn on_bind_signal(&self, inner: &mut TransactionInner<O>, signal: BindSignal, effects: &mut Vec<Effect<O>>) {
    match signal {
      BindSignal::Pending => {}
      BindSignal::Ready => self.activate(inner, effects),
      BindSignal::Failed(failure) => {
        tracing::debug!(tran = self.handle, op = O::NAME, failure = %failure, "Bind failed");
        self.complete(inner, O::Outcome::from_failure(failure), effects);
      }
      BindSignal::Unknown(code) => {
        tracing::debug!(tran = self.handle, op = O::NAME, resp = code, "Bind ended with unknown response");
        self.complete(inner, O::Outcome::unknown_failure(), effects);
      }
    }
  }

  /// Device ready: allocate a transaction number and send the command once.
  fn activate(&self, inner: &mut TransactionInner<O>, effects: &mut Vec<Effect<O>>) {
    let Some(binder) = inner.binder.as_ref() else {
      return;
    };
    let tran_no = binder.session().next_tran_no();
    inner.tran_no = Some(tran_no);
    inner.state = TransactionState::Active;

    let mut w = PayloadWriter::new(inner.op.command());
    w.put_u32(tran_no);
    let msg = match inner.op.encode(&mut w).and_then(|_| w.finish()) {
      Ok(msg) => msg,
      Err(e) => {
        tracing::error!(tran = self.handle, op = O::NAME, error = %e, "Failed to encode command");
        self.complete(inner, O::Outcome::unknown_failure(), effects);
        return;
      }
    };
    if let Err(e) = binder.send(msg) {
      tracing::warn!(tran = self.handle, op = O::NAME, error = %e, "Failed to send command");
      self.complete(inner, Self::send_failure(&e), effects);
      return;
    }
    tracing::debug!(tran = self.handle, op = O::NAME, tran_no = tran_no, "Command sent, transaction active");
    effects.push(Effect::Started);
  }

  fn on_reply(&self, inner: &mut TransactionInner<O>, msg: Msg, effects: &mut Vec<Effect<O>>) {
    let received = peek_tran_no(&msg);
    if received.is_none() || received != inner.tran_no {
      tracing::warn!(
        tran = self.handle,
        op = O::NAME,
        tran_no = ?received,
        expected = ?inner.tran_no,
        "Reply with another transaction number ignored"
      );
      return;
    }
    // Nothing is due until the held batch is acknowledged.
    if inner.state == TransactionState::AwaitingAck {
      tracing::warn!(
        tran = self.handle,
        op = O::NAME,
        msg_type = %msg.msg_type(),
        "Reply received before the held batch was acknowledged, ignored"
      );
      return;
    }
    let mut reader = msg.reader();
    // Already checked by peek_tran_no.
    let _ = reader.get_u32();

    match inner.op.on_reply(msg.msg_type(), &mut reader) {
      Err(e) => {
        tracing::error!(tran = self.handle, op = O::NAME, error = %e, "Malformed reply");
        self.complete(inner, O::Outcome::unknown_failure(), effects);
      }
      Ok(Reply::Unrecognized) => {
        tracing::debug!(tran = self.handle, op = O::NAME, msg_type = %msg.msg_type(), "Unrecognized message ignored");
      }
      Ok(Reply::Progress(progress)) => effects.push(Effect::Progress(progress)),
      Ok(Reply::Batch(batch)) => {
        if inner.auto_ack {
          effects.push(Effect::Progress(batch));
          effects.push(Effect::AutoAck { run: inner.run });
        } else {
          tracing::trace!(tran = self.handle, op = O::NAME, "Batch buffered until acknowledged");
          inner.state = TransactionState::AwaitingAck;
          inner.buffered = Some(batch.clone());
          effects.push(Effect::Progress(batch));
        }
      }
      Ok(Reply::Complete { last, outcome }) => {
        if let Some(last) = last {
          effects.push(Effect::Progress(last));
        }
        self.complete(inner, outcome, effects);
      }
    }
  }

  /// Requests the next batch of a streaming operation.
  fn send_continuation(&self, inner: &mut TransactionInner<O>, effects: &mut Vec<Effect<O>>) {
    let Some(msg_type) = inner.op.continuation() else {
      return;
    };
    let mut w = PayloadWriter::new(msg_type);
    w.put_u32(inner.tran_no.unwrap_or_default());
    let msg = match inner.op.encode_continuation(&mut w).and_then(|_| w.finish()) {
      Ok(msg) => msg,
      Err(e) => {
        tracing::error!(tran = self.handle, op = O::NAME, error = %e, "Failed to encode continuation");
        self.complete(inner, O::Outcome::unknown_failure(), effects);
        return;
      }
    };
    let sent = match inner.binder.as_ref() {
      Some(binder) => binder.send(msg),
      None => Err(CoraError::InvalidState("device sub-session not open")),
    };
    if let Err(e) = sent {
      tracing::warn!(tran = self.handle, op = O::NAME, error = %e, "Failed to send continuation");
      self.complete(inner, Self::send_failure(&e), effects);
    }
  }

  /// A send that failed because the transport is gone is a session failure.
  fn send_failure(e: &CoraError) -> O::Outcome {
    if e.is_connection_loss() {
      O::Outcome::from_failure(ClientFailure::SessionFailed)
    } else {
      O::Outcome::unknown_failure()
    }
  }

  fn complete(&self, inner: &mut TransactionInner<O>, outcome: O::Outcome, effects: &mut Vec<Effect<O>>) {
    tracing::debug!(tran = self.handle, op = O::NAME, outcome = ?outcome, "Transaction complete");
    Self::release(inner);
    effects.push(Effect::Complete { run: inner.run, outcome });
  }

  /// Drops the device sub-session, any buffered batch and every strong
  /// session reference, and returns to standby.
  fn release(inner: &mut TransactionInner<O>) {
    if let Some(mut binder) = inner.binder.take() {
      binder.release();
    }
    inner.buffered = None;
    inner.state = TransactionState::Standby;
  }

  fn run_effects(&self, client: Weak<dyn ITransactionClient<O>>, effects: Vec<Effect<O>>) {
    if effects.is_empty() {
      return;
    }
    let Some(core) = self.this.upgrade() else {
      return;
    };
    let tran = Transaction { core };
    for effect in effects {
      if let Effect::AutoAck { run } = effect {
        self.auto_ack(run);
        continue;
      }
      let Some(target) = client.upgrade() else {
        tracing::warn!(tran = self.handle, op = O::NAME, "Callback object gone, finishing silently");
        tran.finish();
        return;
      };
      match effect {
        Effect::Started => target.on_started(&tran),
        Effect::Progress(progress) => target.on_progress(&tran, &progress),
        Effect::Complete { run, outcome } => {
          // finish() or start() from an earlier callback supersedes the outcome.
          let current_run = self.inner.lock().run;
          if current_run == run {
            target.on_complete(&tran, outcome);
          }
        }
        Effect::AutoAck { .. } => {}
      }
    }
  }

  fn auto_ack(&self, run: u64) {
    let (client, effects) = {
      let mut guard = self.inner.lock();
      let inner = &mut *guard;
      if inner.run != run || inner.state != TransactionState::Active {
        return;
      }
      let Some(client) = inner.client.clone() else {
        return;
      };
      let mut effects = Vec::new();
      self.send_continuation(inner, &mut effects);
      (client, effects)
    };
    self.run_effects(client, effects);
  }
}

impl<O: IOperation> IEventRecipient for TransactionCore<O> {
  fn receive(&self, event: EventKind) {
    let (client, effects) = {
      let mut guard = self.inner.lock();
      let inner = &mut *guard;
      if inner.state.is_standby() {
        tracing::trace!(tran = self.handle, event = event.name(), "Event in standby ignored");
        return;
      }
      let Some(client) = inner.client.clone() else {
        return;
      };
      if client.strong_count() == 0 {
        tracing::warn!(tran = self.handle, op = O::NAME, "Callback object gone, finishing silently");
        Self::release(inner);
        inner.run += 1;
        return;
      }
      let mut effects = Vec::new();
      self.handle_event(inner, event, &mut effects);
      (client, effects)
    };
    self.run_effects(client, effects);
  }
}

impl<O: IOperation> Drop for TransactionCore<O> {
  fn drop(&mut self) {
    if let Some(mut binder) = self.inner.get_mut().binder.take() {
      binder.release();
    }
    self.ctx.unregister(self.handle);
  }
}

/// A client-side transaction: one command to one device and the replies
/// that answer it.
///
/// Configure the device name and a session (or a private connection), set
/// operation parameters with [`Transaction::configure`], then
/// [`Transaction::start`] with a callback object. The outcome is reported
/// exactly once through [`ITransactionClient::on_complete`], after which the
/// transaction is back in standby and can be started again.
///
/// Handles are cheap clones of one shared state machine.
pub struct Transaction<O: IOperation> {
  core: Arc<TransactionCore<O>>,
}

impl<O: IOperation> Clone for Transaction<O> {
  fn clone(&self) -> Self {
    Self {
      core: self.core.clone(),
    }
  }
}

impl<O: IOperation> Transaction<O> {
  pub fn new(ctx: &Context, op: O) -> Self {
    let handle = ctx.next_handle();
    let core = Arc::new_cyclic(|this| TransactionCore {
      handle,
      ctx: ctx.clone(),
      this: this.clone(),
      inner: Mutex::new(TransactionInner {
        state: TransactionState::Standby,
        run: 0,
        op,
        device_name: None,
        target: Target::None,
        auto_ack: true,
        client: None,
        binder: None,
        tran_no: None,
        buffered: None,
      }),
    });
    let weak: Weak<dyn IEventRecipient> = Arc::downgrade(&core) as Weak<dyn IEventRecipient>;
    ctx.register(handle, weak);
    tracing::debug!(tran = handle, op = O::NAME, "Transaction created");
    Self { core }
  }

  /// Context-unique handle of this transaction.
  pub fn handle(&self) -> usize {
    self.core.handle
  }

  pub fn state(&self) -> TransactionState {
    self.core.inner.lock().state
  }

  /// Transaction number of the current or most recent run, once the command
  /// has been sent.
  pub fn tran_no(&self) -> Option<u32> {
    self.core.inner.lock().tran_no
  }

  fn with_standby<R>(&self, f: impl FnOnce(&mut TransactionInner<O>) -> R) -> CoraResult<R> {
    let mut inner = self.core.inner.lock();
    if !inner.state.is_standby() {
      return Err(CoraError::InvalidState("parameters can only change in standby"));
    }
    Ok(f(&mut inner))
  }

  pub fn set_device_name(&self, name: impl Into<String>) -> CoraResult<()> {
    let name = name.into();
    self.with_standby(|inner| inner.device_name = Some(name))
  }

  pub fn device_name(&self) -> Option<String> {
    self.core.inner.lock().device_name.clone()
  }

  /// Uses a shared session. Only a weak reference is kept.
  pub fn set_session(&self, session: &Session) -> CoraResult<()> {
    let weak = session.downgrade();
    self.with_standby(|inner| inner.target = Target::Shared(weak))
  }

  /// Uses a private connection through `router`: a session is opened and
  /// logged on at each start and closed when the run ends.
  pub fn set_connection(&self, router: Arc<dyn IRouter>, credentials: Credentials) -> CoraResult<()> {
    self.set_connection_with_options(router, credentials, SessionOptions::default())
  }

  pub fn set_connection_with_options(
    &self,
    router: Arc<dyn IRouter>,
    credentials: Credentials,
    options: SessionOptions,
  ) -> CoraResult<()> {
    self.with_standby(|inner| {
      inner.target = Target::Private {
        router,
        credentials,
        options,
      }
    })
  }

  /// Reuses the session `other` is connected through, without another
  /// logon.
  pub fn share_session_of<P: IOperation>(&self, other: &Transaction<P>) -> CoraResult<()> {
    let session = other
      .session()
      .ok_or_else(|| CoraError::InvalidArgument(format!("transaction {} has no session to share", other.handle())))?;
    self.set_session(&session)
  }

  /// The session this transaction is bound through (while running) or
  /// configured with.
  pub fn session(&self) -> Option<Session> {
    let inner = self.core.inner.lock();
    if let Some(binder) = &inner.binder {
      return Some(binder.session().clone());
    }
    match &inner.target {
      Target::Shared(weak) => weak.upgrade().map(Session::from_core),
      _ => None,
    }
  }

  /// The device sub-session, while bound.
  pub fn device(&self) -> Option<DeviceHandle> {
    let inner = self.core.inner.lock();
    inner.binder.as_ref().and_then(|b| b.device().cloned())
  }

  /// With automatic acknowledgement off, each batch of a streaming
  /// operation is held until [`Transaction::send_ack`].
  pub fn set_auto_ack(&self, auto_ack: bool) -> CoraResult<()> {
    self.with_standby(|inner| inner.auto_ack = auto_ack)
  }

  pub fn auto_ack(&self) -> bool {
    self.core.inner.lock().auto_ack
  }

  /// Changes operation parameters. Only allowed in standby.
  pub fn configure<R>(&self, f: impl FnOnce(&mut O) -> R) -> CoraResult<R> {
    self.with_standby(|inner| f(&mut inner.op))
  }

  /// Reads the operation (parameters and anything it recorded from replies).
  pub fn inspect<R>(&self, f: impl FnOnce(&O) -> R) -> R {
    f(&self.core.inner.lock().op)
  }

  pub fn has_buffered_batch(&self) -> bool {
    self.core.inner.lock().buffered.is_some()
  }

  /// The batch waiting for acknowledgement, if any.
  pub fn buffered_batch(&self) -> Option<O::Progress> {
    self.core.inner.lock().buffered.clone()
  }

  /// Starts a run. The callback object is held weakly and must be alive.
  ///
  /// Fails with `InvalidState` unless in standby and with
  /// `InvalidArgument` if the callback, device name or session is missing.
  pub fn start<C>(&self, client: &Weak<C>) -> CoraResult<()>
  where
    C: ITransactionClient<O> + 'static,
  {
    let client: Weak<dyn ITransactionClient<O>> = client.clone();
    let mut guard = self.core.inner.lock();
    let inner = &mut *guard;
    if !inner.state.is_standby() {
      return Err(CoraError::InvalidState("transaction already started"));
    }
    if client.strong_count() == 0 {
      return Err(CoraError::InvalidArgument("callback object is not alive".to_string()));
    }
    match inner.device_name.as_deref() {
      Some(name) if !name.is_empty() => {}
      _ => return Err(CoraError::InvalidArgument("device name not set".to_string())),
    }
    match &inner.target {
      Target::None => return Err(CoraError::InvalidArgument("no session or connection set".to_string())),
      Target::Shared(weak) if weak.strong_count() == 0 => {
        return Err(CoraError::InvalidArgument("session no longer exists".to_string()))
      }
      _ => {}
    }
    inner.op.validate()?;
    if self.core.ctx.is_closed() {
      return Err(CoraError::InvalidState("context closed"));
    }

    inner.op.reset();
    inner.run += 1;
    inner.state = TransactionState::Delegate;
    inner.tran_no = None;
    inner.buffered = None;
    inner.client = Some(client);
    tracing::debug!(tran = self.core.handle, op = O::NAME, run = inner.run, "Transaction started");
    if !self.core.ctx.post(self.core.handle, EventKind::Kickoff { run: inner.run }) {
      TransactionCore::release(inner);
      inner.client = None;
      inner.run += 1;
      return Err(CoraError::InvalidState("context closed"));
    }
    Ok(())
  }

  /// Acknowledges the buffered batch and requests the next one.
  pub fn send_ack(&self) -> CoraResult<()> {
    let (client, effects) = {
      let mut guard = self.core.inner.lock();
      let inner = &mut *guard;
      if inner.state != TransactionState::AwaitingAck {
        return Err(CoraError::InvalidState("no batch awaiting acknowledgement"));
      }
      inner.buffered = None;
      inner.state = TransactionState::Active;
      let mut effects = Vec::new();
      self.core.send_continuation(inner, &mut effects);
      (inner.client.clone(), effects)
    };
    if let Some(client) = client {
      self.core.run_effects(client, effects);
    }
    Ok(())
  }

  /// Abandons the current run: releases the device sub-session and any
  /// buffered batch and returns to standby. Never calls the outcome
  /// callback. Idempotent.
  pub fn finish(&self) {
    let mut guard = self.core.inner.lock();
    let inner = &mut *guard;
    if !inner.state.is_standby() {
      tracing::debug!(tran = self.core.handle, op = O::NAME, state = %inner.state, "Transaction finished");
    }
    TransactionCore::release(inner);
    inner.run += 1;
  }
}

impl<O: IOperation> fmt::Debug for Transaction<O> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let inner = self.core.inner.lock();
    f.debug_struct("Transaction")
      .field("op", &O::NAME)
      .field("handle", &self.core.handle)
      .field("state", &inner.state)
      .field("tran_no", &inner.tran_no)
      .field("device_name", &inner.device_name)
      .finish()
  }
}
