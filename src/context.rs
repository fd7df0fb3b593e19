// src/context.rs

use crate::error::{CoraError, CoraResult};
use crate::options::ContextOptions;
use crate::runtime::{event_queue, EventKind, EventPoster, EventReceiver, IEventRecipient, PendingEvent};

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

/// Holds the internal state shared by multiple Context handles.
pub(crate) struct ContextInner {
  /// Next available unique handle ID for sessions and transactions.
  next_handle: AtomicUsize,
  /// Registered event recipients. Entries are weak so the registry never
  /// keeps a session or transaction alive.
  recipients: RwLock<HashMap<usize, Weak<dyn IEventRecipient>>>,
  poster: EventPoster,
  queue: EventReceiver,
  /// Held while events are being routed; makes nested dispatch a no-op.
  dispatching: Mutex<()>,
  options: ContextOptions,
}

impl ContextInner {
  fn new(options: ContextOptions) -> Self {
    let (tx, rx) = event_queue();
    Self {
      next_handle: AtomicUsize::new(1),
      recipients: RwLock::new(HashMap::new()),
      poster: EventPoster::new(tx, options.event_queue_high_water),
      queue: rx,
      dispatching: Mutex::new(()),
      options,
    }
  }

  /// Routes every event already in the queue when called. The caller holds
  /// the dispatch guard.
  fn drain_locked(&self, already_routed: usize) -> usize {
    let due = self.queue.len();
    let mut routed = already_routed;
    for _ in 0..due {
      match self.queue.try_recv() {
        Ok(ev) => {
          if self.route(ev) {
            routed += 1;
          }
        }
        Err(_) => break,
      }
    }
    routed
  }

  fn route(&self, ev: PendingEvent) -> bool {
    let PendingEvent { recipient, kind } = ev;
    let target = self.recipients.read().get(&recipient).cloned();
    match target.and_then(|weak| weak.upgrade()) {
      Some(target) => {
        tracing::trace!(recipient = recipient, event = kind.name(), "Dispatching event");
        target.receive(kind);
        true
      }
      None => {
        tracing::trace!(
          recipient = recipient,
          event = kind.name(),
          "Recipient gone, dropping event"
        );
        let mut recipients = self.recipients.write();
        if recipients.get(&recipient).map_or(false, |w| w.strong_count() == 0) {
          recipients.remove(&recipient);
        }
        false
      }
    }
  }
}

/// The owner of an event queue and the registry of everything that receives
/// events from it.
///
/// Routers and sessions post events from any thread. Nothing happens to a
/// transaction until the owning thread calls [`Context::dispatch`] (or awaits
/// [`Context::dispatch_async`]), and every callback runs inside that call.
/// Contexts are cloneable; clones share the same queue.
#[derive(Clone)] // Clone is cheap due to Arc
pub struct Context {
  inner: Arc<ContextInner>,
}

impl Context {
  pub fn new() -> Self {
    Self::with_options(ContextOptions::default())
  }

  pub fn with_options(options: ContextOptions) -> Self {
    tracing::debug!(high_water = ?options.event_queue_high_water, "Creating new rcora Context");
    Self {
      inner: Arc::new(ContextInner::new(options)),
    }
  }

  pub fn options(&self) -> &ContextOptions {
    &self.inner.options
  }

  /// Generates the next unique handle ID.
  pub(crate) fn next_handle(&self) -> usize {
    self.inner.next_handle.fetch_add(1, Ordering::Relaxed)
  }

  pub(crate) fn register(&self, handle: usize, recipient: Weak<dyn IEventRecipient>) {
    self.inner.recipients.write().insert(handle, recipient);
    tracing::debug!(handle = handle, "Event recipient registered");
  }

  pub(crate) fn unregister(&self, handle: usize) {
    if self.inner.recipients.write().remove(&handle).is_some() {
      tracing::debug!(handle = handle, "Event recipient unregistered");
    }
  }

  /// A poster feeding this context's queue.
  pub fn poster(&self) -> EventPoster {
    self.inner.poster.clone()
  }

  /// Queues an event for `recipient`. Returns `false` if the queue has
  /// been closed and the event was dropped.
  pub fn post(&self, recipient: usize, kind: EventKind) -> bool {
    self.inner.poster.post(recipient, kind)
  }

  /// Number of events waiting in the queue.
  pub fn pending(&self) -> usize {
    self.inner.queue.len()
  }

  /// Routes the events that are queued right now, in FIFO order, and
  /// returns how many reached a live recipient.
  ///
  /// Events posted while dispatching (by callbacks, for example) wait for
  /// the next call. Calling `dispatch` from inside a callback returns 0.
  pub fn dispatch(&self) -> usize {
    let Some(_guard) = self.inner.dispatching.try_lock() else {
      tracing::trace!("dispatch() called re-entrantly, ignoring");
      return 0;
    };
    self.inner.drain_locked(0)
  }

  /// Waits until at least one event is queued, then dispatches like
  /// [`Context::dispatch`].
  pub async fn dispatch_async(&self) -> CoraResult<usize> {
    let first = self.inner.queue.recv().await.map_err(|_| CoraError::ConnectionClosed)?;
    let _guard = self.inner.dispatching.lock();
    let routed = if self.inner.route(first) { 1 } else { 0 };
    Ok(self.inner.drain_locked(routed))
  }

  /// Closes the queue. Later posts are dropped and queued events are
  /// discarded by the next dispatch.
  pub fn close(&self) {
    if self.inner.queue.close() {
      tracing::info!("Context event queue closed");
    }
  }

  pub fn is_closed(&self) -> bool {
    self.inner.queue.is_closed()
  }
}

impl Default for Context {
  fn default() -> Self {
    Self::new()
  }
}

impl fmt::Debug for Context {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Context")
      .field("pending", &self.inner.queue.len())
      .field("recipients", &self.inner.recipients.read().len())
      .finish()
  }
}
