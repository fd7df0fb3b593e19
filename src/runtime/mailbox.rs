// src/runtime/mailbox.rs

//! The dispatch queue, built on `async-channel` so it can be drained both
//! from synchronous `dispatch()` and from async `dispatch_async()`.

use super::event::{EventKind, PendingEvent};

/// The sending end of the event queue. Cloneable.
pub type EventSender = async_channel::Sender<PendingEvent>;

/// The receiving end of the event queue.
pub type EventReceiver = async_channel::Receiver<PendingEvent>;

/// Creates the event queue. It is unbounded: a reply or control event
/// that never arrives would leave a transaction waiting forever.
pub fn event_queue() -> (EventSender, EventReceiver) {
  async_channel::unbounded()
}

/// Posts events onto a context's queue without touching the context itself.
///
/// Routers and sessions hold one of these instead of the context so that a
/// network task can never run recipient code directly.
#[derive(Debug, Clone)]
pub struct EventPoster {
  tx: EventSender,
  high_water: Option<usize>,
}

impl EventPoster {
  pub(crate) fn new(tx: EventSender, high_water: Option<usize>) -> Self {
    Self { tx, high_water }
  }

  /// Queues `kind` for `recipient`. Never blocks. Returns `false` if the
  /// queue has been closed and the event was dropped.
  pub fn post(&self, recipient: usize, kind: EventKind) -> bool {
    let type_id = kind.type_id();
    match self.tx.try_send(PendingEvent { recipient, kind }) {
      Ok(()) => {
        tracing::trace!(recipient = recipient, event_type = type_id, "Event posted");
        if let Some(high_water) = self.high_water {
          let pending = self.tx.len();
          if pending == high_water + 1 {
            tracing::warn!(
              pending = pending,
              high_water = high_water,
              "Event queue above its high-water mark, dispatch is falling behind"
            );
          }
        }
        true
      }
      Err(err) => {
        let ev = err.into_inner();
        tracing::trace!(
          recipient = recipient,
          event = ev.kind.name(),
          "Event queue closed, dropping event"
        );
        false
      }
    }
  }

  pub fn is_closed(&self) -> bool {
    self.tx.is_closed()
  }
}
