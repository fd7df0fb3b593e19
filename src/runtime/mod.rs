// src/runtime/mod.rs

//! Event queue primitives: event kinds, the queue itself and the recipient trait.

pub mod event;
pub mod mailbox;

pub use event::{EventKind, IEventRecipient, PendingEvent};
pub use mailbox::{event_queue, EventPoster, EventReceiver, EventSender};
