//! rcora - asynchronous client components for the Cora datalogger server
//! protocol: shared sessions, device binding, generic transaction state
//! machines and single-consumer event dispatch.

pub mod context;
pub mod error;
pub mod message;
pub mod ops;
pub mod options;
pub mod protocol;
pub mod runtime;
pub mod session;
pub mod transaction;
pub mod transport;

// Re-export core types for user convenience
pub use context::Context;
pub use error::{CoraError, CoraResult};
pub use message::{MessageType, Msg, PayloadReader, PayloadWriter};
pub use options::{ContextOptions, SessionOptions, TcpRouterConfig};
pub use protocol::Credentials;
pub use runtime::{EventKind, IEventRecipient};
pub use session::{DeviceHandle, Session, SessionEvent, SessionState};
pub use transaction::{
  ClientFailure, IOperation, IOutcome, ITransactionClient, Reply, Transaction, TransactionState,
};
#[cfg(feature = "inproc")]
pub use transport::{IInprocServer, InprocLink, InprocRouter};
pub use transport::{BrokenReason, IRouter, RouterSink, SessionId, TcpRouter};

// --- Top-Level Functions ---

const VERSION_MAJOR: i32 = 0;
const VERSION_MINOR: i32 = 1;
const VERSION_PATCH: i32 = 0;

/// Returns the library version as a tuple (major, minor, patch).
pub fn version() -> (i32, i32, i32) {
  (VERSION_MAJOR, VERSION_MINOR, VERSION_PATCH)
}

/// Returns the major version number of the library.
pub fn version_major() -> i32 {
  VERSION_MAJOR
}

/// Returns the minor version number of the library.
pub fn version_minor() -> i32 {
  VERSION_MINOR
}

/// Returns the patch version number of the library.
pub fn version_patch() -> i32 {
  VERSION_PATCH
}

/// Creates a new context with default options.
pub fn context() -> Context {
  Context::new()
}
