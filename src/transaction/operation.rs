// src/transaction/operation.rs

use super::machine::Transaction;
use super::outcome::IOutcome;
use crate::error::CoraResult;
use crate::message::{MessageType, PayloadReader, PayloadWriter};
use std::fmt;

/// What an operation made of one reply.
pub enum Reply<P, Oc> {
  /// Not a reply this operation understands. Logged and ignored.
  Unrecognized,
  /// Informational progress; the transaction stays active and no
  /// acknowledgement is sent.
  Progress(P),
  /// A batch that must be acknowledged before the server sends the next:
  /// the continuation command is sent after the progress callback, or when
  /// the application calls `send_ack()` if automatic acknowledgement is off.
  Batch(P),
  /// The transaction is over. `last` is delivered as progress just before
  /// the outcome.
  Complete { last: Option<P>, outcome: Oc },
}

impl<P: fmt::Debug, Oc: fmt::Debug> fmt::Debug for Reply<P, Oc> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Reply::Unrecognized => f.write_str("Unrecognized"),
      Reply::Progress(p) => f.debug_tuple("Progress").field(p).finish(),
      Reply::Batch(p) => f.debug_tuple("Batch").field(p).finish(),
      Reply::Complete { last, outcome } => f
        .debug_struct("Complete")
        .field("last", last)
        .field("outcome", outcome)
        .finish(),
    }
  }
}

/// The part of a transaction that differs between transaction types: its
/// parameters, how they are encoded, and how replies are read.
///
/// The transaction number is written before [`IOperation::encode`] runs and
/// stripped before [`IOperation::on_reply`] sees the payload.
pub trait IOperation: Send + 'static {
  type Outcome: IOutcome;
  type Progress: Clone + fmt::Debug + Send + 'static;

  /// Short name used in logs.
  const NAME: &'static str;

  /// Checks required parameters before a start.
  fn validate(&self) -> CoraResult<()> {
    Ok(())
  }

  /// Clears per-run state (counters, offsets) at the start of each run.
  fn reset(&mut self) {}

  /// Message type of the command.
  fn command(&self) -> MessageType;

  /// Writes the command's fields after the transaction number.
  fn encode(&self, w: &mut PayloadWriter) -> CoraResult<()>;

  /// Reads one reply. Errors become an unknown-failure outcome.
  fn on_reply(
    &mut self,
    msg_type: MessageType,
    r: &mut PayloadReader<'_>,
  ) -> CoraResult<Reply<Self::Progress, Self::Outcome>>;

  /// Message type of the command requesting the next batch, for streaming
  /// operations.
  fn continuation(&self) -> Option<MessageType> {
    None
  }

  /// Writes the continuation command's fields after the transaction number.
  fn encode_continuation(&self, _w: &mut PayloadWriter) -> CoraResult<()> {
    Ok(())
  }
}

/// The application's callback object for one transaction type.
///
/// Held weakly by the transaction; liveness is checked before every call.
/// All methods run inside `Context::dispatch` with no transaction lock held,
/// so they may call `start`, `finish` or `send_ack` on the transaction.
pub trait ITransactionClient<O: IOperation>: Send + Sync {
  /// The device is ready and the command has been sent.
  fn on_started(&self, _tran: &Transaction<O>) {}

  fn on_progress(&self, _tran: &Transaction<O>, _progress: &O::Progress) {}

  /// Called exactly once per run, after the transaction is back in standby.
  fn on_complete(&self, tran: &Transaction<O>, outcome: O::Outcome);
}
