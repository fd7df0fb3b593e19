// src/ops/mod.rs

//! Concrete transactions.
//!
//! Each operation is a small [`IOperation`](crate::transaction::IOperation):
//! its parameters, the command layout, the reply layout and an outcome enum
//! declared with [`cora_outcome!`](crate::cora_outcome).

pub mod clock_set;
pub mod file_receive;
pub mod log_monitor;
pub mod table_reset;
pub mod variable_set;

pub use clock_set::{ClockSet, ClockSetOutcome};
pub use file_receive::{FileFragment, FileReceive, FileReceiveOutcome};
pub use log_monitor::{LogBatch, LogMonitor, LogMonitorOutcome};
pub use table_reset::{TableReset, TableResetOutcome};
pub use variable_set::{VariableSet, VariableSetOutcome, VariableValue};

use crate::error::{CoraError, CoraResult};

pub(crate) fn require_name(what: &str, value: &str) -> CoraResult<()> {
  if value.is_empty() {
    return Err(CoraError::InvalidArgument(format!("{} not set", what)));
  }
  Ok(())
}
