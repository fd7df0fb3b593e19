// src/ops/table_reset.rs

use super::require_name;
use crate::error::CoraResult;
use crate::message::{MessageType, PayloadReader, PayloadWriter};
use crate::protocol::{TABLE_RESET_ACK, TABLE_RESET_CMD};
use crate::transaction::{IOperation, IOutcome, Reply};

crate::cora_outcome! {
  /// Outcome of resetting a datalogger table.
  pub enum TableResetOutcome {
    Success = 1,
    CommFailed = 2,
    CommDisabled = 3,
    InvalidTableName = 4,
    LoggerSecurityBlocked = 5,
    /// The table is enabled for scheduled collection and cannot be reset.
    TableEnabledForCollection = 6,
  }
  success = Success;
}

/// Resets (clears) one table on the datalogger.
///
/// Command `{tran, table str}`, ack `{tran, resp}`.
#[derive(Debug, Clone, Default)]
pub struct TableReset {
  table_name: String,
}

impl TableReset {
  pub fn new(table_name: impl Into<String>) -> Self {
    Self {
      table_name: table_name.into(),
    }
  }

  pub fn table_name(&self) -> &str {
    &self.table_name
  }

  pub fn set_table_name(&mut self, table_name: impl Into<String>) {
    self.table_name = table_name.into();
  }
}

impl IOperation for TableReset {
  type Outcome = TableResetOutcome;
  type Progress = ();

  const NAME: &'static str = "table_reset";

  fn validate(&self) -> CoraResult<()> {
    require_name("table name", &self.table_name)
  }

  fn command(&self) -> MessageType {
    TABLE_RESET_CMD
  }

  fn encode(&self, w: &mut PayloadWriter) -> CoraResult<()> {
    w.put_str(&self.table_name);
    Ok(())
  }

  fn on_reply(&mut self, msg_type: MessageType, r: &mut PayloadReader<'_>) -> CoraResult<Reply<(), TableResetOutcome>> {
    if msg_type != TABLE_RESET_ACK {
      return Ok(Reply::Unrecognized);
    }
    let resp = r.get_u32()?;
    Ok(Reply::Complete {
      last: None,
      outcome: TableResetOutcome::from_response_code(resp),
    })
  }
}
