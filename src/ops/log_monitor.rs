// src/ops/log_monitor.rs

use crate::error::{CoraError, CoraResult};
use crate::message::{MessageType, PayloadReader, PayloadWriter};
use crate::protocol::{LOG_MONITOR_CONT_CMD, LOG_MONITOR_NOT, LOG_MONITOR_START_CMD};
use crate::transaction::{IOperation, IOutcome, Reply};

/// Response code of a notification that carries a batch of records.
pub const BATCH_FOLLOWS: u32 = 1;

/// Records reserved up front for a batch, whatever count the server claims.
const MAX_PREALLOCATED_RECORDS: usize = 1024;

crate::cora_outcome! {
  /// How a log-message monitor ended.
  pub enum LogMonitorOutcome {
    StoppedByServer = 2,
    CommFailed = 3,
    LoggerSecurityBlocked = 4,
  }
  success = StoppedByServer;
}

/// One notification's worth of log records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogBatch {
  /// 1-based batch number within the run.
  pub sequence: u64,
  pub records: Vec<String>,
}

/// Streams the server's log messages for a device.
///
/// Start `{tran, max_records u32}`, then notifications `{tran, resp,
/// count u32, records [wstr]}`. Each batch is acknowledged with `{tran}`
/// before the server sends the next. The stream only ends when the server
/// stops it or the transaction is finished.
#[derive(Debug, Clone)]
pub struct LogMonitor {
  max_records: u32,
  batches: u64,
}

impl LogMonitor {
  pub fn new(max_records: u32) -> Self {
    Self { max_records, batches: 0 }
  }

  pub fn max_records(&self) -> u32 {
    self.max_records
  }

  pub fn set_max_records(&mut self, max_records: u32) {
    self.max_records = max_records;
  }

  /// Batches delivered in the current or last run.
  pub fn batches(&self) -> u64 {
    self.batches
  }
}

impl Default for LogMonitor {
  fn default() -> Self {
    Self::new(100)
  }
}

impl IOperation for LogMonitor {
  type Outcome = LogMonitorOutcome;
  type Progress = LogBatch;

  const NAME: &'static str = "log_monitor";

  fn validate(&self) -> CoraResult<()> {
    if self.max_records == 0 {
      return Err(CoraError::InvalidArgument("max_records must be positive".to_string()));
    }
    Ok(())
  }

  fn reset(&mut self) {
    self.batches = 0;
  }

  fn command(&self) -> MessageType {
    LOG_MONITOR_START_CMD
  }

  fn encode(&self, w: &mut PayloadWriter) -> CoraResult<()> {
    w.put_u32(self.max_records);
    Ok(())
  }

  fn on_reply(&mut self, msg_type: MessageType, r: &mut PayloadReader<'_>) -> CoraResult<Reply<LogBatch, LogMonitorOutcome>> {
    if msg_type != LOG_MONITOR_NOT {
      return Ok(Reply::Unrecognized);
    }
    let resp = r.get_u32()?;
    if resp != BATCH_FOLLOWS {
      return Ok(Reply::Complete {
        last: None,
        outcome: LogMonitorOutcome::from_response_code(resp),
      });
    }
    let count = r.get_u32()?;
    if count > self.max_records {
      return Err(CoraError::ProtocolViolation(format!(
        "batch of {} records exceeds the requested {}",
        count, self.max_records
      )));
    }
    let mut records = Vec::with_capacity((count as usize).min(MAX_PREALLOCATED_RECORDS));
    for _ in 0..count {
      records.push(r.get_wstr()?);
    }
    self.batches += 1;
    Ok(Reply::Batch(LogBatch {
      sequence: self.batches,
      records,
    }))
  }

  fn continuation(&self) -> Option<MessageType> {
    Some(LOG_MONITOR_CONT_CMD)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn batches_are_numbered_and_bounded() {
    let mut op = LogMonitor::new(2);
    let mut w = PayloadWriter::new(LOG_MONITOR_NOT);
    w.put_u32(BATCH_FOLLOWS).put_u32(2).put_wstr("logon admin").put_wstr("table reset");
    let msg = w.finish().unwrap();
    match op.on_reply(msg.msg_type(), &mut msg.reader()).unwrap() {
      Reply::Batch(batch) => {
        assert_eq!(batch.sequence, 1);
        assert_eq!(batch.records, vec!["logon admin", "table reset"]);
      }
      other => panic!("unexpected reply {:?}", other),
    }

    let mut w = PayloadWriter::new(LOG_MONITOR_NOT);
    w.put_u32(BATCH_FOLLOWS).put_u32(3);
    let msg = w.finish().unwrap();
    assert!(op.on_reply(msg.msg_type(), &mut msg.reader()).is_err());
  }

  #[test]
  fn claimed_count_beyond_the_payload_is_malformed() {
    let mut op = LogMonitor::new(u32::MAX);
    let mut w = PayloadWriter::new(LOG_MONITOR_NOT);
    w.put_u32(BATCH_FOLLOWS).put_u32(u32::MAX).put_wstr("only one");
    let msg = w.finish().unwrap();
    assert!(op.on_reply(msg.msg_type(), &mut msg.reader()).is_err());
  }

  #[test]
  fn stop_codes_end_the_stream() {
    let mut op = LogMonitor::default();
    let mut w = PayloadWriter::new(LOG_MONITOR_NOT);
    w.put_u32(2);
    let msg = w.finish().unwrap();
    match op.on_reply(msg.msg_type(), &mut msg.reader()).unwrap() {
      Reply::Complete { outcome, .. } => assert_eq!(outcome, LogMonitorOutcome::StoppedByServer),
      other => panic!("unexpected reply {:?}", other),
    }
  }
}
