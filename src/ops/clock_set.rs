// src/ops/clock_set.rs

use crate::error::CoraResult;
use crate::message::{MessageType, PayloadReader, PayloadWriter};
use crate::protocol::{CLOCK_SET_ACK, CLOCK_SET_CMD};
use crate::transaction::{IOperation, IOutcome, Reply};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

crate::cora_outcome! {
  /// Outcome of checking or setting a datalogger clock.
  pub enum ClockSetOutcome {
    Success = 1,
    CommFailed = 2,
    CommDisabled = 3,
    LoggerSecurityBlocked = 4,
  }
  success = Success;
}

/// Checks, and optionally sets, the datalogger clock.
///
/// Command `{tran, should_set u8, nanos i64}`, ack `{tran, resp, old_time
/// i64}`. Times are nanoseconds since the Unix epoch. The time the logger
/// reported is kept and readable after the outcome.
#[derive(Debug, Clone, Default)]
pub struct ClockSet {
  new_time: Option<i64>,
  logger_time: Option<i64>,
}

impl ClockSet {
  /// Only reads the logger clock.
  pub fn check() -> Self {
    Self::default()
  }

  /// Sets the logger clock to `time`.
  pub fn set_to(time: SystemTime) -> Self {
    let mut op = Self::default();
    op.set_time(time);
    op
  }

  pub fn set_time(&mut self, time: SystemTime) {
    self.new_time = Some(to_nanos(time));
  }

  pub fn set_time_nanos(&mut self, nanos: i64) {
    self.new_time = Some(nanos);
  }

  pub fn should_set(&self) -> bool {
    self.new_time.is_some()
  }

  /// The clock value the logger reported before any change.
  pub fn logger_time(&self) -> Option<SystemTime> {
    self.logger_time.map(from_nanos)
  }

  pub fn logger_time_nanos(&self) -> Option<i64> {
    self.logger_time
  }
}

fn to_nanos(time: SystemTime) -> i64 {
  match time.duration_since(UNIX_EPOCH) {
    Ok(after) => i64::try_from(after.as_nanos()).unwrap_or(i64::MAX),
    Err(before) => -i64::try_from(before.duration().as_nanos()).unwrap_or(i64::MAX),
  }
}

fn from_nanos(nanos: i64) -> SystemTime {
  if nanos >= 0 {
    UNIX_EPOCH + Duration::from_nanos(nanos as u64)
  } else {
    UNIX_EPOCH - Duration::from_nanos(nanos.unsigned_abs())
  }
}

impl IOperation for ClockSet {
  type Outcome = ClockSetOutcome;
  type Progress = ();

  const NAME: &'static str = "clock_set";

  fn reset(&mut self) {
    self.logger_time = None;
  }

  fn command(&self) -> MessageType {
    CLOCK_SET_CMD
  }

  fn encode(&self, w: &mut PayloadWriter) -> CoraResult<()> {
    w.put_bool(self.should_set()).put_i64(self.new_time.unwrap_or(0));
    Ok(())
  }

  fn on_reply(&mut self, msg_type: MessageType, r: &mut PayloadReader<'_>) -> CoraResult<Reply<(), ClockSetOutcome>> {
    if msg_type != CLOCK_SET_ACK {
      return Ok(Reply::Unrecognized);
    }
    let resp = r.get_u32()?;
    let outcome = ClockSetOutcome::from_response_code(resp);
    if outcome.is_success() {
      self.logger_time = Some(r.get_i64()?);
    }
    Ok(Reply::Complete { last: None, outcome })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn check_only_sends_should_set_false() {
    let op = ClockSet::check();
    let mut w = PayloadWriter::new(op.command());
    op.encode(&mut w).unwrap();
    let msg = w.finish().unwrap();
    let mut r = msg.reader();
    assert!(!r.get_bool().unwrap());
    assert_eq!(r.get_i64().unwrap(), 0);
  }

  #[test]
  fn successful_reply_records_the_logger_time() {
    let when = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
    let mut op = ClockSet::set_to(when);
    let mut w = PayloadWriter::new(CLOCK_SET_ACK);
    w.put_u32(1).put_i64(1_699_999_990_000_000_000);
    let msg = w.finish().unwrap();
    match op.on_reply(msg.msg_type(), &mut msg.reader()).unwrap() {
      Reply::Complete { outcome, .. } => assert_eq!(outcome, ClockSetOutcome::Success),
      other => panic!("unexpected reply {:?}", other),
    }
    assert_eq!(op.logger_time(), Some(UNIX_EPOCH + Duration::from_secs(1_699_999_990)));

    op.reset();
    assert_eq!(op.logger_time(), None);
  }

  #[test]
  fn failure_codes_do_not_need_a_time_field() {
    let mut op = ClockSet::check();
    let mut w = PayloadWriter::new(CLOCK_SET_ACK);
    w.put_u32(4);
    let msg = w.finish().unwrap();
    match op.on_reply(msg.msg_type(), &mut msg.reader()).unwrap() {
      Reply::Complete { outcome, .. } => assert_eq!(outcome, ClockSetOutcome::LoggerSecurityBlocked),
      other => panic!("unexpected reply {:?}", other),
    }
  }
}
