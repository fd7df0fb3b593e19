// src/ops/variable_set.rs

use super::require_name;
use crate::error::{CoraError, CoraResult};
use crate::message::{MessageType, PayloadReader, PayloadWriter};
use crate::protocol::{VARIABLE_SET_ACK, VARIABLE_SET_CMD};
use crate::transaction::{IOperation, IOutcome, Reply};

crate::cora_outcome! {
  /// Outcome of setting a variable in a datalogger table.
  pub enum VariableSetOutcome {
    Success = 1,
    CommFailed = 2,
    CommDisabled = 3,
    InvalidColumnName = 4,
    LoggerSecurityBlocked = 5,
    InvalidDataType = 6,
    OutOfRange = 7,
    ReadOnly = 8,
  }
  success = Success;
}

/// A value to write, tagged with its wire type.
#[derive(Debug, Clone, PartialEq)]
pub enum VariableValue {
  Bool(bool),
  Int(i32),
  Float(f64),
  Text(String),
}

impl VariableValue {
  const TAG_BOOL: u8 = 1;
  const TAG_INT: u8 = 2;
  const TAG_FLOAT: u8 = 3;
  const TAG_TEXT: u8 = 4;

  fn encode(&self, w: &mut PayloadWriter) {
    match self {
      VariableValue::Bool(v) => w.put_u8(Self::TAG_BOOL).put_bool(*v),
      VariableValue::Int(v) => w.put_u8(Self::TAG_INT).put_i32(*v),
      VariableValue::Float(v) => w.put_u8(Self::TAG_FLOAT).put_f64(*v),
      VariableValue::Text(v) => w.put_u8(Self::TAG_TEXT).put_str(v),
    };
  }

  /// Reads a tagged value; the server-side counterpart of `encode`.
  pub fn decode(r: &mut PayloadReader<'_>) -> CoraResult<Self> {
    match r.get_u8()? {
      Self::TAG_BOOL => Ok(VariableValue::Bool(r.get_bool()?)),
      Self::TAG_INT => Ok(VariableValue::Int(r.get_i32()?)),
      Self::TAG_FLOAT => Ok(VariableValue::Float(r.get_f64()?)),
      Self::TAG_TEXT => Ok(VariableValue::Text(r.get_str()?)),
      tag => Err(CoraError::InvalidMessage(format!("unknown value tag {}", tag))),
    }
  }
}

impl From<bool> for VariableValue {
  fn from(v: bool) -> Self {
    VariableValue::Bool(v)
  }
}

impl From<i32> for VariableValue {
  fn from(v: i32) -> Self {
    VariableValue::Int(v)
  }
}

impl From<f64> for VariableValue {
  fn from(v: f64) -> Self {
    VariableValue::Float(v)
  }
}

impl From<&str> for VariableValue {
  fn from(v: &str) -> Self {
    VariableValue::Text(v.to_string())
  }
}

/// Writes one value into a table column (a "public" variable).
///
/// Command `{tran, table str, column str, value}`, ack `{tran, resp}`.
#[derive(Debug, Clone, Default)]
pub struct VariableSet {
  table_name: String,
  column_name: String,
  value: Option<VariableValue>,
}

impl VariableSet {
  pub fn new(table_name: impl Into<String>, column_name: impl Into<String>, value: impl Into<VariableValue>) -> Self {
    Self {
      table_name: table_name.into(),
      column_name: column_name.into(),
      value: Some(value.into()),
    }
  }

  pub fn table_name(&self) -> &str {
    &self.table_name
  }

  pub fn column_name(&self) -> &str {
    &self.column_name
  }

  pub fn value(&self) -> Option<&VariableValue> {
    self.value.as_ref()
  }

  pub fn set_table_name(&mut self, table_name: impl Into<String>) {
    self.table_name = table_name.into();
  }

  pub fn set_column_name(&mut self, column_name: impl Into<String>) {
    self.column_name = column_name.into();
  }

  pub fn set_value(&mut self, value: impl Into<VariableValue>) {
    self.value = Some(value.into());
  }
}

impl IOperation for VariableSet {
  type Outcome = VariableSetOutcome;
  type Progress = ();

  const NAME: &'static str = "variable_set";

  fn validate(&self) -> CoraResult<()> {
    require_name("table name", &self.table_name)?;
    require_name("column name", &self.column_name)?;
    if self.value.is_none() {
      return Err(CoraError::InvalidArgument("value not set".to_string()));
    }
    Ok(())
  }

  fn command(&self) -> MessageType {
    VARIABLE_SET_CMD
  }

  fn encode(&self, w: &mut PayloadWriter) -> CoraResult<()> {
    let value = self
      .value
      .as_ref()
      .ok_or_else(|| CoraError::InvalidArgument("value not set".to_string()))?;
    w.put_str(&self.table_name).put_str(&self.column_name);
    value.encode(w);
    Ok(())
  }

  fn on_reply(&mut self, msg_type: MessageType, r: &mut PayloadReader<'_>) -> CoraResult<Reply<(), VariableSetOutcome>> {
    if msg_type != VARIABLE_SET_ACK {
      return Ok(Reply::Unrecognized);
    }
    let resp = r.get_u32()?;
    Ok(Reply::Complete {
      last: None,
      outcome: VariableSetOutcome::from_response_code(resp),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn command_encodes_a_tagged_value() {
    let op = VariableSet::new("Public", "Setpoint", 21.5);
    let mut w = PayloadWriter::new(op.command());
    w.put_u32(3);
    op.encode(&mut w).unwrap();
    let msg = w.finish().unwrap();

    let mut r = msg.reader();
    assert_eq!(r.get_u32().unwrap(), 3);
    assert_eq!(r.get_str().unwrap(), "Public");
    assert_eq!(r.get_str().unwrap(), "Setpoint");
    assert_eq!(VariableValue::decode(&mut r).unwrap(), VariableValue::Float(21.5));
  }

  #[test]
  fn missing_value_fails_validation() {
    let mut op = VariableSet::default();
    op.set_table_name("Public");
    op.set_column_name("Flag");
    assert!(op.validate().is_err());
    op.set_value(true);
    assert!(op.validate().is_ok());
  }

  #[test]
  fn read_only_and_range_codes() {
    let mut op = VariableSet::new("Public", "Batt", 1);
    for (code, expected) in [
      (7, VariableSetOutcome::OutOfRange),
      (8, VariableSetOutcome::ReadOnly),
      (9, VariableSetOutcome::UnknownFailure),
    ] {
      let mut w = PayloadWriter::new(VARIABLE_SET_ACK);
      w.put_u32(code);
      let msg = w.finish().unwrap();
      match op.on_reply(msg.msg_type(), &mut msg.reader()).unwrap() {
        Reply::Complete { outcome, .. } => assert_eq!(outcome, expected),
        other => panic!("unexpected reply {:?}", other),
      }
    }
  }
}
