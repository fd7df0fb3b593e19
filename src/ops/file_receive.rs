// src/ops/file_receive.rs

use super::require_name;
use crate::error::{CoraError, CoraResult};
use crate::message::{MessageType, PayloadReader, PayloadWriter};
use crate::protocol::{FILE_RECEIVE_ACK, FILE_RECEIVE_CMD, FILE_RECEIVE_CONT_CMD};
use crate::transaction::{IOperation, IOutcome, Reply};
use bytes::Bytes;

crate::cora_outcome! {
  /// Outcome of receiving a file from a datalogger.
  pub enum FileReceiveOutcome {
    Success = 1,
    CommFailed = 2,
    CommDisabled = 3,
    InvalidFileName = 4,
    LoggerSecurityBlocked = 5,
    FileBusy = 6,
  }
  success = Success;
}

/// Default number of bytes requested per fragment.
pub const DEFAULT_SWATH: u32 = 8192;

/// One received piece of the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFragment {
  /// Offset of `data` within the file.
  pub offset: u64,
  pub data: Bytes,
  /// Bytes received so far, including this fragment.
  pub bytes_received: u64,
}

/// Receives a file from the datalogger's file system in fragments.
///
/// Command `{tran, file_name str, swath u32}`; each reply `{tran, resp,
/// more u8, fragment bytes}`. While `more` is set the next fragment is
/// requested with `{tran, offset u64, swath u32}`.
#[derive(Debug, Clone)]
pub struct FileReceive {
  file_name: String,
  swath: u32,
  bytes_received: u64,
}

impl FileReceive {
  pub fn new(file_name: impl Into<String>) -> Self {
    Self {
      file_name: file_name.into(),
      swath: DEFAULT_SWATH,
      bytes_received: 0,
    }
  }

  pub fn file_name(&self) -> &str {
    &self.file_name
  }

  pub fn set_file_name(&mut self, file_name: impl Into<String>) {
    self.file_name = file_name.into();
  }

  pub fn swath(&self) -> u32 {
    self.swath
  }

  pub fn set_swath(&mut self, swath: u32) {
    self.swath = swath;
  }

  /// Total bytes received in the current or last run.
  pub fn bytes_received(&self) -> u64 {
    self.bytes_received
  }
}

impl Default for FileReceive {
  fn default() -> Self {
    Self::new(String::new())
  }
}

impl IOperation for FileReceive {
  type Outcome = FileReceiveOutcome;
  type Progress = FileFragment;

  const NAME: &'static str = "file_receive";

  fn validate(&self) -> CoraResult<()> {
    require_name("file name", &self.file_name)?;
    if self.swath == 0 {
      return Err(CoraError::InvalidArgument("swath must be positive".to_string()));
    }
    Ok(())
  }

  fn reset(&mut self) {
    self.bytes_received = 0;
  }

  fn command(&self) -> MessageType {
    FILE_RECEIVE_CMD
  }

  fn encode(&self, w: &mut PayloadWriter) -> CoraResult<()> {
    w.put_str(&self.file_name).put_u32(self.swath);
    Ok(())
  }

  fn on_reply(
    &mut self,
    msg_type: MessageType,
    r: &mut PayloadReader<'_>,
  ) -> CoraResult<Reply<FileFragment, FileReceiveOutcome>> {
    if msg_type != FILE_RECEIVE_ACK {
      return Ok(Reply::Unrecognized);
    }
    let resp = r.get_u32()?;
    let outcome = FileReceiveOutcome::from_response_code(resp);
    if !outcome.is_success() {
      return Ok(Reply::Complete { last: None, outcome });
    }
    let more = r.get_bool()?;
    let data = r.get_bytes()?;
    let offset = self.bytes_received;
    self.bytes_received += data.len() as u64;
    let fragment = FileFragment {
      offset,
      data,
      bytes_received: self.bytes_received,
    };
    if more {
      Ok(Reply::Batch(fragment))
    } else {
      // An empty closing fragment only marks the end of the file.
      let last = if fragment.data.is_empty() { None } else { Some(fragment) };
      Ok(Reply::Complete { last, outcome })
    }
  }

  fn continuation(&self) -> Option<MessageType> {
    Some(FILE_RECEIVE_CONT_CMD)
  }

  fn encode_continuation(&self, w: &mut PayloadWriter) -> CoraResult<()> {
    w.put_u64(self.bytes_received).put_u32(self.swath);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn ack(resp: u32, more: bool, data: &[u8]) -> crate::message::Msg {
    let mut w = PayloadWriter::new(FILE_RECEIVE_ACK);
    w.put_u32(resp).put_bool(more).put_bytes(data);
    w.finish().unwrap()
  }

  #[test]
  fn fragments_accumulate_and_continuation_carries_the_offset() {
    let mut op = FileReceive::new("CPU:program.cr1");
    let first = ack(1, true, &[0u8; 10]);
    match op.on_reply(first.msg_type(), &mut first.reader()).unwrap() {
      Reply::Batch(f) => {
        assert_eq!(f.offset, 0);
        assert_eq!(f.bytes_received, 10);
      }
      other => panic!("unexpected reply {:?}", other),
    }

    let mut w = PayloadWriter::new(op.continuation().unwrap());
    op.encode_continuation(&mut w).unwrap();
    let cont = w.finish().unwrap();
    let mut r = cont.reader();
    assert_eq!(r.get_u64().unwrap(), 10);
    assert_eq!(r.get_u32().unwrap(), DEFAULT_SWATH);

    let last = ack(1, false, b"tail");
    match op.on_reply(last.msg_type(), &mut last.reader()).unwrap() {
      Reply::Complete {
        last: Some(f),
        outcome: FileReceiveOutcome::Success,
      } => assert_eq!(f.bytes_received, 14),
      other => panic!("unexpected reply {:?}", other),
    }
  }

  #[test]
  fn empty_final_fragment_is_not_progress() {
    let mut op = FileReceive::new("CPU:data.dat");
    let last = ack(1, false, &[]);
    assert!(matches!(
      op.on_reply(last.msg_type(), &mut last.reader()).unwrap(),
      Reply::Complete {
        last: None,
        outcome: FileReceiveOutcome::Success
      }
    ));
  }

  #[test]
  fn failure_code_ends_without_fragment_fields() {
    let mut op = FileReceive::new("CPU:missing.dat");
    let mut w = PayloadWriter::new(FILE_RECEIVE_ACK);
    w.put_u32(4);
    let msg = w.finish().unwrap();
    assert!(matches!(
      op.on_reply(msg.msg_type(), &mut msg.reader()).unwrap(),
      Reply::Complete {
        last: None,
        outcome: FileReceiveOutcome::InvalidFileName
      }
    ));
  }
}
