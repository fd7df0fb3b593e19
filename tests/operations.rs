// tests/operations.rs

use rcora::message::PayloadWriter;
use rcora::ops::{ClockSet, ClockSetOutcome, VariableSet, VariableSetOutcome, VariableValue};
use rcora::protocol::{CLOCK_SET_ACK, CLOCK_SET_CMD, VARIABLE_SET_ACK, VARIABLE_SET_CMD};
use rcora::transaction::Transaction;
use rcora::CoraError;

use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

mod common;
use common::{answer, inproc_session, settle, tran_no_of, FakeServer, Recorder};

#[test]
fn test_variable_set_sends_the_tagged_value() -> Result<(), CoraError> {
  let ctx = common::test_context();
  let server = FakeServer::new();
  server.set_responder(answer(VARIABLE_SET_ACK, &[1]));
  let (_router, session) = inproc_session(&ctx, &server);

  let tran = Transaction::new(&ctx, VariableSet::new("Public", "Setpoint", 42));
  tran.set_device_name("Station1")?;
  tran.set_session(&session)?;
  let client = Recorder::<VariableSet>::new();
  tran.start(&Arc::downgrade(&client))?;
  settle(&ctx);

  assert_eq!(client.outcomes(), vec![VariableSetOutcome::Success]);
  let commands = server.commands_of(VARIABLE_SET_CMD);
  assert_eq!(commands.len(), 1);
  let mut r = commands[0].reader();
  r.get_u32()?;
  assert_eq!(r.get_str()?, "Public");
  assert_eq!(r.get_str()?, "Setpoint");
  assert_eq!(VariableValue::decode(&mut r)?, VariableValue::Int(42));
  Ok(())
}

#[test]
fn test_variable_set_refusals() -> Result<(), CoraError> {
  let ctx = common::test_context();
  let server = FakeServer::new();
  let (_router, session) = inproc_session(&ctx, &server);
  let tran = Transaction::new(&ctx, VariableSet::new("Public", "Nope", true));
  tran.set_device_name("Station1")?;
  tran.set_session(&session)?;
  let client = Recorder::<VariableSet>::new();

  for code in [4, 6, 7, 8] {
    server.set_responder(answer(VARIABLE_SET_ACK, &[code]));
    tran.start(&Arc::downgrade(&client))?;
    settle(&ctx);
  }

  assert_eq!(
    client.outcomes(),
    vec![
      VariableSetOutcome::InvalidColumnName,
      VariableSetOutcome::InvalidDataType,
      VariableSetOutcome::OutOfRange,
      VariableSetOutcome::ReadOnly,
    ]
  );
  Ok(())
}

#[test]
fn test_clock_check_reads_the_logger_time() -> Result<(), CoraError> {
  let ctx = common::test_context();
  let server = FakeServer::new();
  let logger_nanos: i64 = 1_700_000_000 * 1_000_000_000;
  server.set_responder(move |link, session, msg| {
    let mut w = PayloadWriter::new(CLOCK_SET_ACK);
    w.put_u32(tran_no_of(msg)).put_u32(1).put_i64(logger_nanos);
    let _ = link.reply(session, w.finish().unwrap());
  });
  let (_router, session) = inproc_session(&ctx, &server);

  let tran = Transaction::new(&ctx, ClockSet::check());
  tran.set_device_name("Station1")?;
  tran.set_session(&session)?;
  let client = Recorder::<ClockSet>::new();
  tran.start(&Arc::downgrade(&client))?;
  settle(&ctx);

  assert_eq!(client.outcomes(), vec![ClockSetOutcome::Success]);
  assert_eq!(
    tran.inspect(|op| op.logger_time()),
    Some(UNIX_EPOCH + Duration::from_secs(1_700_000_000))
  );

  let clock_cmds = server.commands_of(CLOCK_SET_CMD);
  let mut r = clock_cmds[0].reader();
  r.get_u32()?;
  assert!(!r.get_bool()?, "a check must not set the clock");
  Ok(())
}

#[test]
fn test_clock_set_blocked_keeps_no_time() -> Result<(), CoraError> {
  let ctx = common::test_context();
  let server = FakeServer::new();
  server.set_responder(answer(CLOCK_SET_ACK, &[4]));
  let (_router, session) = inproc_session(&ctx, &server);

  let tran = Transaction::new(&ctx, ClockSet::set_to(UNIX_EPOCH + Duration::from_secs(60)));
  tran.set_device_name("Station1")?;
  tran.set_session(&session)?;
  let client = Recorder::<ClockSet>::new();
  tran.start(&Arc::downgrade(&client))?;
  settle(&ctx);

  assert_eq!(client.outcomes(), vec![ClockSetOutcome::LoggerSecurityBlocked]);
  assert_eq!(tran.inspect(|op| op.logger_time()), None);
  let clock_cmds = server.commands_of(CLOCK_SET_CMD);
  let mut r = clock_cmds[0].reader();
  r.get_u32()?;
  assert!(r.get_bool()?);
  assert_eq!(r.get_i64()?, 60_000_000_000);
  Ok(())
}
