// tests/common.rs
#![allow(dead_code)] // Not every test binary uses every helper

use rcora::message::{MessageType, Msg, PayloadWriter};
use rcora::protocol::{
  peek_tran_no, DeviceAck, LogonAck, LogonRequest, OpenDeviceRequest, LOGON_CMD, OPEN_DEVICE_CMD,
};
use rcora::session::{MonitorReceiver, SessionEvent};
use rcora::transaction::{IOperation, ITransactionClient, Transaction, TransactionState};
use rcora::transport::{IInprocServer, InprocLink, InprocRouter, SessionId};
use rcora::{Context, Credentials, Session};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

// Use std::sync::Once for one-time initialization
static TRACING_INIT: Once = Once::new();

pub const USER: &str = "admin";
pub const PASSWORD: &str = "secret";

// Setup function to initialize tracing
fn setup_tracing() {
  TRACING_INIT.call_once(|| {
    // Can be overridden by RUST_LOG env variable
    let default_filter = "rcora=trace,info";
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let subscriber = FmtSubscriber::builder()
      .with_max_level(tracing::Level::TRACE)
      .with_env_filter(env_filter)
      .with_target(true)
      .with_line_number(true)
      .with_span_events(FmtSpan::CLOSE)
      .with_test_writer() // Write to test output capture
      .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set global tracing subscriber");
  });
}

// Helper to create a context
pub fn test_context() -> Context {
  setup_tracing(); // Ensure tracing is initialized before creating context
  Context::new()
}

pub fn credentials() -> Credentials {
  Credentials::new(USER, PASSWORD)
}

/// Dispatches until the queue is empty.
pub fn settle(ctx: &Context) {
  for _ in 0..1000 {
    if ctx.pending() == 0 {
      return;
    }
    ctx.dispatch();
  }
  panic!("event queue did not settle");
}

/// Dispatches (waiting for events as needed) until `done` holds or the
/// timeout passes.
pub async fn pump_until(ctx: &Context, limit: Duration, done: impl Fn() -> bool) -> bool {
  let start = tokio::time::Instant::now();
  loop {
    ctx.dispatch();
    if done() {
      return true;
    }
    if start.elapsed() > limit {
      return false;
    }
    let _ = tokio::time::timeout(Duration::from_millis(20), ctx.dispatch_async()).await;
  }
}

/// Builds a reply whose payload is the transaction number followed by
/// `fields`.
pub fn reply(msg_type: MessageType, tran_no: u32, fields: &[u32]) -> Msg {
  let mut w = PayloadWriter::new(msg_type);
  w.put_u32(tran_no);
  for field in fields {
    w.put_u32(*field);
  }
  w.finish().unwrap()
}

pub fn tran_no_of(msg: &Msg) -> u32 {
  peek_tran_no(msg).expect("message without transaction number")
}

type Responder = Box<dyn FnMut(&InprocLink, SessionId, &Msg) + Send>;

/// A scripted Cora server for the in-process router.
///
/// Logon and open-device commands are answered from the configured users
/// and devices. Every other command is recorded and handed to the
/// responder, if one is set.
pub struct FakeServer {
  state: Mutex<FakeState>,
}

struct FakeState {
  users: HashMap<String, String>,
  devices: HashMap<String, u32>,
  logon_code: Option<u32>,
  device_code: Option<u32>,
  logons: usize,
  device_opens: usize,
  commands: Vec<(SessionId, Msg)>,
  device_sessions: HashMap<SessionId, String>,
  closed: Vec<SessionId>,
  responder: Option<Responder>,
}

impl FakeServer {
  pub fn new() -> Arc<Self> {
    let mut users = HashMap::new();
    users.insert(USER.to_string(), PASSWORD.to_string());
    let mut devices = HashMap::new();
    devices.insert("Station1".to_string(), 3);
    Arc::new(Self {
      state: Mutex::new(FakeState {
        users,
        devices,
        logon_code: None,
        device_code: None,
        logons: 0,
        device_opens: 0,
        commands: Vec::new(),
        device_sessions: HashMap::new(),
        closed: Vec::new(),
        responder: None,
      }),
    })
  }

  pub fn add_device(&self, name: &str, access_level: u32) {
    self.state.lock().devices.insert(name.to_string(), access_level);
  }

  /// Forces every logon to be answered with `code`.
  pub fn set_logon_code(&self, code: u32) {
    self.state.lock().logon_code = Some(code);
  }

  /// Forces every open-device command to be answered with `code`.
  pub fn set_device_code(&self, code: u32) {
    self.state.lock().device_code = Some(code);
  }

  pub fn set_responder(&self, responder: impl FnMut(&InprocLink, SessionId, &Msg) + Send + 'static) {
    self.state.lock().responder = Some(Box::new(responder));
  }

  pub fn logons(&self) -> usize {
    self.state.lock().logons
  }

  pub fn device_opens(&self) -> usize {
    self.state.lock().device_opens
  }

  /// Device-level commands received, in order.
  pub fn commands(&self) -> Vec<Msg> {
    self.state.lock().commands.iter().map(|(_, m)| m.clone()).collect()
  }

  pub fn commands_of(&self, msg_type: MessageType) -> Vec<Msg> {
    self
      .commands()
      .into_iter()
      .filter(|m| m.msg_type() == msg_type)
      .collect()
  }

  pub fn closed_sessions(&self) -> Vec<SessionId> {
    self.state.lock().closed.clone()
  }

  /// Router sessions bound to a device, with the device name.
  pub fn device_sessions(&self) -> HashMap<SessionId, String> {
    self.state.lock().device_sessions.clone()
  }

  pub fn router(self: &Arc<Self>) -> Arc<InprocRouter> {
    Arc::new(InprocRouter::new(self.clone()))
  }
}

impl IInprocServer for FakeServer {
  fn on_message(&self, link: &InprocLink, session: SessionId, msg: Msg) {
    let mut state = self.state.lock();
    if msg.msg_type() == LOGON_CMD {
      let req = LogonRequest::decode(&msg).unwrap();
      state.logons += 1;
      let resp = state.logon_code.unwrap_or_else(|| {
        match state.users.get(req.credentials.user()) {
          Some(password) if password == req.credentials.password() => 1,
          _ => 2,
        }
      });
      link
        .reply(session, LogonAck { tran_no: req.tran_no, resp }.encode())
        .unwrap();
    } else if msg.msg_type() == OPEN_DEVICE_CMD {
      let req = OpenDeviceRequest::decode(&msg).unwrap();
      state.device_opens += 1;
      let (resp, access_level) = match (state.device_code, state.devices.get(&req.device_name)) {
        (Some(code), _) => (code, 0),
        (None, Some(level)) => (1, *level),
        (None, None) => (2, 0),
      };
      if resp == 1 {
        state.device_sessions.insert(session, req.device_name.clone());
      }
      link
        .reply(
          session,
          DeviceAck {
            tran_no: req.tran_no,
            resp,
            access_level,
          }
          .encode(),
        )
        .unwrap();
    } else {
      state.commands.push((session, msg.clone()));
      if let Some(responder) = state.responder.as_mut() {
        responder(link, session, &msg);
      }
    }
  }

  fn on_close(&self, _link: &InprocLink, session: SessionId) {
    self.state.lock().closed.push(session);
  }
}

/// Records every callback made on it.
pub struct Recorder<O: IOperation> {
  pub started: AtomicUsize,
  pub progress: Mutex<Vec<O::Progress>>,
  pub outcomes: Mutex<Vec<O::Outcome>>,
  /// Transaction state observed inside `on_complete`.
  pub states_at_complete: Mutex<Vec<TransactionState>>,
  pub held_session_at_complete: Mutex<Vec<bool>>,
}

impl<O: IOperation> Recorder<O> {
  pub fn new() -> Arc<Self> {
    Arc::new(Self {
      started: AtomicUsize::new(0),
      progress: Mutex::new(Vec::new()),
      outcomes: Mutex::new(Vec::new()),
      states_at_complete: Mutex::new(Vec::new()),
      held_session_at_complete: Mutex::new(Vec::new()),
    })
  }

  pub fn started(&self) -> usize {
    self.started.load(Ordering::SeqCst)
  }

  pub fn outcomes(&self) -> Vec<O::Outcome> {
    self.outcomes.lock().clone()
  }

  pub fn progress(&self) -> Vec<O::Progress> {
    self.progress.lock().clone()
  }
}

impl<O: IOperation> ITransactionClient<O> for Recorder<O> {
  fn on_started(&self, _tran: &Transaction<O>) {
    self.started.fetch_add(1, Ordering::SeqCst);
  }

  fn on_progress(&self, _tran: &Transaction<O>, progress: &O::Progress) {
    self.progress.lock().push(progress.clone());
  }

  fn on_complete(&self, tran: &Transaction<O>, outcome: O::Outcome) {
    self.states_at_complete.lock().push(tran.state());
    self.held_session_at_complete.lock().push(tran.device().is_some());
    self.outcomes.lock().push(outcome);
  }
}

/// Collects every monitor event currently queued.
pub fn drain_monitor(monitor: &MonitorReceiver) -> Vec<SessionEvent> {
  let mut events = Vec::new();
  while let Ok(event) = monitor.try_recv() {
    events.push(event);
  }
  events
}

/// A router to `server` and a session logging on through it.
pub fn inproc_session(ctx: &Context, server: &Arc<FakeServer>) -> (Arc<InprocRouter>, Session) {
  let router = server.router();
  let session = Session::new(ctx, router.clone(), credentials());
  (router, session)
}

/// A responder answering every command with `ack` carrying `fields` after
/// the transaction number.
pub fn answer(ack: MessageType, fields: &[u32]) -> impl FnMut(&InprocLink, SessionId, &Msg) + Send + 'static {
  let fields = fields.to_vec();
  move |link, session, msg| {
    let _ = link.reply(session, reply(ack, tran_no_of(msg), &fields));
  }
}
