// src/session/binder.rs

//! Binding a transaction to one named device.
//!
//! The binder borrows a [`Session`], waits for (or triggers) its logon, then
//! opens a dedicated router session and asks the server to attach it to the
//! device. It reports exactly one of ready or failed per bind.

use super::{LogonProgress, Session};
use crate::error::{CoraError, CoraResult};
use crate::message::Msg;
use crate::protocol::{AckStatus, DeviceAck, OpenDeviceRequest, OPEN_DEVICE_ACK};
use crate::transaction::ClientFailure;
use crate::transport::{RouterSink, SessionId};

/// A device sub-session as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceHandle {
  pub device_name: String,
  /// Router session carrying the device's traffic.
  pub session_id: SessionId,
  pub access_level: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BindSignal {
  Pending,
  Ready,
  Failed(ClientFailure),
  /// The server answered the open-device command with an unlisted code or
  /// an unreadable acknowledgement.
  Unknown(u32),
}

#[derive(Debug)]
enum Phase {
  Unbound,
  AwaitingLogon,
  AwaitingDevice { device_session: SessionId, tran_no: u32 },
  Bound(DeviceHandle),
}

pub(crate) struct SessionBinder {
  recipient: usize,
  run: u64,
  session: Session,
  /// Private connection: the session is closed on release.
  owned: bool,
  device_name: String,
  phase: Phase,
  released: bool,
}

impl SessionBinder {
  pub(crate) fn new(recipient: usize, run: u64, session: Session, owned: bool, device_name: String) -> Self {
    Self {
      recipient,
      run,
      session,
      owned,
      device_name,
      phase: Phase::Unbound,
      released: false,
    }
  }

  pub(crate) fn session(&self) -> &Session {
    &self.session
  }

  pub(crate) fn device(&self) -> Option<&DeviceHandle> {
    match &self.phase {
      Phase::Bound(device) => Some(device),
      _ => None,
    }
  }

  /// True if `session` is the router session this binder opened.
  pub(crate) fn owns_router_session(&self, session: SessionId) -> bool {
    match &self.phase {
      Phase::AwaitingDevice { device_session, .. } => *device_session == session,
      Phase::Bound(device) => device.session_id == session,
      _ => false,
    }
  }

  pub(crate) fn begin(&mut self) -> BindSignal {
    match self.session.request_logon(self.recipient) {
      LogonProgress::Ready(logon_session) => self.open_device(logon_session),
      LogonProgress::Pending => {
        tracing::debug!(recipient = self.recipient, session = self.session.handle(), "Waiting for session logon");
        self.phase = Phase::AwaitingLogon;
        BindSignal::Pending
      }
      LogonProgress::Failed(failure) => BindSignal::Failed(failure),
    }
  }

  pub(crate) fn on_logon_succeeded(&mut self, session_key: usize, logon_session: SessionId) -> Option<BindSignal> {
    if session_key != self.session.handle() || !matches!(self.phase, Phase::AwaitingLogon) {
      return None;
    }
    Some(self.open_device(logon_session))
  }

  pub(crate) fn on_logon_failed(&mut self, session_key: usize, failure: ClientFailure) -> Option<BindSignal> {
    if session_key != self.session.handle() || !matches!(self.phase, Phase::AwaitingLogon) {
      return None;
    }
    self.phase = Phase::Unbound;
    Some(BindSignal::Failed(failure))
  }

  /// True if a parent-broken notice concerns this binder's session.
  pub(crate) fn is_parent(&self, session_key: usize) -> bool {
    session_key == self.session.handle()
  }

  fn open_device(&mut self, logon_session: SessionId) -> BindSignal {
    if !self.session.attach(self.recipient) {
      self.phase = Phase::Unbound;
      return BindSignal::Failed(ClientFailure::ConnectionFailed);
    }
    let router = self.session.router().clone();
    let sink = RouterSink::new(self.session.context().poster(), self.recipient, self.run);
    let device_session = match router.open_session(sink) {
      Ok(id) => id,
      Err(e) => {
        tracing::warn!(recipient = self.recipient, error = %e, "Could not open device session");
        self.session.detach(self.recipient, None);
        self.phase = Phase::Unbound;
        return BindSignal::Failed(ClientFailure::ConnectionFailed);
      }
    };
    let tran_no = self.session.next_tran_no();
    let request = OpenDeviceRequest {
      tran_no,
      logon_session,
      device_name: self.device_name.clone(),
    };
    if let Err(e) = request.encode().and_then(|msg| router.send_message(device_session, msg)) {
      tracing::warn!(recipient = self.recipient, error = %e, "Could not send open-device command");
      self.drop_device_session(device_session);
      return BindSignal::Failed(ClientFailure::ConnectionFailed);
    }
    tracing::debug!(
      recipient = self.recipient,
      device = %self.device_name,
      device_session = device_session.0,
      tran_no = tran_no,
      "Open-device command sent"
    );
    self.phase = Phase::AwaitingDevice { device_session, tran_no };
    BindSignal::Pending
  }

  /// Handles a message on the device session while the open-device command
  /// is outstanding. `None` means the message was not the awaited ack.
  pub(crate) fn on_device_message(&mut self, session: SessionId, msg: &Msg) -> Option<BindSignal> {
    let (device_session, expected) = match self.phase {
      Phase::AwaitingDevice { device_session, tran_no } if device_session == session => (device_session, tran_no),
      _ => return None,
    };
    if msg.msg_type() != OPEN_DEVICE_ACK {
      tracing::debug!(recipient = self.recipient, msg_type = %msg.msg_type(), "Unexpected message while opening device ignored");
      return None;
    }
    let ack = match DeviceAck::decode(msg) {
      Ok(ack) => ack,
      Err(e) => {
        tracing::error!(recipient = self.recipient, error = %e, "Malformed open-device acknowledgement");
        self.drop_device_session(device_session);
        return Some(BindSignal::Unknown(0));
      }
    };
    if ack.tran_no != expected {
      tracing::warn!(
        recipient = self.recipient,
        tran_no = ack.tran_no,
        expected = expected,
        "Open-device acknowledgement with another transaction number ignored"
      );
      return None;
    }
    match ack.status() {
      AckStatus::Ok => {
        let device = DeviceHandle {
          device_name: self.device_name.clone(),
          session_id: device_session,
          access_level: ack.access_level,
        };
        self.session.device_opened(&device);
        tracing::info!(
          recipient = self.recipient,
          device = %device.device_name,
          device_session = device_session.0,
          access_level = device.access_level,
          "Device ready"
        );
        self.phase = Phase::Bound(device);
        Some(BindSignal::Ready)
      }
      AckStatus::Failed(failure) => {
        tracing::info!(recipient = self.recipient, device = %self.device_name, failure = %failure, "Device open refused");
        self.drop_device_session(device_session);
        Some(BindSignal::Failed(failure))
      }
      AckStatus::Unrecognized(code) => {
        tracing::warn!(recipient = self.recipient, device = %self.device_name, resp = code, "Unknown open-device response");
        self.drop_device_session(device_session);
        Some(BindSignal::Unknown(code))
      }
    }
  }

  fn drop_device_session(&mut self, device_session: SessionId) {
    self.session.router().close_session(device_session);
    self.session.detach(self.recipient, None);
    self.phase = Phase::Unbound;
  }

  /// Sends a message on the bound device session.
  pub(crate) fn send(&self, msg: Msg) -> CoraResult<()> {
    match &self.phase {
      Phase::Bound(device) => self.session.router().send_message(device.session_id, msg),
      _ => Err(CoraError::InvalidState("device sub-session not open")),
    }
  }

  /// Releases the device sub-session and, for a private connection, the
  /// session itself. Idempotent.
  pub(crate) fn release(&mut self) {
    if self.released {
      return;
    }
    self.released = true;
    match std::mem::replace(&mut self.phase, Phase::Unbound) {
      Phase::Unbound => {}
      Phase::AwaitingLogon => self.session.remove_waiter(self.recipient),
      Phase::AwaitingDevice { device_session, .. } => {
        self.session.router().close_session(device_session);
        self.session.detach(self.recipient, None);
      }
      Phase::Bound(device) => {
        self.session.router().close_session(device.session_id);
        self.session.detach(self.recipient, Some(&device));
        tracing::debug!(recipient = self.recipient, device = %device.device_name, "Device sub-session released");
      }
    }
    if self.owned {
      self.session.close();
    }
  }
}

impl Drop for SessionBinder {
  fn drop(&mut self) {
    self.release();
  }
}
