// src/transport/tcp.rs

//! Router speaking the framed session protocol over one TCP connection.

use super::frame::{Frame, FrameCodec};
use super::{BrokenReason, IRouter, RouterSink, SessionId};
use crate::error::{CoraError, CoraResult};
use crate::message::Msg;
use crate::options::TcpRouterConfig;

use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};

struct TcpShared {
  endpoint: String,
  sessions: RwLock<HashMap<SessionId, RouterSink>>,
  next_id: AtomicU32,
  closed: AtomicBool,
}

impl TcpShared {
  /// Marks the connection dead and reports every session broken. Only the
  /// first caller does anything.
  fn fail_all(&self, reason: BrokenReason) {
    if self.closed.swap(true, Ordering::AcqRel) {
      return;
    }
    let drained: Vec<(SessionId, RouterSink)> = self.sessions.write().drain().collect();
    tracing::info!(
      endpoint = %self.endpoint,
      sessions = drained.len(),
      reason = ?reason,
      "TCP router connection ended"
    );
    for (session, sink) in drained {
      sink.on_session_broken(session, reason);
    }
  }
}

/// A router connected to a server over TCP.
///
/// Two tasks run per connection: a reader that turns frames into posted
/// events and a writer fed by an unbounded channel, so the `IRouter`
/// methods never block the dispatching thread.
pub struct TcpRouter {
  shared: Arc<TcpShared>,
  writer_tx: async_channel::Sender<Frame>,
  reader_task: JoinHandle<()>,
}

impl TcpRouter {
  /// Connects to `endpoint` (`host:port`, optionally prefixed `tcp://`).
  pub async fn connect(endpoint: &str, config: TcpRouterConfig) -> CoraResult<Self> {
    let addr = endpoint.strip_prefix("tcp://").unwrap_or(endpoint);
    if addr.is_empty() {
      return Err(CoraError::InvalidArgument(format!("invalid TCP endpoint '{}'", endpoint)));
    }

    let connect = TcpStream::connect(addr);
    let stream = match config.connect_timeout {
      Some(limit) => tokio::time::timeout(limit, connect)
        .await
        .map_err(|_| CoraError::Timeout)?,
      None => connect.await,
    }
    .map_err(|e| CoraError::from_io(e, endpoint))?;

    if let Err(e) = stream.set_nodelay(config.tcp_nodelay) {
      tracing::warn!(endpoint = %endpoint, error = %e, "Failed to set TCP_NODELAY");
    }
    let peer = stream.peer_addr().map(|a| a.to_string()).unwrap_or_default();
    tracing::info!(endpoint = %endpoint, peer = %peer, "TCP router connected");

    let (read_half, write_half) = stream.into_split();
    let shared = Arc::new(TcpShared {
      endpoint: endpoint.to_string(),
      sessions: RwLock::new(HashMap::new()),
      next_id: AtomicU32::new(1),
      closed: AtomicBool::new(false),
    });
    let (writer_tx, writer_rx) = async_channel::unbounded();

    let reader_task = tokio::spawn(Self::run_reader(
      shared.clone(),
      FramedRead::new(read_half, FrameCodec::new(config.max_frame_len)),
      writer_tx.clone(),
    ));
    tokio::spawn(Self::run_writer(
      shared.clone(),
      FramedWrite::new(write_half, FrameCodec::new(config.max_frame_len)),
      writer_rx,
    ));

    Ok(Self {
      shared,
      writer_tx,
      reader_task,
    })
  }

  pub fn endpoint(&self) -> &str {
    &self.shared.endpoint
  }

  pub fn is_connected(&self) -> bool {
    !self.shared.closed.load(Ordering::Acquire)
  }

  /// Stops both tasks and reports every open session broken.
  pub fn shutdown(&self) {
    self.writer_tx.close();
    self.reader_task.abort();
    self.shared.fail_all(BrokenReason::RouterShutdown);
  }

  async fn run_reader(
    shared: Arc<TcpShared>,
    mut frames: FramedRead<OwnedReadHalf, FrameCodec>,
    writer_tx: async_channel::Sender<Frame>,
  ) {
    let reason = loop {
      match frames.next().await {
        Some(Ok(frame)) => Self::handle_incoming(&shared, frame),
        Some(Err(e)) => {
          tracing::error!(endpoint = %shared.endpoint, error = %e, "TCP router read failed");
          break BrokenReason::ConnectionLost;
        }
        None => {
          tracing::debug!(endpoint = %shared.endpoint, "TCP router reached end of stream");
          break BrokenReason::ConnectionLost;
        }
      }
    };
    writer_tx.close();
    shared.fail_all(reason);
  }

  fn handle_incoming(shared: &TcpShared, frame: Frame) {
    match frame {
      Frame::Data { session, msg } => {
        let sink = shared.sessions.read().get(&session).cloned();
        match sink {
          Some(sink) => sink.on_message(session, msg),
          None => {
            tracing::warn!(session = session.0, msg_type = %msg.msg_type(), "Message for unknown session dropped")
          }
        }
      }
      Frame::Broken { session, reason } => {
        if let Some(sink) = shared.sessions.write().remove(&session) {
          sink.on_session_broken(session, reason);
        }
      }
      Frame::Close { session } => {
        if let Some(sink) = shared.sessions.write().remove(&session) {
          sink.on_session_broken(session, BrokenReason::ClosedByServer);
        }
      }
      Frame::Open { session } => {
        tracing::warn!(session = session.0, "Server tried to open a session, ignoring");
      }
    }
  }

  async fn run_writer(
    shared: Arc<TcpShared>,
    mut sink: FramedWrite<OwnedWriteHalf, FrameCodec>,
    writer_rx: async_channel::Receiver<Frame>,
  ) {
    while let Ok(frame) = writer_rx.recv().await {
      if let Err(e) = sink.send(frame).await {
        tracing::error!(endpoint = %shared.endpoint, error = %e, "TCP router write failed");
        shared.fail_all(BrokenReason::ConnectionLost);
        return;
      }
    }
    let _ = sink.close().await;
    tracing::trace!(endpoint = %shared.endpoint, "TCP router writer stopped");
  }

  fn queue(&self, frame: Frame) -> CoraResult<()> {
    if !self.is_connected() {
      return Err(CoraError::ConnectionClosed);
    }
    self.writer_tx.try_send(frame).map_err(|_| CoraError::ConnectionClosed)
  }
}

impl IRouter for TcpRouter {
  fn open_session(&self, sink: RouterSink) -> CoraResult<SessionId> {
    if !self.is_connected() {
      return Err(CoraError::ConnectionClosed);
    }
    let session = SessionId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
    self.shared.sessions.write().insert(session, sink);
    if let Err(e) = self.queue(Frame::Open { session }) {
      self.shared.sessions.write().remove(&session);
      return Err(e);
    }
    tracing::debug!(endpoint = %self.shared.endpoint, session = session.0, "TCP session opened");
    Ok(session)
  }

  fn send_message(&self, session: SessionId, msg: Msg) -> CoraResult<()> {
    if !self.shared.sessions.read().contains_key(&session) {
      return Err(CoraError::SessionNotOpen(session.0));
    }
    self.queue(Frame::Data { session, msg })
  }

  fn close_session(&self, session: SessionId) {
    if self.shared.sessions.write().remove(&session).is_some() {
      tracing::debug!(endpoint = %self.shared.endpoint, session = session.0, "TCP session closed");
      let _ = self.queue(Frame::Close { session });
    }
  }
}

impl fmt::Debug for TcpRouter {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TcpRouter")
      .field("endpoint", &self.shared.endpoint)
      .field("connected", &self.is_connected())
      .field("open_sessions", &self.shared.sessions.read().len())
      .finish()
  }
}

impl Drop for TcpRouter {
  fn drop(&mut self) {
    self.writer_tx.close();
    // The writer drains what is already queued, then exits.
    self.reader_task.abort();
  }
}
