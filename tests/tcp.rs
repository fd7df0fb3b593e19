// tests/tcp.rs

use rcora::message::Msg;
use rcora::ops::{TableReset, TableResetOutcome};
use rcora::protocol::{DeviceAck, LogonAck, LogonRequest, OpenDeviceRequest, LOGON_CMD, OPEN_DEVICE_CMD, TABLE_RESET_ACK};
use rcora::transaction::Transaction;
use rcora::transport::frame::{Frame, FrameCodec};
use rcora::{CoraError, Session, SessionState, TcpRouter, TcpRouterConfig};

use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::codec::Framed;

mod common;
use common::{reply, tran_no_of, Recorder};

const LONG_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, PartialEq, Eq)]
enum Behaviour {
  Answer,
  /// Drops the connection when the device command arrives.
  HangUp,
}

async fn spawn_server(behaviour: Behaviour) -> SocketAddr {
  let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
  let addr = listener.local_addr().expect("local addr");
  tokio::spawn(async move {
    let (stream, peer) = listener.accept().await.expect("accept");
    println!("Server accepted {}", peer);
    let mut framed = Framed::new(stream, FrameCodec::default());
    while let Some(Ok(frame)) = framed.next().await {
      let Frame::Data { session, msg } = frame else {
        continue;
      };
      let response: Msg = if msg.msg_type() == LOGON_CMD {
        let req = LogonRequest::decode(&msg).expect("logon request");
        LogonAck { tran_no: req.tran_no, resp: 1 }.encode()
      } else if msg.msg_type() == OPEN_DEVICE_CMD {
        let req = OpenDeviceRequest::decode(&msg).expect("open-device request");
        DeviceAck {
          tran_no: req.tran_no,
          resp: 1,
          access_level: 3,
        }
        .encode()
      } else if behaviour == Behaviour::HangUp {
        println!("Server hanging up");
        return;
      } else {
        reply(TABLE_RESET_ACK, tran_no_of(&msg), &[1])
      };
      if framed.send(Frame::Data { session, msg: response }).await.is_err() {
        return;
      }
    }
  });
  addr
}

#[tokio::test]
async fn test_table_reset_over_tcp() -> anyhow::Result<()> {
  let ctx = common::test_context();
  let addr = spawn_server(Behaviour::Answer).await;
  let router = Arc::new(TcpRouter::connect(&format!("tcp://{}", addr), TcpRouterConfig::default()).await?);
  assert!(router.is_connected());
  let session = Session::new(&ctx, router.clone(), common::credentials());

  let tran = Transaction::new(&ctx, TableReset::new("Public"));
  tran.set_device_name("Station1")?;
  tran.set_session(&session)?;
  let client = Recorder::<TableReset>::new();
  tran.start(&Arc::downgrade(&client))?;

  let done = common::pump_until(&ctx, LONG_TIMEOUT, || !client.outcomes().is_empty()).await;
  assert!(done, "no outcome over TCP");
  assert_eq!(client.outcomes(), vec![TableResetOutcome::Success]);
  assert!(session.is_ready());

  router.shutdown();
  assert!(!router.is_connected());
  Ok(())
}

#[tokio::test]
async fn test_connection_loss_while_active() -> anyhow::Result<()> {
  let ctx = common::test_context();
  let addr = spawn_server(Behaviour::HangUp).await;
  let router = Arc::new(TcpRouter::connect(&addr.to_string(), TcpRouterConfig::default()).await?);
  let session = Session::new(&ctx, router.clone(), common::credentials());

  let tran = Transaction::new(&ctx, TableReset::new("Public"));
  tran.set_device_name("Station1")?;
  tran.set_session(&session)?;
  let client = Recorder::<TableReset>::new();
  tran.start(&Arc::downgrade(&client))?;

  let done = common::pump_until(&ctx, LONG_TIMEOUT, || {
    !client.outcomes().is_empty() && session.state() == SessionState::Broken
  })
  .await;
  assert!(done, "connection loss not reported");
  assert_eq!(client.outcomes(), vec![TableResetOutcome::SessionFailed]);
  assert!(!router.is_connected());

  // Nothing more arrives for the finished run.
  let _ = tokio::time::timeout(Duration::from_millis(50), ctx.dispatch_async()).await;
  ctx.dispatch();
  assert_eq!(client.outcomes().len(), 1);
  Ok(())
}

#[tokio::test]
async fn test_connect_errors() {
  common::test_context();
  assert!(matches!(
    TcpRouter::connect("tcp://", TcpRouterConfig::default()).await,
    Err(CoraError::InvalidArgument(_))
  ));

  let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
  let addr = listener.local_addr().expect("local addr");
  drop(listener);
  let result = TcpRouter::connect(&addr.to_string(), TcpRouterConfig::default()).await;
  println!("Connect to closed port: {:?}", result.as_ref().map(|_| ()));
  assert!(matches!(result, Err(CoraError::ConnectionRefused(_))));
}
