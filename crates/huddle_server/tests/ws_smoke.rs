#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::Context as _;
use futures_util::{SinkExt, StreamExt};
use huddle_domain::ConnId;
use huddle_server::server::connection::{ConnectionSettings, handle_connection};
use huddle_server::server::registry::SessionRegistry;
use huddle_server::server::room_hub::{RoomHub, RoomHubConfig};
use huddle_server::server::router::EventRouter;
use huddle_server::server::store::PersistHandle;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

static LOG_INIT: OnceLock<()> = OnceLock::new();

fn init_test_logging() {
	LOG_INIT.get_or_init(|| {
		if std::env::var_os("HUDDLE_TEST_LOG").is_none() {
			return;
		}

		let _ = tracing_subscriber::fmt()
			.with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "debug".to_string()))
			.with_target(false)
			.try_init();
	});
}

async fn start_server() -> anyhow::Result<(SocketAddr, EventRouter)> {
	init_test_logging();

	let registry = SessionRegistry::new(4);
	let hub = RoomHub::new(RoomHubConfig {
		shard_count: 4,
		debug_logs: false,
	});
	let router = EventRouter::new(
		registry,
		hub,
		PersistHandle::disabled(),
		huddle_protocol::DEFAULT_MAX_FRAME_BYTES,
	);

	let listener = TcpListener::bind("127.0.0.1:0").await.context("bind test listener")?;
	let addr = listener.local_addr().context("local addr")?;

	let accept_router = router.clone();
	tokio::spawn(async move {
		let mut next_conn_id: u64 = 1;
		while let Ok((stream, remote)) = listener.accept().await {
			let conn = ConnId::new(next_conn_id);
			next_conn_id += 1;
			let router = accept_router.clone();
			tokio::spawn(async move {
				let _ = handle_connection(conn, stream, remote, router, ConnectionSettings::default()).await;
			});
		}
	});

	Ok((addr, router))
}

type WsClient = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn connect(addr: SocketAddr) -> anyhow::Result<WsClient> {
	let (ws, _resp) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
		.await
		.context("connect websocket client")?;
	Ok(ws)
}

async fn recv_json(ws: &mut WsClient) -> anyhow::Result<Value> {
	loop {
		let msg = timeout(Duration::from_secs(2), ws.next())
			.await
			.context("timed out waiting for frame")?
			.context("stream ended")?
			.context("read frame")?;

		match msg {
			Message::Text(text) => return Ok(serde_json::from_str(text.as_str()).context("parse frame json")?),
			Message::Close(_) => anyhow::bail!("connection closed while waiting for frame"),
			_ => continue,
		}
	}
}

#[tokio::test]
async fn join_message_and_presence_over_a_real_socket() -> anyhow::Result<()> {
	let (addr, _router) = start_server().await?;

	let mut alice = connect(addr).await?;
	alice
		.send(Message::Text(
			r#"{"type":"join","userId":7,"userName":"Alice","groupId":10}"#.into(),
		))
		.await?;

	let frame = recv_json(&mut alice).await?;
	assert_eq!(frame["type"], "online");
	assert_eq!(frame["users"], serde_json::json!(["Alice"]));

	let mut bob = connect(addr).await?;
	bob.send(Message::Text(
		r#"{"type":"join","userId":8,"userName":"Bob","groupId":10}"#.into(),
	))
	.await?;

	let frame = recv_json(&mut alice).await?;
	assert_eq!(frame["users"], serde_json::json!(["Alice", "Bob"]));
	let frame = recv_json(&mut bob).await?;
	assert_eq!(frame["users"], serde_json::json!(["Alice", "Bob"]));

	bob.send(Message::Text(r#"{"type":"message","text":"hi all"}"#.into())).await?;

	for ws in [&mut alice, &mut bob] {
		let frame = recv_json(ws).await?;
		assert_eq!(frame["type"], "message");
		assert_eq!(frame["groupId"], 10);
		assert_eq!(frame["userId"], 8);
		assert_eq!(frame["userName"], "Bob");
		assert_eq!(frame["text"], "hi all");
	}

	Ok(())
}

#[tokio::test]
async fn closing_a_client_updates_presence_for_the_rest() -> anyhow::Result<()> {
	let (addr, router) = start_server().await?;

	let mut alice = connect(addr).await?;
	alice
		.send(Message::Text(
			r#"{"type":"join","userId":7,"userName":"Alice","groupId":10}"#.into(),
		))
		.await?;
	recv_json(&mut alice).await?;

	let mut bob = connect(addr).await?;
	bob.send(Message::Text(
		r#"{"type":"join","userId":8,"userName":"Bob","groupId":10}"#.into(),
	))
	.await?;
	recv_json(&mut alice).await?;
	recv_json(&mut bob).await?;

	bob.close(None).await?;

	let frame = recv_json(&mut alice).await?;
	assert_eq!(frame["type"], "online");
	assert_eq!(frame["users"], serde_json::json!(["Alice"]));

	// Server-side state for Bob is fully gone.
	timeout(Duration::from_secs(2), async {
		while router.registry().session_count() != 1 {
			tokio::time::sleep(Duration::from_millis(10)).await;
		}
	})
	.await
	.context("bob's session should be unregistered")?;

	Ok(())
}

#[tokio::test]
async fn garbage_frames_are_ignored_and_the_connection_stays_up() -> anyhow::Result<()> {
	let (addr, _router) = start_server().await?;

	let mut alice = connect(addr).await?;
	alice
		.send(Message::Text(
			r#"{"type":"join","userId":7,"userName":"Alice","groupId":10}"#.into(),
		))
		.await?;
	recv_json(&mut alice).await?;

	alice.send(Message::Text("this is not json".into())).await?;
	alice
		.send(Message::Text(r#"{"type":"mystery","groupId":10}"#.into()))
		.await?;
	alice
		.send(Message::Text(r#"{"type":"message","text":"still here"}"#.into()))
		.await?;

	let frame = recv_json(&mut alice).await?;
	assert_eq!(frame["type"], "message");
	assert_eq!(frame["text"], "still here");

	Ok(())
}
