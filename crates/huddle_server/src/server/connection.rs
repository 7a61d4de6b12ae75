#![forbid(unsafe_code)]

use std::net::SocketAddr;

use anyhow::Context as _;
use futures_util::{SinkExt, StreamExt};
use huddle_domain::ConnId;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace};

use crate::server::router::EventRouter;

/// Per-connection tunables.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
	/// Capacity of the outbound frame queue. Fan-out to this connection drops
	/// frames once the queue is full.
	pub outbound_queue_capacity: usize,
}

impl Default for ConnectionSettings {
	fn default() -> Self {
		Self {
			outbound_queue_capacity: 256,
		}
	}
}

/// Drive one WebSocket connection to completion: handshake, writer task,
/// inbound frame loop, then teardown through the router.
pub async fn handle_connection(
	conn: ConnId,
	stream: TcpStream,
	remote: SocketAddr,
	router: EventRouter,
	settings: ConnectionSettings,
) -> anyhow::Result<()> {
	let ws = tokio_tungstenite::accept_async(stream).await.context("websocket handshake")?;
	let (mut ws_tx, mut ws_rx) = ws.split();

	let (tx, mut rx) = mpsc::channel::<String>(settings.outbound_queue_capacity.max(1));

	let writer = tokio::spawn(async move {
		while let Some(text) = rx.recv().await {
			if ws_tx.send(Message::Text(text.into())).await.is_err() {
				break;
			}
		}
		let _ = ws_tx.close().await;
	});

	debug!(%conn, %remote, "connection established");

	while let Some(incoming) = ws_rx.next().await {
		match incoming {
			Ok(Message::Text(text)) => {
				let outcome = router.handle_text(conn, &tx, text.as_str());
				trace!(%conn, ?outcome, "frame handled");
			}
			Ok(Message::Close(_)) => break,
			// Transport-level frames; nothing to route.
			Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Binary(_)) | Ok(Message::Frame(_)) => {}
			Err(e) => {
				debug!(%conn, error = %e, "connection read error");
				break;
			}
		}
	}

	let groups = router.disconnect(conn);
	debug!(%conn, %remote, groups = groups.len(), "connection closed");

	drop(tx);
	let _ = writer.await;

	Ok(())
}
