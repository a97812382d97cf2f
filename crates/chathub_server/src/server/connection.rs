#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context as _;
use chathub_protocol::encode_server_frame;
use futures::{SinkExt as _, StreamExt as _};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::Utf8Bytes;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, info, warn};

use crate::server::hub::Hub;
use crate::server::registry::{CloseReason, Outbound};

/// Per-listener transport settings.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
	/// Only upgrades on this path are accepted.
	pub ws_path: String,

	/// Upper bound on any single socket write, including the closing handshake.
	/// A peer that stops reading is dropped once a write stalls this long.
	pub write_timeout: Duration,
}

impl Default for ConnectionSettings {
	fn default() -> Self {
		Self {
			ws_path: "/ws".to_string(),
			write_timeout: Duration::from_secs(30),
		}
	}
}

fn close_code(reason: CloseReason) -> CloseCode {
	match reason {
		CloseReason::AuthFailed | CloseReason::PolicyViolation => CloseCode::Policy,
		CloseReason::HeartbeatTimeout => CloseCode::Away,
		CloseReason::ClientClosed | CloseReason::TransportError => CloseCode::Normal,
	}
}

/// Accept loop; each connection runs on its own task.
pub async fn serve(listener: TcpListener, hub: Hub, settings: ConnectionSettings) {
	loop {
		let (stream, peer) = match listener.accept().await {
			Ok(accepted) => accepted,
			Err(e) => {
				warn!(error = %e, "failed to accept tcp connection");
				continue;
			}
		};

		let hub = hub.clone();
		let settings = settings.clone();
		tokio::spawn(async move {
			if let Err(e) = handle_connection(stream, peer, hub, settings).await {
				debug!(%peer, error = %e, "connection handler exited with error");
			}
		});
	}
}

pub async fn handle_connection(
	stream: TcpStream,
	peer: SocketAddr,
	hub: Hub,
	settings: ConnectionSettings,
) -> anyhow::Result<()> {
	struct ConnectionGaugeGuard;
	impl Drop for ConnectionGaugeGuard {
		fn drop(&mut self) {
			metrics::gauge!("chathub_server_transport_connections").decrement(1.0);
		}
	}

	metrics::gauge!("chathub_server_transport_connections").increment(1.0);
	let _conn_guard = ConnectionGaugeGuard;

	let write_timeout = settings.write_timeout;
	let ws_path = settings.ws_path;
	let ws = accept_hdr_async(stream, move |req: &Request, response: Response| -> Result<Response, ErrorResponse> {
		if req.uri().path() == ws_path {
			return Ok(response);
		}
		let mut rejection = ErrorResponse::new(Some("Not Found".to_string()));
		*rejection.status_mut() = StatusCode::NOT_FOUND;
		Err(rejection)
	})
	.await
	.context("websocket handshake")?;

	let (conn, mut outbound) = hub.open();
	info!(conn_id = %conn, %peer, "accepted websocket connection");

	let (mut sink, mut incoming) = ws.split();

	let reason = loop {
		tokio::select! {
			msg = incoming.next() => match msg {
				Some(Ok(Message::Text(text))) => hub.handle_frame(conn, text.as_str()).await,
				Some(Ok(Message::Binary(_))) => {
					metrics::counter!("chathub_server_frames_rejected_total").increment(1);
					debug!(conn_id = %conn, "binary frame dropped");
				}
				Some(Ok(Message::Pong(_))) => hub.mark_alive(conn),
				Some(Ok(Message::Ping(_) | Message::Frame(_))) => {}
				Some(Ok(Message::Close(_))) | None => break CloseReason::ClientClosed,
				Some(Err(e)) => {
					debug!(conn_id = %conn, error = %e, "websocket read failed");
					break CloseReason::TransportError;
				}
			},
			out = outbound.recv() => match out {
				Some(Outbound::Frame(frame)) => {
					let text = match encode_server_frame(&frame) {
						Ok(text) => text,
						Err(e) => {
							warn!(conn_id = %conn, frame = frame.kind(), error = %e, "failed to encode frame");
							continue;
						}
					};
					match timeout(write_timeout, sink.send(Message::text(text))).await {
						Ok(Ok(())) => {}
						Ok(Err(e)) => {
							debug!(conn_id = %conn, error = %e, "websocket write failed");
							break CloseReason::TransportError;
						}
						Err(_) => {
							warn!(conn_id = %conn, "websocket write stalled; dropping peer");
							break CloseReason::TransportError;
						}
					}
				}
				Some(Outbound::Ping) => {
					match timeout(write_timeout, sink.send(Message::Ping(Default::default()))).await {
						Ok(Ok(())) => {}
						Ok(Err(e)) => {
							debug!(conn_id = %conn, error = %e, "websocket ping failed");
							break CloseReason::TransportError;
						}
						Err(_) => {
							warn!(conn_id = %conn, "websocket ping stalled; dropping peer");
							break CloseReason::TransportError;
						}
					}
				}
				Some(Outbound::Close(reason)) => {
					let frame = CloseFrame {
						code: close_code(reason),
						reason: Utf8Bytes::from_static(reason.as_str()),
					};
					let _ = timeout(write_timeout, sink.send(Message::Close(Some(frame)))).await;
					break reason;
				}
				// The hub dropped this connection without a close instruction.
				None => break CloseReason::TransportError,
			},
		}
	};

	hub.close(conn, reason).await;
	let _ = timeout(write_timeout, sink.close()).await;
	debug!(conn_id = %conn, reason = reason.as_str(), "transport finished");
	Ok(())
}
