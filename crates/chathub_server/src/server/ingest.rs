#![forbid(unsafe_code)]

//! HTTP hook through which the REST collaborator reports committed writes.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context as _;
use bytes::Bytes;
use chathub_domain::{Chat, ChatUpdate, Message, SecretString, UserId};
use http_body_util::{BodyExt as _, Full, Limited};
use hyper::body::Incoming;
use hyper::header::AUTHORIZATION;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use tokio::net::TcpListener;
use tracing::{debug, warn};

use crate::collab::MemoryStore;
use crate::server::auth::constant_time_eq;
use crate::server::gateway::{BroadcastGateway, ChatEvents};
use crate::server::health::respond;

pub const INGEST_PATH: &str = "/events";

const MAX_INGEST_BODY_BYTES: usize = 1024 * 1024;

/// A committed write, as posted by the REST collaborator.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IngestEvent {
	ChatCreated {
		chat: Chat,
	},
	MessageCreated {
		message: Message,
	},
	ChatUpdated {
		update: ChatUpdate,
		/// New member list when the update also changed membership.
		#[serde(default)]
		members: Option<Vec<UserId>>,
	},
}

impl IngestEvent {
	pub const fn kind(&self) -> &'static str {
		match self {
			Self::ChatCreated { .. } => "chat_created",
			Self::MessageCreated { .. } => "message_created",
			Self::ChatUpdated { .. } => "chat_updated",
		}
	}
}

#[derive(Clone)]
pub struct IngestState {
	pub token: SecretString,
	pub store: Arc<MemoryStore>,
	pub gateway: BroadcastGateway,
}

impl IngestState {
	fn authorized(&self, header: Option<&str>) -> bool {
		header
			.and_then(|v| v.strip_prefix("Bearer "))
			.is_some_and(|t| constant_time_eq(t.trim().as_bytes(), self.token.expose().as_bytes()))
	}

	/// Record the document in the store, then notify the gateway.
	pub fn apply(&self, event: IngestEvent) {
		match event {
			IngestEvent::ChatCreated { chat } => {
				self.store.upsert_chat(chat.clone());
				self.gateway.chat_created(&chat);
			}
			IngestEvent::MessageCreated { message } => {
				self.store.insert_message(message.clone());
				self.gateway.message_created(&message);
			}
			IngestEvent::ChatUpdated { update, members } => {
				if let Some(members) = members
					&& !self.store.set_members(&update.chat_id, members)
				{
					debug!(chat_id = %update.chat_id, "member update for unknown chat ignored");
				}
				self.gateway.chat_updated(update);
			}
		}
	}
}

/// Bind the ingest listener and serve it in the background; returns the bound address.
pub async fn spawn_ingest_server(bind: SocketAddr, state: IngestState) -> anyhow::Result<SocketAddr> {
	let listener = TcpListener::bind(bind)
		.await
		.with_context(|| format!("bind ingest listener on {bind}"))?;
	let local = listener.local_addr().context("ingest listener address")?;

	tokio::spawn(async move {
		if let Err(err) = run_ingest_server(listener, state).await {
			warn!(error = %err, "ingest server stopped");
		}
	});
	Ok(local)
}

async fn run_ingest_server(listener: TcpListener, state: IngestState) -> anyhow::Result<()> {
	loop {
		let (stream, _addr) = listener.accept().await?;
		let io = TokioIo::new(stream);
		let state = state.clone();
		tokio::spawn(async move {
			let service = service_fn(move |req| handle_ingest(req, state.clone()));
			if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
				warn!(error = %err, "ingest connection error");
			}
		});
	}
}

async fn handle_ingest(req: Request<Incoming>, state: IngestState) -> Result<Response<Full<Bytes>>, hyper::Error> {
	let (parts, body) = req.into_parts();

	if parts.uri.path() != INGEST_PATH {
		return Ok(respond(StatusCode::NOT_FOUND, Bytes::new()));
	}
	if parts.method != Method::POST {
		return Ok(respond(StatusCode::METHOD_NOT_ALLOWED, Bytes::new()));
	}

	metrics::counter!("chathub_server_ingest_requests_total").increment(1);

	let auth = parts.headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
	if !state.authorized(auth) {
		metrics::counter!("chathub_server_ingest_unauthorized_total").increment(1);
		return Ok(respond(StatusCode::UNAUTHORIZED, Bytes::new()));
	}

	let body_bytes = match Limited::new(body, MAX_INGEST_BODY_BYTES).collect().await {
		Ok(collected) => collected.to_bytes(),
		Err(err) => {
			warn!(error = %err, "ingest body read failed");
			return Ok(respond(StatusCode::BAD_REQUEST, Bytes::new()));
		}
	};

	let event: IngestEvent = match serde_json::from_slice(&body_bytes) {
		Ok(event) => event,
		Err(err) => {
			metrics::counter!("chathub_server_ingest_rejected_total").increment(1);
			debug!(error = %err, "ingest body rejected");
			return Ok(respond(StatusCode::BAD_REQUEST, err.to_string()));
		}
	};

	debug!(event = event.kind(), "ingest event accepted");
	state.apply(event);
	Ok(respond(StatusCode::ACCEPTED, Bytes::new()))
}
