#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context as _;
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::{CONTENT_TYPE, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::warn;

use crate::server::hub::Hub;

#[derive(Clone, Default)]
pub struct HealthState {
	ready: Arc<AtomicBool>,
}

impl HealthState {
	pub fn new() -> Self {
		Self {
			ready: Arc::new(AtomicBool::new(false)),
		}
	}

	pub fn mark_ready(&self) {
		self.ready.store(true, Ordering::Relaxed);
	}

	pub fn is_ready(&self) -> bool {
		self.ready.load(Ordering::Relaxed)
	}
}

pub(crate) fn respond(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
	let mut resp = Response::new(Full::new(body.into()));
	*resp.status_mut() = status;
	resp
}

pub(crate) fn respond_json(status: StatusCode, body: Vec<u8>) -> Response<Full<Bytes>> {
	let mut resp = respond(status, body);
	resp.headers_mut()
		.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
	resp
}

/// Bind the health listener and serve it in the background; returns the bound address.
pub async fn spawn_health_server(bind: SocketAddr, state: HealthState, hub: Hub) -> anyhow::Result<SocketAddr> {
	let listener = TcpListener::bind(bind)
		.await
		.with_context(|| format!("bind health listener on {bind}"))?;
	let local = listener.local_addr().context("health listener address")?;

	tokio::spawn(async move {
		if let Err(err) = run_health_server(listener, state, hub).await {
			warn!(error = %err, "health server stopped");
		}
	});
	Ok(local)
}

async fn run_health_server(listener: TcpListener, state: HealthState, hub: Hub) -> anyhow::Result<()> {
	loop {
		let (stream, _addr) = listener.accept().await?;
		let io = TokioIo::new(stream);
		let state = state.clone();
		let hub = hub.clone();
		tokio::spawn(async move {
			let service = service_fn(move |req| handle_health(req, state.clone(), hub.clone()));
			if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
				warn!(error = %err, "health connection error");
			}
		});
	}
}

async fn handle_health(
	req: Request<Incoming>,
	state: HealthState,
	hub: Hub,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
	if req.method() != Method::GET {
		return Ok(respond(StatusCode::METHOD_NOT_ALLOWED, Bytes::new()));
	}

	let resp = match req.uri().path() {
		"/healthz" => respond(StatusCode::OK, Bytes::from_static(b"ok")),
		"/readyz" if state.is_ready() => respond(StatusCode::OK, Bytes::from_static(b"ready")),
		"/readyz" => respond(StatusCode::SERVICE_UNAVAILABLE, Bytes::from_static(b"not-ready")),
		"/stats" => match serde_json::to_vec(&hub.stats()) {
			Ok(body) => respond_json(StatusCode::OK, body),
			Err(e) => {
				warn!(error = %e, "failed to encode hub stats");
				respond(StatusCode::INTERNAL_SERVER_ERROR, Bytes::new())
			}
		},
		_ => respond(StatusCode::NOT_FOUND, Bytes::new()),
	};
	Ok(resp)
}
