#![forbid(unsafe_code)]

mod collab;
mod config;
mod server;
mod util;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, anyhow};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::collab::{Collaborators, MemoryStore};
use crate::server::auth::HmacTokenVerifier;
use crate::server::connection::{ConnectionSettings, serve};
use crate::server::health::{HealthState, spawn_health_server};
use crate::server::heartbeat::HeartbeatMonitor;
use crate::server::hub::Hub;
use crate::server::ingest::{IngestState, spawn_ingest_server};
use crate::util::endpoint::BindEndpoint;

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: chathub_server [--bind ws://host:port[/path]] [--config path]\n\
\n\
Options:\n\
\t--bind     Bind endpoint (default: ws://127.0.0.1:18300)\n\
\t          Format: ws://host:port[/path]; a path overrides server.ws_path\n\
\t--config   Config file (default: ~/.chathub/config.toml)\n\
\t--help     Show this help\n\
"
	);
	std::process::exit(2)
}

struct Args {
	bind: SocketAddr,
	ws_path: Option<String>,
	config_path: Option<PathBuf>,
}

fn parse_args() -> Args {
	let mut bind_endpoint = "ws://127.0.0.1:18300".to_string();
	let mut config_path = None;

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"--bind" | "--listen" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if v.trim().is_empty() {
					eprintln!("--bind must be non-empty (expected ws://host:port)");
					usage_and_exit();
				}
				bind_endpoint = v;
			}
			"--config" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				config_path = Some(PathBuf::from(v));
			}
			other => {
				eprintln!("Unknown argument: {other}");
				usage_and_exit();
			}
		}
	}

	let endpoint = bind_endpoint.parse::<BindEndpoint>().unwrap_or_else(|e| {
		eprintln!("{e}");
		usage_and_exit();
	});

	Args {
		bind: endpoint.addr,
		ws_path: endpoint.path,
		config_path,
	}
}

fn init_tracing() {
	let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,chathub_server=debug".to_string());

	let otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
		.ok()
		.map(|v| v.trim().to_string())
		.filter(|v| !v.is_empty());
	let base = tracing_subscriber::registry()
		.with(tracing_subscriber::EnvFilter::new(filter))
		.with(tracing_subscriber::fmt::layer().with_target(false));

	if let Some(endpoint) = otlp_endpoint {
		use opentelemetry::global;
		use opentelemetry::trace::TracerProvider as _;
		use opentelemetry_otlp::WithExportConfig;

		match opentelemetry_otlp::SpanExporter::builder()
			.with_tonic()
			.with_endpoint(endpoint.clone())
			.build()
		{
			Ok(exporter) => {
				let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
					.with_batch_exporter(exporter)
					.build();
				let tracer = tracer_provider.tracer("chathub_server");
				global::set_tracer_provider(tracer_provider);

				let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
				base.with(otel_layer).init();
				info!(endpoint = %endpoint, "otlp tracing enabled");
			}
			Err(e) => {
				base.init();
				warn!(error = %e, "failed to initialize otlp tracing");
			}
		}
	} else {
		base.init();
	}
}

fn init_metrics(bind: Option<&str>) {
	let Some(bind) = bind else {
		return;
	};

	match bind.parse::<SocketAddr>() {
		Ok(addr) => {
			if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new()
				.with_http_listener(addr)
				.install()
			{
				warn!(error = %e, "failed to start metrics exporter");
			} else {
				info!(%addr, "metrics exporter listening");
			}
		}
		Err(e) => {
			warn!(error = %e, %bind, "invalid metrics bind address (expected host:port)");
		}
	}
}

fn parse_bind(name: &str, bind: &str) -> Option<SocketAddr> {
	match bind.parse::<SocketAddr>() {
		Ok(addr) => Some(addr),
		Err(e) => {
			warn!(error = %e, %bind, "invalid {name} bind address (expected host:port)");
			None
		}
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_tracing();

	let args = parse_args();

	let config_path = match args.config_path {
		Some(path) => path,
		None => crate::config::default_config_path()?,
	};
	let mut server_cfg = crate::config::load_server_config_from_path(&config_path)?;
	info!(path = %config_path.display(), "loaded server config (toml + env overrides)");
	if let Some(path) = args.ws_path {
		server_cfg.server.ws_path = path;
	}

	init_metrics(server_cfg.server.metrics_bind.as_deref());

	let secret = server_cfg
		.server
		.auth_hmac_secret
		.clone()
		.ok_or_else(|| anyhow!("server.auth_hmac_secret is required (or set CHATHUB_SERVER_AUTH_HMAC_SECRET)"))?;

	let store = Arc::new(MemoryStore::new());
	let collab = Collaborators::in_memory(Arc::new(HmacTokenVerifier::new(secret)), Arc::clone(&store));
	let hub = Hub::new(server_cfg.server.hub_config(), collab);

	let _heartbeat = HeartbeatMonitor::spawn(hub.clone(), hub.config().heartbeat_interval);

	let health_state = HealthState::new();
	if let Some(addr) = server_cfg.server.health_bind.as_deref().and_then(|b| parse_bind("health", b)) {
		let addr = spawn_health_server(addr, health_state.clone(), hub.clone()).await?;
		info!(%addr, "health server listening");
	}

	if let Some(addr) = server_cfg.server.ingest_bind.as_deref().and_then(|b| parse_bind("ingest", b)) {
		match server_cfg.server.ingest_token.clone() {
			Some(token) => {
				let state = IngestState {
					token,
					store: Arc::clone(&store),
					gateway: hub.gateway(),
				};
				let addr = spawn_ingest_server(addr, state).await?;
				info!(%addr, "ingest server listening");
			}
			None => warn!("ingest_bind set without ingest_token; ingest listener disabled"),
		}
	}

	let listener = TcpListener::bind(args.bind)
		.await
		.with_context(|| format!("bind websocket listener on {}", args.bind))?;
	info!(
		bind = %args.bind,
		ws_path = %server_cfg.server.ws_path,
		heartbeat_secs = server_cfg.server.heartbeat_interval.as_secs(),
		"chathub_server: websocket endpoint ready"
	);

	health_state.mark_ready();

	let settings = ConnectionSettings {
		ws_path: server_cfg.server.ws_path.clone(),
		write_timeout: hub.config().heartbeat_interval,
	};
	serve(listener, hub, settings).await;

	Ok(())
}
