#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, anyhow};
use chathub_domain::SecretString;
use chathub_protocol::DEFAULT_MAX_FRAME_SIZE;
use serde::Deserialize;
use tracing::{info, warn};

use crate::server::hub::HubConfig;

pub const DEFAULT_WS_PATH: &str = "/ws";
pub const DEFAULT_WELCOME_TEXT: &str = "Welcome to chathub";
pub const DEFAULT_OUTBOUND_QUEUE_CAPACITY: usize = 1024;
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Default config path: `~/.chathub/config.toml`.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
	let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
	Ok(home.join(".chathub").join("config.toml"))
}

/// Load the server config from TOML (if present) and env overrides.
pub fn load_server_config_from_path(path: &Path) -> anyhow::Result<ServerConfig> {
	let file_cfg = read_toml_if_exists(path)
		.with_context(|| format!("read config from {}", path.display()))?
		.unwrap_or_default();

	let mut cfg = ServerConfig::from_file(file_cfg);

	apply_env_overrides(&mut cfg, |key| std::env::var(key).ok());

	Ok(cfg)
}

/// Server config (v1).
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
	pub server: ServerSettings,
}

/// Settings for the hub and its listeners.
#[derive(Debug, Clone)]
pub struct ServerSettings {
	/// WebSocket upgrade path.
	pub ws_path: String,
	pub welcome_text: String,
	/// Inbound text frames above this size are dropped.
	pub max_frame_bytes: usize,
	pub outbound_queue_capacity: usize,
	pub heartbeat_interval: Duration,
	/// HMAC secret for stateless access tokens.
	pub auth_hmac_secret: Option<SecretString>,
	/// Optional metrics exporter bind address (host:port).
	pub metrics_bind: Option<String>,
	/// Optional health/readiness HTTP bind address (host:port).
	pub health_bind: Option<String>,
	/// Optional REST-collaborator ingest bind address (host:port).
	pub ingest_bind: Option<String>,
	/// Bearer token required on ingest requests.
	pub ingest_token: Option<SecretString>,
}

impl Default for ServerSettings {
	fn default() -> Self {
		Self::from_file(FileServerSettings::default())
	}
}

impl ServerSettings {
	fn from_file(file: FileServerSettings) -> Self {
		Self {
			ws_path: file
				.ws_path
				.filter(|s| !s.trim().is_empty())
				.map(|s| normalize_ws_path(&s))
				.unwrap_or_else(|| DEFAULT_WS_PATH.to_string()),
			welcome_text: file
				.welcome_text
				.unwrap_or_else(|| DEFAULT_WELCOME_TEXT.to_string()),
			max_frame_bytes: file
				.max_frame_bytes
				.filter(|v| *v > 0)
				.unwrap_or(DEFAULT_MAX_FRAME_SIZE),
			outbound_queue_capacity: file
				.outbound_queue_capacity
				.filter(|v| *v > 0)
				.unwrap_or(DEFAULT_OUTBOUND_QUEUE_CAPACITY),
			heartbeat_interval: Duration::from_secs(
				file.heartbeat_interval_secs
					.filter(|v| *v > 0)
					.unwrap_or(DEFAULT_HEARTBEAT_INTERVAL_SECS),
			),
			auth_hmac_secret: file
				.auth_hmac_secret
				.filter(|s| !s.trim().is_empty())
				.map(SecretString::new),
			metrics_bind: file.metrics_bind.filter(|s| !s.trim().is_empty()),
			health_bind: file.health_bind.filter(|s| !s.trim().is_empty()),
			ingest_bind: file.ingest_bind.filter(|s| !s.trim().is_empty()),
			ingest_token: file
				.ingest_token
				.filter(|s| !s.trim().is_empty())
				.map(SecretString::new),
		}
	}

	pub fn hub_config(&self) -> HubConfig {
		HubConfig {
			welcome_text: self.welcome_text.clone(),
			outbound_queue_capacity: self.outbound_queue_capacity,
			max_frame_bytes: self.max_frame_bytes,
			heartbeat_interval: self.heartbeat_interval,
		}
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
	#[serde(default)]
	server: FileServerSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileServerSettings {
	ws_path: Option<String>,
	welcome_text: Option<String>,
	max_frame_bytes: Option<usize>,
	outbound_queue_capacity: Option<usize>,
	heartbeat_interval_secs: Option<u64>,
	auth_hmac_secret: Option<String>,
	metrics_bind: Option<String>,
	health_bind: Option<String>,
	ingest_bind: Option<String>,
	ingest_token: Option<String>,
}

impl ServerConfig {
	fn from_file(file: FileConfig) -> Self {
		Self {
			server: ServerSettings::from_file(file.server),
		}
	}
}

fn normalize_ws_path(path: &str) -> String {
	let path = path.trim();
	if path.starts_with('/') {
		path.to_string()
	} else {
		format!("/{path}")
	}
}

fn read_toml_if_exists(path: &Path) -> anyhow::Result<Option<FileConfig>> {
	match fs::read_to_string(path) {
		Ok(s) => {
			let cfg: FileConfig = toml::from_str(&s).context("parse TOML")?;
			Ok(Some(cfg))
		}
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(anyhow!(e).context("read config file")),
	}
}

fn env_string(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
	env(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn env_positive<T: std::str::FromStr + PartialOrd + Default>(
	env: &impl Fn(&str) -> Option<String>,
	key: &str,
) -> Option<T> {
	let raw = env_string(env, key)?;
	match raw.parse::<T>() {
		Ok(v) if v > T::default() => Some(v),
		_ => {
			warn!(key, value = %raw, "ignoring invalid env override (expected a positive integer)");
			None
		}
	}
}

fn apply_env_overrides(cfg: &mut ServerConfig, env: impl Fn(&str) -> Option<String>) {
	if let Some(v) = env_string(&env, "CHATHUB_SERVER_AUTH_HMAC_SECRET") {
		cfg.server.auth_hmac_secret = Some(SecretString::new(v));
		info!("server auth: auth_hmac_secret overridden by env");
	}

	if let Some(v) = env_string(&env, "CHATHUB_WS_PATH") {
		cfg.server.ws_path = normalize_ws_path(&v);
		info!(ws_path = %cfg.server.ws_path, "server config: ws_path overridden by env");
	}

	if let Some(secs) = env_positive::<u64>(&env, "CHATHUB_HEARTBEAT_INTERVAL_SECS") {
		cfg.server.heartbeat_interval = Duration::from_secs(secs);
		info!(secs, "server config: heartbeat_interval overridden by env");
	}

	if let Some(capacity) = env_positive::<usize>(&env, "CHATHUB_OUTBOUND_QUEUE_CAPACITY") {
		cfg.server.outbound_queue_capacity = capacity;
		info!(capacity, "server config: outbound_queue_capacity overridden by env");
	}

	if let Some(bytes) = env_positive::<usize>(&env, "CHATHUB_MAX_FRAME_BYTES") {
		cfg.server.max_frame_bytes = bytes;
		info!(bytes, "server config: max_frame_bytes overridden by env");
	}

	if let Some(v) = env_string(&env, "CHATHUB_METRICS_BIND") {
		cfg.server.metrics_bind = Some(v);
		info!("server config: metrics_bind overridden by env");
	}

	if let Some(v) = env_string(&env, "CHATHUB_HEALTH_BIND") {
		cfg.server.health_bind = Some(v);
		info!("server config: health_bind overridden by env");
	}

	if let Some(v) = env_string(&env, "CHATHUB_INGEST_BIND") {
		cfg.server.ingest_bind = Some(v);
		info!("server config: ingest_bind overridden by env");
	}

	if let Some(v) = env_string(&env, "CHATHUB_INGEST_TOKEN") {
		cfg.server.ingest_token = Some(SecretString::new(v));
		info!("server config: ingest_token overridden by env");
	}

	if cfg.server.auth_hmac_secret.is_none() {
		warn!("server auth: no auth_hmac_secret configured; every auth frame will be rejected");
	}
}

#[cfg(test)]
mod tests {
	use std::collections::HashMap;

	use super::*;

	fn parse(toml_text: &str) -> ServerConfig {
		ServerConfig::from_file(toml::from_str(toml_text).unwrap())
	}

	#[test]
	fn empty_file_yields_defaults() {
		let cfg = parse("");
		assert_eq!(cfg.server.ws_path, "/ws");
		assert_eq!(cfg.server.max_frame_bytes, DEFAULT_MAX_FRAME_SIZE);
		assert_eq!(cfg.server.outbound_queue_capacity, 1024);
		assert_eq!(cfg.server.heartbeat_interval, Duration::from_secs(30));
		assert!(cfg.server.auth_hmac_secret.is_none());
		assert!(cfg.server.ingest_bind.is_none());
	}

	#[test]
	fn file_values_are_read_and_blank_strings_ignored() {
		let cfg = parse(
			r#"
			[server]
			ws_path = "chat"
			heartbeat_interval_secs = 5
			auth_hmac_secret = "s3cret"
			health_bind = "  "
			outbound_queue_capacity = 0
			"#,
		);
		assert_eq!(cfg.server.ws_path, "/chat");
		assert_eq!(cfg.server.heartbeat_interval, Duration::from_secs(5));
		assert_eq!(cfg.server.auth_hmac_secret.as_ref().map(|s| s.expose()), Some("s3cret"));
		assert!(cfg.server.health_bind.is_none());
		assert_eq!(cfg.server.outbound_queue_capacity, 1024);
	}

	#[test]
	fn env_overrides_win_and_bad_numbers_are_ignored() {
		let mut cfg = parse("[server]\nheartbeat_interval_secs = 5\n");
		let env: HashMap<&str, &str> = HashMap::from([
			("CHATHUB_SERVER_AUTH_HMAC_SECRET", "from-env"),
			("CHATHUB_WS_PATH", "/live"),
			("CHATHUB_HEARTBEAT_INTERVAL_SECS", "nope"),
			("CHATHUB_MAX_FRAME_BYTES", "2048"),
			("CHATHUB_INGEST_TOKEN", " tok "),
		]);
		apply_env_overrides(&mut cfg, |k| env.get(k).map(|v| v.to_string()));

		assert_eq!(cfg.server.auth_hmac_secret.as_ref().map(|s| s.expose()), Some("from-env"));
		assert_eq!(cfg.server.ws_path, "/live");
		assert_eq!(cfg.server.heartbeat_interval, Duration::from_secs(5));
		assert_eq!(cfg.server.max_frame_bytes, 2048);
		assert_eq!(cfg.server.ingest_token.as_ref().map(|s| s.expose()), Some("tok"));
	}

	#[test]
	fn missing_file_is_not_an_error() {
		let path = std::env::temp_dir().join("chathub-config-that-does-not-exist.toml");
		assert!(read_toml_if_exists(&path).unwrap().is_none());
	}
}
