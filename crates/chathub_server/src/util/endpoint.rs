#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EndpointError {
	#[error("expected ws://host:port[/path], got {0:?}")]
	Scheme(String),
	#[error("query and fragment are not allowed in a bind endpoint: {0:?}")]
	QueryOrFragment(String),
	#[error("missing :port in {0:?}")]
	MissingPort(String),
	#[error("invalid port (expected 1..=65535) in {0:?}")]
	Port(String),
	#[error("IPv6 hosts must be bracketed, like ws://[::1]:18300")]
	UnbracketedIpv6,
	#[error("bind host must be an IP literal (DNS names are not resolved): {0:?}")]
	NotIpLiteral(String),
}

/// Listen address from `--bind ws://host:port[/path]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindEndpoint {
	pub addr: SocketAddr,
	/// Upgrade path without trailing slashes; `None` for a bare or `/` path.
	pub path: Option<String>,
}

impl FromStr for BindEndpoint {
	type Err = EndpointError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let s = s.trim();
		let rest = s
			.strip_prefix("ws://")
			.ok_or_else(|| EndpointError::Scheme(s.to_string()))?;
		if rest.contains(['?', '#']) {
			return Err(EndpointError::QueryOrFragment(s.to_string()));
		}

		let (authority, path) = rest.split_at(rest.find('/').unwrap_or(rest.len()));
		let (host, port) = authority
			.rsplit_once(':')
			.ok_or_else(|| EndpointError::MissingPort(s.to_string()))?;
		if host.contains(':') && !(host.starts_with('[') && host.ends_with(']')) {
			return Err(EndpointError::UnbracketedIpv6);
		}

		let port = port
			.parse::<u16>()
			.ok()
			.filter(|p| *p != 0)
			.ok_or_else(|| EndpointError::Port(s.to_string()))?;
		let addr = format!("{host}:{port}")
			.parse::<SocketAddr>()
			.map_err(|_| EndpointError::NotIpLiteral(host.to_string()))?;

		let path = path.trim_end_matches('/');
		Ok(Self {
			addr,
			path: (!path.is_empty()).then(|| path.to_string()),
		})
	}
}
