#![forbid(unsafe_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chathub_domain::{ConnId, UserId};
use chathub_protocol::ServerFrame;
use tokio::sync::mpsc;

use crate::server::acks::AckDedup;

/// Why a connection left the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
	/// Client sent a close frame or the stream ended.
	ClientClosed,
	/// Transport read/write failed.
	TransportError,
	/// No pong since the previous heartbeat sweep.
	HeartbeatTimeout,
	/// Token verification failed.
	AuthFailed,
	/// Non-auth frame before authentication.
	PolicyViolation,
}

impl CloseReason {
	/// Whether the hub (rather than the peer) ended the connection.
	pub const fn is_forced(self) -> bool {
		matches!(self, Self::HeartbeatTimeout | Self::AuthFailed | Self::PolicyViolation)
	}

	pub const fn as_str(self) -> &'static str {
		match self {
			Self::ClientClosed => "client_closed",
			Self::TransportError => "transport_error",
			Self::HeartbeatTimeout => "heartbeat_timeout",
			Self::AuthFailed => "auth_failed",
			Self::PolicyViolation => "policy_violation",
		}
	}
}

/// Instructions for a connection's transport task.
#[derive(Debug, Clone)]
pub enum Outbound {
	Frame(Arc<ServerFrame>),
	Ping,
	/// Send a close frame and stop.
	Close(CloseReason),
}

/// Hub-side state of one live connection.
#[derive(Debug)]
pub struct ConnectionEntry {
	pub user: Option<UserId>,
	/// Set on open and on every pong; cleared by each heartbeat sweep.
	pub alive: bool,
	pub acks: AckDedup,
	tx: mpsc::Sender<Outbound>,
}

impl ConnectionEntry {
	pub fn is_authenticated(&self) -> bool {
		self.user.is_some()
	}

	pub fn is_user(&self, user: &UserId) -> bool {
		self.user.as_ref() == Some(user)
	}

	/// Queue a frame; a full or closed queue drops it.
	pub fn send(&self, frame: Arc<ServerFrame>) -> bool {
		match self.tx.try_send(Outbound::Frame(frame)) {
			Ok(()) => {
				metrics::counter!("chathub_server_frames_out_total").increment(1);
				true
			}
			Err(mpsc::error::TrySendError::Full(_)) => {
				metrics::counter!("chathub_server_outbound_dropped_total").increment(1);
				false
			}
			Err(mpsc::error::TrySendError::Closed(_)) => false,
		}
	}

	pub fn send_frame(&self, frame: ServerFrame) -> bool {
		self.send(Arc::new(frame))
	}

	pub(crate) fn ping(&self) {
		let _ = self.tx.try_send(Outbound::Ping);
	}

	pub(crate) fn close(&self, reason: CloseReason) {
		let _ = self.tx.try_send(Outbound::Close(reason));
	}
}

/// Every live connection, keyed by handle.
#[derive(Debug, Default)]
pub struct Registry {
	conns: HashMap<ConnId, ConnectionEntry>,
}

impl Registry {
	pub fn insert(&mut self, conn: ConnId, tx: mpsc::Sender<Outbound>) {
		self.conns.insert(
			conn,
			ConnectionEntry {
				user: None,
				alive: true,
				acks: AckDedup::default(),
				tx,
			},
		);
	}

	pub fn remove(&mut self, conn: ConnId) -> Option<ConnectionEntry> {
		self.conns.remove(&conn)
	}

	pub fn get(&self, conn: ConnId) -> Option<&ConnectionEntry> {
		self.conns.get(&conn)
	}

	pub fn get_mut(&mut self, conn: ConnId) -> Option<&mut ConnectionEntry> {
		self.conns.get_mut(&conn)
	}

	pub fn len(&self) -> usize {
		self.conns.len()
	}

	pub fn iter_mut(&mut self) -> impl Iterator<Item = (ConnId, &mut ConnectionEntry)> {
		self.conns.iter_mut().map(|(id, e)| (*id, e))
	}

	pub fn authenticated_count(&self) -> usize {
		self.conns.values().filter(|e| e.is_authenticated()).count()
	}

	/// Send to every authenticated connection; returns how many accepted it.
	pub fn broadcast_authenticated(&self, frame: ServerFrame) -> usize {
		let frame = Arc::new(frame);
		self.conns
			.values()
			.filter(|e| e.is_authenticated())
			.filter(|e| e.send(Arc::clone(&frame)))
			.count()
	}

	/// Send to every authenticated connection bound to one of `users`.
	pub fn send_to_users(&self, users: &HashSet<UserId>, frame: ServerFrame) -> usize {
		let frame = Arc::new(frame);
		self.conns
			.values()
			.filter(|e| e.user.as_ref().is_some_and(|u| users.contains(u)))
			.filter(|e| e.send(Arc::clone(&frame)))
			.count()
	}
}
