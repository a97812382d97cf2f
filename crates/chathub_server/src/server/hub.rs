#![forbid(unsafe_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chathub_domain::{ChatId, ConnId, UserId};
use chathub_protocol::{DEFAULT_MAX_FRAME_SIZE, ServerFrame};
use chrono::Utc;
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::collab::{CollaboratorError, Collaborators};
use crate::server::presence::PresenceTracker;
use crate::server::registry::{CloseReason, Outbound, Registry};
use crate::server::topics::TopicIndex;

/// Configuration for `Hub`.
#[derive(Debug, Clone)]
pub struct HubConfig {
	/// Text of the `welcome` frame sent on open.
	pub welcome_text: String,

	/// Maximum number of queued outbound items per connection.
	pub outbound_queue_capacity: usize,

	pub max_frame_bytes: usize,

	pub heartbeat_interval: Duration,
}

impl Default for HubConfig {
	fn default() -> Self {
		Self {
			welcome_text: "Welcome to chathub".to_string(),
			outbound_queue_capacity: 1024,
			max_frame_bytes: DEFAULT_MAX_FRAME_SIZE,
			heartbeat_interval: Duration::from_secs(30),
		}
	}
}

/// Why a `join_chat` was refused. The display text is the wire `reason`.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum JoinDenial {
	#[error("Invalid chat id")]
	InvalidChatId,
	#[error("Chat not found")]
	ChatNotFound,
	#[error("Not a chat member")]
	NotAMember,
	#[error("Membership lookup failed")]
	LookupFailed,
}

/// Point-in-time counters, served on `/stats`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HubStats {
	pub connections: usize,
	pub authenticated: usize,
	pub online_users: usize,
	pub topics: usize,
}

/// All process-wide hub state, guarded by one lock.
#[derive(Debug, Default)]
pub(crate) struct HubState {
	pub registry: Registry,
	pub topics: TopicIndex,
	pub presence: PresenceTracker,
}

impl HubState {
	/// Send to every open subscriber of `chat`, optionally skipping all of one user's connections.
	pub fn publish(&self, chat: &ChatId, frame: ServerFrame, except: Option<&UserId>) -> usize {
		let frame = Arc::new(frame);
		self.topics
			.subscribers(chat)
			.into_iter()
			.filter_map(|conn| self.registry.get(conn))
			.filter(|entry| except.is_none_or(|u| !entry.is_user(u)))
			.filter(|entry| entry.send(Arc::clone(&frame)))
			.count()
	}
}

struct Shared {
	state: Mutex<HubState>,
	collab: Collaborators,
	cfg: HubConfig,
	next_conn_id: AtomicU64,
}

/// The real-time hub: one explicit service object shared by every connection task.
///
/// The state lock is never held across an `.await`. Handlers that call a
/// collaborator re-check the connection afterwards before touching shared state.
#[derive(Clone)]
pub struct Hub {
	inner: Arc<Shared>,
}

impl Hub {
	pub fn new(cfg: HubConfig, collab: Collaborators) -> Self {
		Self {
			inner: Arc::new(Shared {
				state: Mutex::new(HubState::default()),
				collab,
				cfg,
				next_conn_id: AtomicU64::new(1),
			}),
		}
	}

	pub fn config(&self) -> &HubConfig {
		&self.inner.cfg
	}

	pub(crate) fn collab(&self) -> &Collaborators {
		&self.inner.collab
	}

	pub(crate) fn state(&self) -> MutexGuard<'_, HubState> {
		self.inner.state.lock()
	}

	/// Register a new transport session and queue its `welcome` frame.
	pub fn open(&self) -> (ConnId, mpsc::Receiver<Outbound>) {
		let conn = ConnId(self.inner.next_conn_id.fetch_add(1, Ordering::Relaxed));
		let (tx, rx) = mpsc::channel(self.inner.cfg.outbound_queue_capacity.max(1));

		let mut state = self.state();
		state.registry.insert(conn, tx);
		if let Some(entry) = state.registry.get(conn) {
			entry.send_frame(ServerFrame::Welcome {
				text: self.inner.cfg.welcome_text.clone(),
			});
		}

		metrics::counter!("chathub_server_connections_total").increment(1);
		metrics::gauge!("chathub_server_connections_active").set(state.registry.len() as f64);
		debug!(conn_id = %conn, "connection opened");

		(conn, rx)
	}

	/// Tear a connection down. Safe to call more than once; only the first call has effect.
	pub async fn close(&self, conn: ConnId, reason: CloseReason) {
		let offline = {
			let mut guard = self.state();
			let state = &mut *guard;
			let Some(entry) = state.registry.remove(conn) else {
				return;
			};
			if reason.is_forced() {
				entry.close(reason);
			}

			let left = state.topics.remove_conn(conn);
			let offline = entry.user.clone().filter(|user| state.presence.mark_offline(user));
			if let Some(user) = &offline {
				state
					.registry
					.broadcast_authenticated(ServerFrame::PresenceOffline { user_id: user.clone() });
			}

			metrics::gauge!("chathub_server_connections_active").set(state.registry.len() as f64);
			info!(
				conn_id = %conn,
				user_id = ?entry.user,
				reason = reason.as_str(),
				chats = left.len(),
				"connection closed"
			);
			offline
		};

		if let Some(user) = offline {
			self.persist_last_seen(&user).await;
		}
	}

	/// Queue an optional last frame, then force the connection closed.
	pub async fn terminate(&self, conn: ConnId, reason: CloseReason, last_frame: Option<ServerFrame>) {
		if let Some(frame) = last_frame
			&& let Some(entry) = self.state().registry.get(conn)
		{
			entry.send_frame(frame);
		}
		self.close(conn, reason).await;
	}

	/// Fan out to every open subscriber of `chat`; returns how many accepted the frame.
	pub fn publish(&self, chat: &ChatId, frame: ServerFrame) -> usize {
		self.state().publish(chat, frame, None)
	}

	/// Like `publish`, but skips every connection bound to `user`.
	pub fn publish_except(&self, chat: &ChatId, user: &UserId, frame: ServerFrame) -> usize {
		self.state().publish(chat, frame, Some(user))
	}

	/// Record a pong.
	pub fn mark_alive(&self, conn: ConnId) {
		if let Some(entry) = self.state().registry.get_mut(conn) {
			entry.alive = true;
		}
	}

	pub fn user_of(&self, conn: ConnId) -> Option<UserId> {
		self.state().registry.get(conn).and_then(|e| e.user.clone())
	}

	#[cfg(test)]
	pub fn is_open(&self, conn: ConnId) -> bool {
		self.state().registry.get(conn).is_some()
	}

	#[cfg(test)]
	pub fn subscriptions(&self, conn: ConnId) -> std::collections::HashSet<ChatId> {
		self.state().topics.chats_for_conn(conn)
	}

	pub fn stats(&self) -> HubStats {
		let state = self.state();
		HubStats {
			connections: state.registry.len(),
			authenticated: state.registry.authenticated_count(),
			online_users: state.presence.online_count(),
			topics: state.topics.topic_count(),
		}
	}

	/// Verify `token` and bind (or rebind) the connection's identity.
	pub(crate) async fn authenticate(&self, conn: ConnId, token: String) {
		let user = match self.inner.collab.auth.verify(&token).await {
			Ok(user) => user,
			Err(e) => {
				metrics::counter!("chathub_server_auth_failed_total").increment(1);
				warn!(conn_id = %conn, error = %e, "authentication failed");
				let frame = ServerFrame::AuthError {
					message: "Invalid or expired token".to_string(),
				};
				self.terminate(conn, CloseReason::AuthFailed, Some(frame)).await;
				return;
			}
		};

		let went_offline = {
			let mut guard = self.state();
			let state = &mut *guard;

			let Some(previous) = state.registry.get(conn).map(|e| e.user.clone()) else {
				debug!(conn_id = %conn, "connection closed during token verification");
				return;
			};

			if previous.as_ref() == Some(&user) {
				if let Some(entry) = state.registry.get(conn) {
					entry.send_frame(ServerFrame::AuthOk { user_id: user });
				}
				return;
			}

			let mut went_offline = None;
			if let Some(prev) = previous {
				let left = state.topics.remove_conn(conn);
				if let Some(entry) = state.registry.get_mut(conn) {
					entry.acks.clear();
					for chat in left {
						entry.send_frame(ServerFrame::LeftChat {
							chat_id: chat.into_string(),
						});
					}
				}
				if state.presence.mark_offline(&prev) {
					state
						.registry
						.broadcast_authenticated(ServerFrame::PresenceOffline { user_id: prev.clone() });
					went_offline = Some(prev.clone());
				}
				info!(conn_id = %conn, from = %prev, to = %user, "connection re-authenticated");
			}

			let snapshot = state.presence.snapshot();
			if let Some(entry) = state.registry.get_mut(conn) {
				entry.user = Some(user.clone());
				entry.send_frame(ServerFrame::AuthOk { user_id: user.clone() });
				entry.send_frame(ServerFrame::PresenceState {
					online_user_ids: snapshot,
				});
			}

			if state.presence.mark_online(&user) {
				state
					.registry
					.broadcast_authenticated(ServerFrame::PresenceOnline { user_id: user.clone() });
			}

			metrics::counter!("chathub_server_auth_ok_total").increment(1);
			info!(conn_id = %conn, user_id = %user, "authenticated");
			went_offline
		};

		if let Some(user) = went_offline {
			self.persist_last_seen(&user).await;
		}
	}

	pub(crate) async fn join_chat(&self, conn: ConnId, raw_chat_id: String) {
		let chat = match ChatId::new(raw_chat_id.clone()) {
			Ok(chat) => chat,
			Err(_) => {
				self.deny_join(conn, raw_chat_id, JoinDenial::InvalidChatId);
				return;
			}
		};
		let Some(user) = self.user_of(conn) else {
			return;
		};

		let denial = match self.inner.collab.chats.members_of(&chat).await {
			Ok(members) if members.contains(&user) => None,
			Ok(_) => Some(JoinDenial::NotAMember),
			Err(CollaboratorError::NotFound(_)) => Some(JoinDenial::ChatNotFound),
			Err(e) => {
				warn!(conn_id = %conn, chat_id = %chat, error = %e, "membership lookup failed");
				Some(JoinDenial::LookupFailed)
			}
		};

		let mut guard = self.state();
		let state = &mut *guard;
		if !state.registry.get(conn).is_some_and(|e| e.is_user(&user)) {
			debug!(conn_id = %conn, chat_id = %chat, "connection changed during membership lookup; dropping join");
			return;
		}

		if let Some(denial) = denial {
			drop(guard);
			self.deny_join(conn, chat.into_string(), denial);
			return;
		}

		state.topics.subscribe(conn, chat.clone());
		if let Some(entry) = state.registry.get(conn) {
			entry.send_frame(ServerFrame::JoinedChat { chat_id: chat.clone() });
		}
		metrics::counter!("chathub_server_joins_ok_total").increment(1);
		debug!(conn_id = %conn, user_id = %user, chat_id = %chat, "joined chat");
	}

	fn deny_join(&self, conn: ConnId, chat_id: String, denial: JoinDenial) {
		metrics::counter!("chathub_server_joins_denied_total").increment(1);
		debug!(conn_id = %conn, chat_id = %chat_id, reason = %denial, "join denied");
		if let Some(entry) = self.state().registry.get(conn) {
			entry.send_frame(ServerFrame::JoinDenied {
				chat_id,
				reason: denial.to_string(),
			});
		}
	}

	/// Idempotent; always answers `left_chat`.
	pub(crate) fn leave_chat(&self, conn: ConnId, raw_chat_id: String) {
		let mut guard = self.state();
		let state = &mut *guard;
		if let Ok(chat) = ChatId::new(raw_chat_id.clone()) {
			state.topics.unsubscribe(conn, &chat);
		}
		if let Some(entry) = state.registry.get(conn) {
			entry.send_frame(ServerFrame::LeftChat { chat_id: raw_chat_id });
		}
	}

	/// Relay a typing indicator to the chat's other users. Requires a subscription.
	pub(crate) fn typing(&self, conn: ConnId, raw_chat_id: String, started: bool) {
		let Ok(chat) = ChatId::new(raw_chat_id) else {
			return;
		};

		let user = {
			let state = self.state();
			let Some(user) = state.registry.get(conn).and_then(|e| e.user.clone()) else {
				return;
			};
			if !state.topics.is_subscribed(conn, &chat) {
				debug!(conn_id = %conn, chat_id = %chat, "typing on unsubscribed chat dropped");
				return;
			}
			user
		};

		let frame = if started {
			ServerFrame::TypingStart {
				chat_id: chat.clone(),
				user_id: user.clone(),
			}
		} else {
			ServerFrame::TypingStop {
				chat_id: chat.clone(),
				user_id: user.clone(),
			}
		};
		self.publish_except(&chat, &user, frame);
	}

	async fn persist_last_seen(&self, user: &UserId) {
		if let Err(e) = self.inner.collab.users.set_last_seen(user, Utc::now()).await {
			warn!(user_id = %user, error = %e, "failed to persist last-seen");
		}
	}
}
