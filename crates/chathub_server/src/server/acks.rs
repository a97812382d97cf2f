#![forbid(unsafe_code)]

use std::collections::HashSet;

use chathub_domain::{AckKind, ChatId, ConnId, MessageId, UserId};
use chathub_protocol::ServerFrame;
use tracing::{debug, warn};

use crate::server::hub::Hub;
use crate::util::time::now_rfc3339;

/// Per-connection record of acks already processed, one set per kind.
#[derive(Debug, Default)]
pub struct AckDedup {
	delivered: HashSet<(ChatId, MessageId)>,
	read: HashSet<(ChatId, MessageId)>,
}

impl AckDedup {
	#[cfg(test)]
	fn set(&self, kind: AckKind) -> &HashSet<(ChatId, MessageId)> {
		match kind {
			AckKind::Delivered => &self.delivered,
			AckKind::Read => &self.read,
		}
	}

	fn set_mut(&mut self, kind: AckKind) -> &mut HashSet<(ChatId, MessageId)> {
		match kind {
			AckKind::Delivered => &mut self.delivered,
			AckKind::Read => &mut self.read,
		}
	}

	/// Record the key; false if this connection already saw it.
	pub fn first_seen(&mut self, kind: AckKind, chat: &ChatId, message: &MessageId) -> bool {
		self.set_mut(kind).insert((chat.clone(), message.clone()))
	}

	#[cfg(test)]
	pub fn contains(&self, kind: AckKind, chat: &ChatId, message: &MessageId) -> bool {
		self.set(kind).contains(&(chat.clone(), message.clone()))
	}

	#[cfg(test)]
	pub fn len(&self, kind: AckKind) -> usize {
		self.set(kind).len()
	}

	pub fn clear(&mut self) {
		self.delivered.clear();
		self.read.clear();
	}
}

fn single_ack_frame(kind: AckKind, chat_id: ChatId, message_id: MessageId, user: UserId) -> ServerFrame {
	match kind {
		AckKind::Delivered => ServerFrame::MessageDelivered {
			chat_id,
			message_id,
			delivered_to: user,
		},
		AckKind::Read => ServerFrame::MessageRead {
			chat_id,
			message_id,
			read_by: user,
			read_at: now_rfc3339(),
		},
	}
}

fn batch_ack_frame(kind: AckKind, chat_id: ChatId, message_ids: Vec<MessageId>, user: UserId) -> ServerFrame {
	match kind {
		AckKind::Delivered => ServerFrame::MessagesDelivered {
			chat_id,
			message_ids,
			delivered_to: user,
		},
		AckKind::Read => ServerFrame::MessagesRead {
			chat_id,
			message_ids,
			read_by: user,
			read_at: now_rfc3339(),
		},
	}
}

impl Hub {
	/// Subscribed connection's user, or `None` when the ack must be dropped.
	fn acking_user(&self, conn: ConnId, chat: &ChatId) -> Option<UserId> {
		let state = self.state();
		let user = state.registry.get(conn)?.user.clone()?;
		if !state.topics.is_subscribed(conn, chat) {
			debug!(conn_id = %conn, chat_id = %chat, "ack on unsubscribed chat dropped");
			return None;
		}
		Some(user)
	}

	/// Single-message ack: dedup, persist best-effort, then broadcast.
	pub(crate) async fn ack_one(&self, conn: ConnId, kind: AckKind, raw_chat_id: String, raw_message_id: String) {
		let (Ok(chat), Ok(message)) = (ChatId::new(raw_chat_id), MessageId::new(raw_message_id)) else {
			metrics::counter!("chathub_server_frames_rejected_total").increment(1);
			return;
		};
		let Some(user) = self.acking_user(conn, &chat) else {
			return;
		};

		{
			let mut state = self.state();
			let Some(entry) = state.registry.get_mut(conn) else {
				return;
			};
			if !entry.acks.first_seen(kind, &chat, &message) {
				metrics::counter!("chathub_server_acks_deduplicated_total", "kind" => kind.as_str()).increment(1);
				debug!(conn_id = %conn, chat_id = %chat, message_id = %message, kind = %kind, "duplicate ack dropped");
				return;
			}
		}

		let messages = &self.collab().messages;
		let persisted = match kind {
			AckKind::Delivered => messages.mark_delivered(&message, &user).await,
			AckKind::Read => messages.mark_read(&message, &user).await,
		};
		match persisted {
			Ok(()) => metrics::counter!("chathub_server_acks_persisted_total", "kind" => kind.as_str()).increment(1),
			Err(e) => warn!(
				conn_id = %conn,
				chat_id = %chat,
				message_id = %message,
				kind = %kind,
				error = %e,
				"ack persistence failed; broadcasting anyway"
			),
		}

		let recipients = self.publish(&chat, single_ack_frame(kind, chat.clone(), message, user));
		debug!(conn_id = %conn, chat_id = %chat, kind = %kind, recipients, "ack published");
	}

	/// "All" ack: everything the user has not yet acked in the chat, as one batch.
	pub(crate) async fn ack_all(&self, conn: ConnId, kind: AckKind, raw_chat_id: String) {
		let Ok(chat) = ChatId::new(raw_chat_id) else {
			metrics::counter!("chathub_server_frames_rejected_total").increment(1);
			return;
		};
		let Some(user) = self.acking_user(conn, &chat) else {
			return;
		};

		let messages = &self.collab().messages;
		let pending = match messages.unacked(&chat, &user, kind).await {
			Ok(ids) => ids,
			Err(e) => {
				warn!(conn_id = %conn, chat_id = %chat, kind = %kind, error = %e, "unacked lookup failed");
				return;
			}
		};
		if pending.is_empty() {
			debug!(conn_id = %conn, chat_id = %chat, kind = %kind, "nothing to ack");
			return;
		}

		if let Err(e) = messages.mark_all(kind, &pending, &user).await {
			warn!(
				conn_id = %conn,
				chat_id = %chat,
				kind = %kind,
				count = pending.len(),
				error = %e,
				"batch ack persistence failed; broadcast suppressed"
			);
			return;
		}
		metrics::counter!("chathub_server_acks_persisted_total", "kind" => kind.as_str())
			.increment(pending.len() as u64);

		{
			let mut state = self.state();
			if let Some(entry) = state.registry.get_mut(conn)
				&& entry.is_user(&user)
			{
				for id in &pending {
					entry.acks.first_seen(kind, &chat, id);
				}
			}
		}

		let count = pending.len();
		let recipients = self.publish(&chat, batch_ack_frame(kind, chat.clone(), pending, user));
		debug!(conn_id = %conn, chat_id = %chat, kind = %kind, count, recipients, "batch ack published");
	}
}
