#![forbid(unsafe_code)]

use std::collections::HashSet;

use chathub_domain::{Chat, ChatUpdate, Message, UserId};
use chathub_protocol::ServerFrame;
use tracing::{debug, warn};

use crate::collab::CollaboratorError;
use crate::server::hub::Hub;

/// Outward API handed to the REST collaborator. Calls are fire-and-forget and
/// are made after the caller has committed its write.
pub trait ChatEvents: Send + Sync {
	fn chat_created(&self, chat: &Chat);

	fn message_created(&self, message: &Message);

	fn chat_updated(&self, update: ChatUpdate);
}

/// `ChatEvents` backed by a live hub.
#[derive(Clone)]
pub struct BroadcastGateway {
	hub: Hub,
}

impl Hub {
	pub fn gateway(&self) -> BroadcastGateway {
		BroadcastGateway { hub: self.clone() }
	}
}

impl BroadcastGateway {
	/// Deliver `chat_created` to every authenticated connection of a member.
	pub fn deliver_chat_created(&self, chat: &Chat) -> usize {
		let members: HashSet<UserId> = chat.members.iter().cloned().collect();
		let delivered = self.hub.state().registry.send_to_users(
			&members,
			ServerFrame::ChatCreated { chat: chat.clone() },
		);
		metrics::counter!("chathub_server_gateway_events_total", "event" => "chat_created").increment(1);
		debug!(chat_id = %chat.id, delivered, "chat_created delivered");
		delivered
	}

	/// Deliver `message_sent` to the chat's topic subscribers.
	pub fn deliver_message_created(&self, message: &Message) -> usize {
		let delivered = self.hub.publish(
			&message.chat_id,
			ServerFrame::MessageSent {
				message: message.clone(),
			},
		);
		metrics::counter!("chathub_server_gateway_events_total", "event" => "message_created").increment(1);
		debug!(chat_id = %message.chat_id, message_id = %message.id, delivered, "message_sent delivered");
		delivered
	}

	/// Re-read current membership, then deliver `chat_updated` to every member connection.
	pub async fn deliver_chat_updated(&self, update: ChatUpdate) -> usize {
		let members = match self.hub.collab().chats.members_of(&update.chat_id).await {
			Ok(members) => members,
			Err(CollaboratorError::NotFound(_)) => {
				debug!(chat_id = %update.chat_id, "chat_updated for unknown chat skipped");
				return 0;
			}
			Err(e) => {
				warn!(chat_id = %update.chat_id, error = %e, "membership lookup failed; chat_updated dropped");
				return 0;
			}
		};

		let chat_id = update.chat_id.clone();
		let delivered = self
			.hub
			.state()
			.registry
			.send_to_users(&members, ServerFrame::ChatUpdated(update));
		metrics::counter!("chathub_server_gateway_events_total", "event" => "chat_updated").increment(1);
		debug!(chat_id = %chat_id, delivered, "chat_updated delivered");
		delivered
	}
}

impl ChatEvents for BroadcastGateway {
	fn chat_created(&self, chat: &Chat) {
		self.deliver_chat_created(chat);
	}

	fn message_created(&self, message: &Message) {
		self.deliver_message_created(message);
	}

	fn chat_updated(&self, update: ChatUpdate) {
		let gateway = self.clone();
		tokio::spawn(async move {
			gateway.deliver_chat_updated(update).await;
		});
	}
}
