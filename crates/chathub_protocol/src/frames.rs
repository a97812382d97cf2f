#![forbid(unsafe_code)]

use chathub_domain::{AckKind, Chat, ChatId, ChatUpdate, Message, MessageId, UserId};
use serde::{Deserialize, Serialize};

/// Client → server frames.
///
/// Identifiers stay raw strings here; the hub decides how a malformed id is
/// answered (a `join_denied` for joins, a silent drop everywhere else).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientFrame {
	Auth { token: String },
	JoinChat { chat_id: String },
	LeaveChat { chat_id: String },
	AckDelivered { chat_id: String, message_id: String },
	AckRead { chat_id: String, message_id: String },
	AckDeliveredAll { chat_id: String },
	AckReadAll { chat_id: String },
	TypingStart { chat_id: String },
	TypingStop { chat_id: String },
}

impl ClientFrame {
	/// Wire name of the frame, used for logs and metrics labels.
	pub const fn kind(&self) -> &'static str {
		match self {
			Self::Auth { .. } => "auth",
			Self::JoinChat { .. } => "join_chat",
			Self::LeaveChat { .. } => "leave_chat",
			Self::AckDelivered { .. } => "ack_delivered",
			Self::AckRead { .. } => "ack_read",
			Self::AckDeliveredAll { .. } => "ack_delivered_all",
			Self::AckReadAll { .. } => "ack_read_all",
			Self::TypingStart { .. } => "typing_start",
			Self::TypingStop { .. } => "typing_stop",
		}
	}

	/// Chat the frame targets, if any.
	pub fn chat_id(&self) -> Option<&str> {
		match self {
			Self::Auth { .. } => None,
			Self::JoinChat { chat_id }
			| Self::LeaveChat { chat_id }
			| Self::AckDelivered { chat_id, .. }
			| Self::AckRead { chat_id, .. }
			| Self::AckDeliveredAll { chat_id }
			| Self::AckReadAll { chat_id }
			| Self::TypingStart { chat_id }
			| Self::TypingStop { chat_id } => Some(chat_id),
		}
	}

	/// Ack kind for the four acknowledgment frames.
	pub const fn ack_kind(&self) -> Option<AckKind> {
		match self {
			Self::AckDelivered { .. } | Self::AckDeliveredAll { .. } => Some(AckKind::Delivered),
			Self::AckRead { .. } | Self::AckReadAll { .. } => Some(AckKind::Read),
			_ => None,
		}
	}
}

/// Server → client frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerFrame {
	Welcome {
		text: String,
	},
	AuthOk {
		user_id: UserId,
	},
	AuthError {
		message: String,
	},
	JoinedChat {
		chat_id: ChatId,
	},
	JoinDenied {
		chat_id: String,
		reason: String,
	},
	LeftChat {
		chat_id: String,
	},
	ChatCreated {
		chat: Chat,
	},
	ChatUpdated(ChatUpdate),
	MessageSent {
		message: Message,
	},
	MessageDelivered {
		chat_id: ChatId,
		message_id: MessageId,
		delivered_to: UserId,
	},
	MessageRead {
		chat_id: ChatId,
		message_id: MessageId,
		read_by: UserId,
		read_at: String,
	},
	MessagesDelivered {
		chat_id: ChatId,
		message_ids: Vec<MessageId>,
		delivered_to: UserId,
	},
	MessagesRead {
		chat_id: ChatId,
		message_ids: Vec<MessageId>,
		read_by: UserId,
		read_at: String,
	},
	TypingStart {
		chat_id: ChatId,
		user_id: UserId,
	},
	TypingStop {
		chat_id: ChatId,
		user_id: UserId,
	},
	PresenceState {
		online_user_ids: Vec<UserId>,
	},
	PresenceOnline {
		user_id: UserId,
	},
	PresenceOffline {
		user_id: UserId,
	},
}

impl ServerFrame {
	/// Wire name of the frame.
	pub const fn kind(&self) -> &'static str {
		match self {
			Self::Welcome { .. } => "welcome",
			Self::AuthOk { .. } => "auth_ok",
			Self::AuthError { .. } => "auth_error",
			Self::JoinedChat { .. } => "joined_chat",
			Self::JoinDenied { .. } => "join_denied",
			Self::LeftChat { .. } => "left_chat",
			Self::ChatCreated { .. } => "chat_created",
			Self::ChatUpdated(_) => "chat_updated",
			Self::MessageSent { .. } => "message_sent",
			Self::MessageDelivered { .. } => "message_delivered",
			Self::MessageRead { .. } => "message_read",
			Self::MessagesDelivered { .. } => "messages_delivered",
			Self::MessagesRead { .. } => "messages_read",
			Self::TypingStart { .. } => "typing_start",
			Self::TypingStop { .. } => "typing_stop",
			Self::PresenceState { .. } => "presence_state",
			Self::PresenceOnline { .. } => "presence_online",
			Self::PresenceOffline { .. } => "presence_offline",
		}
	}
}
