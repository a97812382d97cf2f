#![forbid(unsafe_code)]

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum length of any document identifier.
pub const MAX_ID_LEN: usize = 128;

/// Errors for parsing identifiers from strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseIdError {
	#[error("empty value")]
	Empty,
	#[error("identifier too long: {0} chars")]
	TooLong(usize),
	#[error("invalid format: {0}")]
	InvalidFormat(String),
}

fn validate_id(s: &str) -> Result<(), ParseIdError> {
	if s.is_empty() {
		return Err(ParseIdError::Empty);
	}
	if s.len() > MAX_ID_LEN {
		return Err(ParseIdError::TooLong(s.len()));
	}
	if let Some(bad) = s.chars().find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-')) {
		return Err(ParseIdError::InvalidFormat(format!("unexpected character {bad:?}")));
	}
	Ok(())
}

macro_rules! document_id {
	($(#[$meta:meta])* $name:ident) => {
		$(#[$meta])*
		#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
		#[serde(try_from = "String", into = "String")]
		pub struct $name(String);

		impl $name {
			/// Create an id, rejecting empty or malformed values.
			pub fn new(id: impl Into<String>) -> Result<Self, ParseIdError> {
				let id = id.into();
				validate_id(&id)?;
				Ok(Self(id))
			}

			pub fn as_str(&self) -> &str {
				&self.0
			}

			pub fn into_string(self) -> String {
				self.0
			}
		}

		impl fmt::Display for $name {
			fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				f.write_str(&self.0)
			}
		}

		impl FromStr for $name {
			type Err = ParseIdError;

			fn from_str(s: &str) -> Result<Self, Self::Err> {
				Self::new(s.to_string())
			}
		}

		impl TryFrom<String> for $name {
			type Error = ParseIdError;

			fn try_from(s: String) -> Result<Self, Self::Error> {
				Self::new(s)
			}
		}

		impl From<$name> for String {
			fn from(id: $name) -> String {
				id.0
			}
		}
	};
}

document_id!(
	/// Identifier of a user account, as issued by the auth collaborator.
	UserId
);

document_id!(
	/// Identifier of a chat; doubles as the hub topic key.
	ChatId
);

document_id!(
	/// Identifier of a persisted message.
	MessageId
);

/// Process-local handle for one transport session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnId(pub u64);

impl fmt::Display for ConnId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "conn-{}", self.0)
	}
}

/// The two independent acknowledgment kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckKind {
	Delivered,
	Read,
}

impl AckKind {
	/// Stable string identifier.
	pub const fn as_str(self) -> &'static str {
		match self {
			AckKind::Delivered => "delivered",
			AckKind::Read => "read",
		}
	}
}

impl fmt::Display for AckKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// A chat document as handed over by the store collaborator.
///
/// Only the fields the hub routes on are typed; everything else is carried
/// through to clients untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chat {
	#[serde(rename = "_id", alias = "id")]
	pub id: ChatId,
	pub members: Vec<UserId>,
	#[serde(flatten)]
	pub attributes: serde_json::Map<String, serde_json::Value>,
}

impl Chat {
	pub fn new(id: ChatId, members: Vec<UserId>) -> Self {
		Self {
			id,
			members,
			attributes: serde_json::Map::new(),
		}
	}

	pub fn has_member(&self, user: &UserId) -> bool {
		self.members.iter().any(|m| m == user)
	}
}

/// A message document as handed over by the store collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
	#[serde(rename = "_id", alias = "id")]
	pub id: MessageId,
	pub chat_id: ChatId,
	pub sender_id: UserId,
	#[serde(flatten)]
	pub attributes: serde_json::Map<String, serde_json::Value>,
}

impl Message {
	pub fn new(id: MessageId, chat_id: ChatId, sender_id: UserId) -> Self {
		Self {
			id,
			chat_id,
			sender_id,
			attributes: serde_json::Map::new(),
		}
	}
}

/// Summary pushed to chat members after the chat's last message changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatUpdate {
	pub chat_id: ChatId,
	pub last_message: Option<serde_json::Value>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub delivery: Option<serde_json::Value>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub read: Option<serde_json::Value>,
}

/// Wrapper that redacts in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretString(String);

impl SecretString {
	pub fn new(s: impl Into<String>) -> Self {
		Self(s.into())
	}

	/// Access the inner secret string.
	pub fn expose(&self) -> &str {
		&self.0
	}
}

impl fmt::Debug for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("SecretString(<redacted>)")
	}
}

impl fmt::Display for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("<redacted>")
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn ids_accept_object_id_like_values() {
		let id = ChatId::new("65f0c2a1b2c3d4e5f6a7b8c9").unwrap();
		assert_eq!(id.as_str(), "65f0c2a1b2c3d4e5f6a7b8c9");
		assert_eq!("user_42".parse::<UserId>().unwrap().to_string(), "user_42");
	}

	#[test]
	fn rejects_empty_and_malformed_ids() {
		assert_eq!(ChatId::new(""), Err(ParseIdError::Empty));
		assert!(matches!(MessageId::new("a b"), Err(ParseIdError::InvalidFormat(_))));
		assert!(matches!(UserId::new("x".repeat(MAX_ID_LEN + 1)), Err(ParseIdError::TooLong(_))));
		assert!("{\"$gt\":\"\"}".parse::<ChatId>().is_err());
	}

	#[test]
	fn chat_document_keeps_unknown_fields() {
		let chat: Chat = serde_json::from_value(serde_json::json!({
			"_id": "c1",
			"members": ["u1", "u2"],
			"name": "general"
		}))
		.unwrap();

		assert!(chat.has_member(&UserId::new("u2").unwrap()));
		assert_eq!(chat.attributes.get("name"), Some(&serde_json::json!("general")));

		let back = serde_json::to_value(&chat).unwrap();
		assert_eq!(back["_id"], "c1");
		assert_eq!(back["name"], "general");
	}

	#[test]
	fn message_document_rejects_bad_ids() {
		let bad = serde_json::from_value::<Message>(serde_json::json!({
			"_id": "",
			"chatId": "c1",
			"senderId": "u1"
		}));
		assert!(bad.is_err());
	}

	#[test]
	fn chat_update_omits_absent_receipts() {
		let update = ChatUpdate {
			chat_id: ChatId::new("c1").unwrap(),
			last_message: None,
			delivery: None,
			read: Some(serde_json::json!({"u1": "2024-01-01T00:00:00Z"})),
		};
		let v = serde_json::to_value(&update).unwrap();
		assert_eq!(v["chatId"], "c1");
		assert!(v["lastMessage"].is_null());
		assert!(v.get("delivery").is_none());
		assert!(v.get("read").is_some());
	}

	#[test]
	fn secret_string_redacts() {
		let s = SecretString::new("hunter2");
		assert_eq!(format!("{s:?}"), "SecretString(<redacted>)");
		assert_eq!(s.to_string(), "<redacted>");
		assert_eq!(s.expose(), "hunter2");
	}
}
