#![forbid(unsafe_code)]

use std::collections::{BTreeSet, HashMap, HashSet};

use async_trait::async_trait;
use chathub_domain::{AckKind, Chat, ChatId, Message, MessageId, UserId};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::{ChatDirectory, CollaboratorError, MessageStore, UserStore};

/// In-process document store used by the dev binary and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
	inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
	chats: HashMap<ChatId, Chat>,
	messages: HashMap<MessageId, StoredMessage>,
	next_seq: u64,
	last_seen: HashMap<UserId, DateTime<Utc>>,
}

#[derive(Debug)]
struct StoredMessage {
	seq: u64,
	message: Message,
	delivered_to: BTreeSet<UserId>,
	read_by: BTreeSet<UserId>,
}

impl StoredMessage {
	fn receipts(&self, kind: AckKind) -> &BTreeSet<UserId> {
		match kind {
			AckKind::Delivered => &self.delivered_to,
			AckKind::Read => &self.read_by,
		}
	}
}

impl MemoryStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// Insert or replace a chat.
	pub fn upsert_chat(&self, chat: Chat) {
		self.inner.write().chats.insert(chat.id.clone(), chat);
	}

	/// Replace a chat's member list; returns false if the chat is unknown.
	pub fn set_members(&self, chat: &ChatId, members: Vec<UserId>) -> bool {
		match self.inner.write().chats.get_mut(chat) {
			Some(c) => {
				c.members = members;
				true
			}
			None => false,
		}
	}

	/// Insert a message; re-inserting an id keeps its receipts.
	pub fn insert_message(&self, message: Message) {
		let mut inner = self.inner.write();
		if let Some(existing) = inner.messages.get_mut(&message.id) {
			existing.message = message;
			return;
		}

		let seq = inner.next_seq;
		inner.next_seq += 1;
		inner.messages.insert(
			message.id.clone(),
			StoredMessage {
				seq,
				message,
				delivered_to: BTreeSet::new(),
				read_by: BTreeSet::new(),
			},
		);
	}

	#[cfg(test)]
	pub fn delivered_to(&self, message: &MessageId) -> Vec<UserId> {
		self.receipts(message, AckKind::Delivered)
	}

	#[cfg(test)]
	pub fn read_by(&self, message: &MessageId) -> Vec<UserId> {
		self.receipts(message, AckKind::Read)
	}

	#[cfg(test)]
	pub fn last_seen(&self, user: &UserId) -> Option<DateTime<Utc>> {
		self.inner.read().last_seen.get(user).copied()
	}

	#[cfg(test)]
	fn receipts(&self, message: &MessageId, kind: AckKind) -> Vec<UserId> {
		self.inner
			.read()
			.messages
			.get(message)
			.map(|m| m.receipts(kind).iter().cloned().collect())
			.unwrap_or_default()
	}

	fn mark(&self, message: &MessageId, user: &UserId, kind: AckKind) -> Result<(), CollaboratorError> {
		let mut inner = self.inner.write();
		let stored = inner
			.messages
			.get_mut(message)
			.ok_or_else(|| CollaboratorError::NotFound(format!("message {message}")))?;

		match kind {
			AckKind::Delivered => stored.delivered_to.insert(user.clone()),
			AckKind::Read => stored.read_by.insert(user.clone()),
		};
		Ok(())
	}
}

#[async_trait]
impl ChatDirectory for MemoryStore {
	async fn members_of(&self, chat: &ChatId) -> Result<HashSet<UserId>, CollaboratorError> {
		self.inner
			.read()
			.chats
			.get(chat)
			.map(|c| c.members.iter().cloned().collect())
			.ok_or_else(|| CollaboratorError::NotFound(format!("chat {chat}")))
	}
}

#[async_trait]
impl MessageStore for MemoryStore {
	async fn mark_delivered(&self, message: &MessageId, user: &UserId) -> Result<(), CollaboratorError> {
		self.mark(message, user, AckKind::Delivered)
	}

	async fn mark_read(&self, message: &MessageId, user: &UserId) -> Result<(), CollaboratorError> {
		self.mark(message, user, AckKind::Read)
	}

	async fn unacked(&self, chat: &ChatId, user: &UserId, kind: AckKind) -> Result<Vec<MessageId>, CollaboratorError> {
		let inner = self.inner.read();
		if !inner.chats.contains_key(chat) {
			return Err(CollaboratorError::NotFound(format!("chat {chat}")));
		}

		let mut pending: Vec<&StoredMessage> = inner
			.messages
			.values()
			.filter(|m| &m.message.chat_id == chat && &m.message.sender_id != user && !m.receipts(kind).contains(user))
			.collect();
		pending.sort_by_key(|m| m.seq);

		Ok(pending.into_iter().map(|m| m.message.id.clone()).collect())
	}

	async fn mark_all(&self, kind: AckKind, messages: &[MessageId], user: &UserId) -> Result<(), CollaboratorError> {
		let mut inner = self.inner.write();
		if let Some(missing) = messages.iter().find(|id| !inner.messages.contains_key(*id)) {
			return Err(CollaboratorError::NotFound(format!("message {missing}")));
		}

		for id in messages {
			if let Some(stored) = inner.messages.get_mut(id) {
				match kind {
					AckKind::Delivered => stored.delivered_to.insert(user.clone()),
					AckKind::Read => stored.read_by.insert(user.clone()),
				};
			}
		}
		Ok(())
	}
}

#[async_trait]
impl UserStore for MemoryStore {
	async fn set_last_seen(&self, user: &UserId, at: DateTime<Utc>) -> Result<(), CollaboratorError> {
		self.inner.write().last_seen.insert(user.clone(), at);
		Ok(())
	}
}
