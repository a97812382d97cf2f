#![forbid(unsafe_code)]

use std::collections::{BTreeSet, HashMap, HashSet};

use chathub_domain::{ChatId, ConnId};

/// Two-way chat ↔ connection subscription index.
///
/// Both directions are only mutated together, so `by_conn[c]` contains `t`
/// exactly when `by_chat[t]` contains `c`. A chat key exists only while at
/// least one connection is subscribed.
#[derive(Debug, Default)]
pub struct TopicIndex {
	by_chat: HashMap<ChatId, BTreeSet<ConnId>>,
	by_conn: HashMap<ConnId, HashSet<ChatId>>,
}

impl TopicIndex {
	/// Add a subscription; returns false if it already existed.
	pub fn subscribe(&mut self, conn: ConnId, chat: ChatId) -> bool {
		let added = self.by_conn.entry(conn).or_default().insert(chat.clone());
		if added {
			self.by_chat.entry(chat).or_default().insert(conn);
		}
		added
	}

	/// Remove a subscription; returns false if there was none.
	pub fn unsubscribe(&mut self, conn: ConnId, chat: &ChatId) -> bool {
		let Some(chats) = self.by_conn.get_mut(&conn) else {
			return false;
		};
		if !chats.remove(chat) {
			return false;
		}
		if chats.is_empty() {
			self.by_conn.remove(&conn);
		}

		if let Some(conns) = self.by_chat.get_mut(chat) {
			conns.remove(&conn);
			if conns.is_empty() {
				self.by_chat.remove(chat);
			}
		}
		true
	}

	/// Drop every subscription held by `conn` and return the chats it left.
	pub fn remove_conn(&mut self, conn: ConnId) -> Vec<ChatId> {
		let Some(chats) = self.by_conn.remove(&conn) else {
			return Vec::new();
		};

		let mut left = Vec::with_capacity(chats.len());
		for chat in chats {
			if let Some(conns) = self.by_chat.get_mut(&chat) {
				conns.remove(&conn);
				if conns.is_empty() {
					self.by_chat.remove(&chat);
				}
			}
			left.push(chat);
		}
		left.sort();
		left
	}

	pub fn is_subscribed(&self, conn: ConnId, chat: &ChatId) -> bool {
		self.by_conn.get(&conn).is_some_and(|chats| chats.contains(chat))
	}

	/// Subscribers of a chat, in connection-id order.
	pub fn subscribers(&self, chat: &ChatId) -> Vec<ConnId> {
		self.by_chat
			.get(chat)
			.map(|conns| conns.iter().copied().collect())
			.unwrap_or_default()
	}

	/// Chats a connection is subscribed to.
	#[cfg(test)]
	pub fn chats_for_conn(&self, conn: ConnId) -> HashSet<ChatId> {
		self.by_conn.get(&conn).cloned().unwrap_or_default()
	}

	/// Number of live topics.
	pub fn topic_count(&self) -> usize {
		self.by_chat.len()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn chat(s: &str) -> ChatId {
		ChatId::new(s).unwrap()
	}

	fn assert_symmetric(index: &TopicIndex) {
		for (c, chats) in &index.by_conn {
			for t in chats {
				assert!(index.by_chat[t].contains(c), "{t} missing {c}");
			}
		}
		for (t, conns) in &index.by_chat {
			assert!(!conns.is_empty(), "empty topic {t} left behind");
			for c in conns {
				assert!(index.by_conn[c].contains(t), "{c} missing {t}");
			}
		}
	}

	#[test]
	fn subscribe_updates_both_directions() {
		let mut index = TopicIndex::default();
		assert!(index.subscribe(ConnId(1), chat("a")));
		assert!(!index.subscribe(ConnId(1), chat("a")));
		assert!(index.subscribe(ConnId(2), chat("a")));
		assert!(index.subscribe(ConnId(1), chat("b")));

		assert!(index.is_subscribed(ConnId(1), &chat("a")));
		assert_eq!(index.subscribers(&chat("a")), vec![ConnId(1), ConnId(2)]);
		assert_eq!(index.topic_count(), 2);
		assert_symmetric(&index);
	}

	#[test]
	fn unsubscribe_is_idempotent_and_prunes_topics() {
		let mut index = TopicIndex::default();
		index.subscribe(ConnId(1), chat("a"));

		assert!(index.unsubscribe(ConnId(1), &chat("a")));
		assert!(!index.unsubscribe(ConnId(1), &chat("a")));
		assert!(!index.unsubscribe(ConnId(9), &chat("zzz")));
		assert_eq!(index.topic_count(), 0);
		assert!(index.subscribers(&chat("a")).is_empty());
		assert_symmetric(&index);
	}

	#[test]
	fn remove_conn_leaves_other_subscribers() {
		let mut index = TopicIndex::default();
		index.subscribe(ConnId(1), chat("a"));
		index.subscribe(ConnId(1), chat("b"));
		index.subscribe(ConnId(2), chat("b"));

		assert_eq!(index.remove_conn(ConnId(1)), vec![chat("a"), chat("b")]);
		assert!(index.remove_conn(ConnId(1)).is_empty());
		assert_eq!(index.subscribers(&chat("b")), vec![ConnId(2)]);
		assert_eq!(index.topic_count(), 1);
		assert!(index.chats_for_conn(ConnId(1)).is_empty());
		assert_symmetric(&index);
	}
}
