#![forbid(unsafe_code)]

use std::collections::HashMap;

use chathub_domain::UserId;

/// Per-user count of open authenticated connections.
///
/// Only edges are reported: `mark_online` returns true on 0→1 and
/// `mark_offline` on 1→0, so multi-device users never flicker.
#[derive(Debug, Default)]
pub struct PresenceTracker {
	counts: HashMap<UserId, u32>,
}

impl PresenceTracker {
	/// Increment; true when the user just came online.
	pub fn mark_online(&mut self, user: &UserId) -> bool {
		let count = self.counts.entry(user.clone()).or_insert(0);
		*count += 1;
		*count == 1
	}

	/// Decrement, clamped at zero; true when the user just went offline.
	pub fn mark_offline(&mut self, user: &UserId) -> bool {
		match self.counts.get_mut(user) {
			Some(count) if *count > 1 => {
				*count -= 1;
				false
			}
			Some(_) => {
				self.counts.remove(user);
				true
			}
			None => false,
		}
	}

	#[cfg(test)]
	pub fn connections_for(&self, user: &UserId) -> u32 {
		self.counts.get(user).copied().unwrap_or(0)
	}

	#[cfg(test)]
	pub fn is_online(&self, user: &UserId) -> bool {
		self.counts.contains_key(user)
	}

	/// Online users, sorted for stable output.
	pub fn snapshot(&self) -> Vec<UserId> {
		let mut users: Vec<UserId> = self.counts.keys().cloned().collect();
		users.sort();
		users
	}

	pub fn online_count(&self) -> usize {
		self.counts.len()
	}
}
