#![forbid(unsafe_code)]

//! Interfaces the hub consumes from the rest of the system.
//!
//! Every method here is a suspension point for the hub: callers must
//! re-check connection state after awaiting one of them.

pub mod memory;

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chathub_domain::{AckKind, ChatId, MessageId, UserId};
use chrono::{DateTime, Utc};
use thiserror::Error;

pub use memory::MemoryStore;

/// Failures reported by collaborators.
#[derive(Debug, Error)]
pub enum CollaboratorError {
	#[error("not found: {0}")]
	NotFound(String),

	#[error("collaborator unavailable: {0}")]
	Unavailable(#[from] anyhow::Error),
}

/// Token verification failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
	#[error("invalid token format")]
	InvalidFormat,
	#[error("invalid token signature")]
	InvalidSignature,
	#[error("invalid token claims: {0}")]
	InvalidClaims(String),
	#[error("token expired")]
	Expired,
}

/// Resolves a bearer token to the user it was issued for.
#[async_trait]
pub trait AuthVerifier: Send + Sync {
	async fn verify(&self, token: &str) -> Result<UserId, AuthError>;
}

/// Chat membership lookups.
#[async_trait]
pub trait ChatDirectory: Send + Sync {
	/// Current members of a chat; `NotFound` when the chat does not exist.
	async fn members_of(&self, chat: &ChatId) -> Result<HashSet<UserId>, CollaboratorError>;
}

/// Delivery/read receipt persistence.
#[async_trait]
pub trait MessageStore: Send + Sync {
	async fn mark_delivered(&self, message: &MessageId, user: &UserId) -> Result<(), CollaboratorError>;

	async fn mark_read(&self, message: &MessageId, user: &UserId) -> Result<(), CollaboratorError>;

	/// Messages in `chat` sent by someone other than `user` that `user` has not yet acked for `kind`.
	async fn unacked(&self, chat: &ChatId, user: &UserId, kind: AckKind) -> Result<Vec<MessageId>, CollaboratorError>;

	/// Batch variant of `mark_delivered`/`mark_read`; stops at the first failure.
	async fn mark_all(&self, kind: AckKind, messages: &[MessageId], user: &UserId) -> Result<(), CollaboratorError> {
		for message in messages {
			match kind {
				AckKind::Delivered => self.mark_delivered(message, user).await?,
				AckKind::Read => self.mark_read(message, user).await?,
			}
		}
		Ok(())
	}
}

/// User profile writes.
#[async_trait]
pub trait UserStore: Send + Sync {
	async fn set_last_seen(&self, user: &UserId, at: DateTime<Utc>) -> Result<(), CollaboratorError>;
}

/// Bundle of collaborator handles given to the hub at construction.
#[derive(Clone)]
pub struct Collaborators {
	pub auth: Arc<dyn AuthVerifier>,
	pub chats: Arc<dyn ChatDirectory>,
	pub messages: Arc<dyn MessageStore>,
	pub users: Arc<dyn UserStore>,
}

impl Collaborators {
	/// Back every store-side collaborator with the same in-memory store.
	pub fn in_memory(auth: Arc<dyn AuthVerifier>, store: Arc<MemoryStore>) -> Self {
		Self {
			auth,
			chats: store.clone(),
			messages: store.clone(),
			users: store,
		}
	}
}
