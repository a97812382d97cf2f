#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chathub_domain::{Chat, ChatId, ConnId, Message, MessageId, SecretString, UserId};
use chathub_protocol::{ClientFrame, ServerFrame};
use tokio::sync::{Notify, mpsc};
use tokio::time::timeout;

use crate::collab::{Collaborators, MemoryStore};
use crate::server::auth::{HmacTokenVerifier, issue_hmac_token};
use crate::server::hub::{Hub, HubConfig};
use crate::server::registry::Outbound;

pub(crate) const SECRET: &str = "test-secret";

pub(crate) fn init_test_logging() {
	static INIT: Once = Once::new();
	INIT.call_once(|| {
		if std::env::var_os("CHATHUB_TEST_LOG").is_some() {
			let _ = tracing_subscriber::fmt()
				.with_env_filter(tracing_subscriber::EnvFilter::new("debug"))
				.with_test_writer()
				.try_init();
		}
	});
}

pub(crate) fn uid(s: &str) -> UserId {
	UserId::new(s).expect("valid UserId")
}

pub(crate) fn chat_id(s: &str) -> ChatId {
	ChatId::new(s).expect("valid ChatId")
}

pub(crate) fn msg_id(s: &str) -> MessageId {
	MessageId::new(s).expect("valid MessageId")
}

pub(crate) fn token_for(user: &str) -> String {
	let exp = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() + 3600;
	issue_hmac_token(user, exp, SECRET).expect("issue token")
}

pub(crate) fn test_config() -> HubConfig {
	HubConfig {
		welcome_text: "hello".to_string(),
		outbound_queue_capacity: 64,
		..HubConfig::default()
	}
}

pub(crate) fn hmac_verifier() -> Arc<HmacTokenVerifier> {
	Arc::new(HmacTokenVerifier::new(SecretString::new(SECRET)))
}

/// Hub over a fresh in-memory store.
pub(crate) fn hub_with_store() -> (Hub, Arc<MemoryStore>) {
	init_test_logging();
	let store = Arc::new(MemoryStore::new());
	let collab = Collaborators::in_memory(hmac_verifier(), Arc::clone(&store));
	(Hub::new(test_config(), collab), store)
}

pub(crate) fn seed_chat(store: &MemoryStore, id: &str, members: &[&str]) -> ChatId {
	let id = chat_id(id);
	store.upsert_chat(Chat::new(id.clone(), members.iter().map(|m| uid(m)).collect()));
	id
}

pub(crate) fn seed_message(store: &MemoryStore, id: &str, chat: &ChatId, sender: &str) -> MessageId {
	let id = msg_id(id);
	store.insert_message(Message::new(id.clone(), chat.clone(), uid(sender)));
	id
}

/// One-shot hold point for a collaborator call.
///
/// Once armed, the next `pass` parks until `open`, letting a test run other
/// hub operations while a handler is suspended. Unarmed passes return at once.
#[derive(Default)]
pub(crate) struct Gate {
	armed: AtomicBool,
	entered: Notify,
	release: Notify,
}

impl Gate {
	pub fn arm(&self) {
		self.armed.store(true, Ordering::SeqCst);
	}

	pub async fn pass(&self) {
		if !self.armed.swap(false, Ordering::SeqCst) {
			return;
		}
		self.entered.notify_one();
		self.release.notified().await;
	}

	/// Resolves once a call is parked at the gate.
	pub async fn entered(&self) {
		self.entered.notified().await;
	}

	pub fn open(&self) {
		self.release.notify_one();
	}
}

/// Hub-side view of one connection: its handle plus the outbound queue the
/// transport task would normally drain.
pub(crate) struct TestConn {
	pub conn: ConnId,
	rx: mpsc::Receiver<Outbound>,
}

impl TestConn {
	/// Open a connection and consume its `welcome`.
	pub fn open(hub: &Hub) -> Self {
		let (conn, rx) = hub.open();
		let mut c = Self { conn, rx };
		match c.frames().as_slice() {
			[ServerFrame::Welcome { .. }] => {}
			other => panic!("expected a single welcome, got: {other:?}"),
		}
		c
	}

	/// Open, authenticate as `user`, and discard the auth handshake frames.
	pub async fn login(hub: &Hub, user: &str) -> Self {
		let mut c = Self::open(hub);
		c.send(hub, ClientFrame::Auth { token: token_for(user) }).await;
		let frames = c.frames();
		assert!(
			matches!(frames.first(), Some(ServerFrame::AuthOk { user_id }) if user_id.as_str() == user),
			"expected auth_ok for {user}, got: {frames:?}"
		);
		c
	}

	pub async fn send(&self, hub: &Hub, frame: ClientFrame) {
		hub.dispatch(self.conn, frame).await;
	}

	pub async fn join(&mut self, hub: &Hub, chat: &str) {
		self.send(
			hub,
			ClientFrame::JoinChat {
				chat_id: chat.to_string(),
			},
		)
		.await;
		let frames = self.frames();
		assert!(
			frames
				.iter()
				.any(|f| matches!(f, ServerFrame::JoinedChat { chat_id } if chat_id.as_str() == chat)),
			"expected joined_chat for {chat}, got: {frames:?}"
		);
	}

	/// Everything queued so far, including pings and close instructions.
	pub fn outbound(&mut self) -> Vec<Outbound> {
		let mut out = Vec::new();
		while let Ok(item) = self.rx.try_recv() {
			out.push(item);
		}
		out
	}

	/// Frames queued so far; pings and close instructions are skipped.
	pub fn frames(&mut self) -> Vec<ServerFrame> {
		self.outbound()
			.into_iter()
			.filter_map(|o| match o {
				Outbound::Frame(f) => Some((*f).clone()),
				_ => None,
			})
			.collect()
	}

	/// Wait for the next frame, for events delivered from spawned tasks.
	pub async fn next_frame(&mut self) -> ServerFrame {
		loop {
			let item = timeout(Duration::from_secs(1), self.rx.recv())
				.await
				.expect("expected a frame within timeout")
				.expect("outbound queue open");
			if let Outbound::Frame(f) = item {
				return (*f).clone();
			}
		}
	}

	/// True once the hub has dropped the connection and the queue is drained.
	pub fn is_disconnected(&mut self) -> bool {
		matches!(self.rx.try_recv(), Err(mpsc::error::TryRecvError::Disconnected))
	}
}
