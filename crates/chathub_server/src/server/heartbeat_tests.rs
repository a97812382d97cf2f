#![forbid(unsafe_code)]

use std::time::Duration;

use chathub_protocol::ServerFrame;
use tokio::time::{sleep, timeout};

use crate::server::heartbeat::HeartbeatMonitor;
use crate::server::registry::{CloseReason, Outbound};
use crate::server::test_support::{TestConn, chat_id, hub_with_store, seed_chat, uid};

#[tokio::test]
async fn first_sweep_pings_and_clears_liveness() {
	let (hub, _store) = hub_with_store();
	let mut c = TestConn::login(&hub, "u1").await;

	assert!(hub.sweep().await.is_empty());

	assert!(matches!(c.outbound().as_slice(), [Outbound::Ping]));
	assert_eq!(hub.state().registry.get(c.conn).map(|e| e.alive), Some(false));
}

#[tokio::test]
async fn unresponsive_connection_is_evicted_and_presence_drops() {
	let (hub, store) = hub_with_store();
	seed_chat(&store, "x", &["u1", "u2"]);
	let mut silent = TestConn::login(&hub, "u1").await;
	let mut healthy = TestConn::login(&hub, "u2").await;
	silent.join(&hub, "x").await;
	healthy.join(&hub, "x").await;

	hub.sweep().await;
	hub.mark_alive(healthy.conn);
	let evicted = hub.sweep().await;

	assert_eq!(evicted, vec![silent.conn]);
	assert!(!hub.is_open(silent.conn));
	assert!(hub.is_open(healthy.conn));
	assert!(hub.subscriptions(silent.conn).is_empty());

	let out = silent.outbound();
	assert!(
		matches!(out.last(), Some(Outbound::Close(CloseReason::HeartbeatTimeout))),
		"unexpected outbound: {out:?}"
	);
	assert!(silent.is_disconnected());

	assert_eq!(
		healthy.frames(),
		vec![ServerFrame::PresenceOffline { user_id: uid("u1") }]
	);
	assert!(store.last_seen(&uid("u1")).is_some());
	assert_eq!(hub.stats().online_users, 1);
	assert_eq!(hub.state().topics.subscribers(&chat_id("x")), vec![healthy.conn]);
}

#[tokio::test]
async fn unauthenticated_connections_are_swept_too() {
	let (hub, _store) = hub_with_store();
	let c = TestConn::open(&hub);

	hub.sweep().await;
	assert_eq!(hub.sweep().await, vec![c.conn]);
	assert_eq!(hub.stats().connections, 0);
}

#[tokio::test]
async fn monitor_evicts_on_its_own_schedule() {
	let (hub, _store) = hub_with_store();
	let mut c = TestConn::login(&hub, "u1").await;
	let handle = HeartbeatMonitor::spawn(hub.clone(), Duration::from_millis(20));

	let closed = timeout(Duration::from_secs(2), async {
		while hub.is_open(c.conn) {
			sleep(Duration::from_millis(5)).await;
		}
	})
	.await;
	handle.abort();

	assert!(closed.is_ok(), "monitor never evicted the silent connection");
	assert!(
		c.outbound()
			.iter()
			.any(|o| matches!(o, Outbound::Close(CloseReason::HeartbeatTimeout)))
	);
}
