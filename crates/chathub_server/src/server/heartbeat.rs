#![forbid(unsafe_code)]

use std::time::Duration;

use chathub_domain::ConnId;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::server::hub::Hub;
use crate::server::registry::CloseReason;

impl Hub {
	/// One liveness pass: evict connections that never answered the previous
	/// ping, then clear the flag on the rest and ping them again.
	///
	/// Returns the evicted connections.
	pub async fn sweep(&self) -> Vec<ConnId> {
		let stale: Vec<ConnId> = {
			let mut state = self.state();
			let mut stale = Vec::new();
			for (conn, entry) in state.registry.iter_mut() {
				if entry.alive {
					entry.alive = false;
					entry.ping();
				} else {
					stale.push(conn);
				}
			}
			stale
		};

		for conn in &stale {
			metrics::counter!("chathub_server_heartbeat_evictions_total").increment(1);
			info!(conn_id = %conn, "heartbeat timeout; terminating");
			self.close(*conn, CloseReason::HeartbeatTimeout).await;
		}
		stale
	}
}

/// Periodic driver for `Hub::sweep`.
pub struct HeartbeatMonitor;

impl HeartbeatMonitor {
	pub fn spawn(hub: Hub, interval: Duration) -> JoinHandle<()> {
		tokio::spawn(async move {
			let mut ticker = tokio::time::interval(interval);
			ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
			// First tick completes immediately.
			ticker.tick().await;

			loop {
				ticker.tick().await;
				let evicted = hub.sweep().await;
				if !evicted.is_empty() {
					debug!(evicted = evicted.len(), "heartbeat sweep");
				}
			}
		})
	}
}
