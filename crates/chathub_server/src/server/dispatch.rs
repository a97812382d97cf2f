#![forbid(unsafe_code)]

use chathub_domain::{AckKind, ConnId};
use chathub_protocol::{ClientFrame, ServerFrame, decode_client_frame};
use tracing::{debug, warn};

use crate::server::hub::Hub;
use crate::server::registry::CloseReason;

impl Hub {
	/// Decode one inbound text frame and route it. Malformed frames are dropped without a reply.
	pub async fn handle_frame(&self, conn: ConnId, text: &str) {
		metrics::counter!("chathub_server_frames_in_total").increment(1);

		let frame = match decode_client_frame(text, self.config().max_frame_bytes) {
			Ok(frame) => frame,
			Err(e) => {
				metrics::counter!("chathub_server_frames_rejected_total").increment(1);
				debug!(conn_id = %conn, error = %e, "dropping unrecognized frame");
				return;
			}
		};

		self.dispatch(conn, frame).await;
	}

	pub async fn dispatch(&self, conn: ConnId, frame: ClientFrame) {
		let kind = frame.kind();
		if !matches!(frame, ClientFrame::Auth { .. }) && !self.require_authenticated(conn, kind).await {
			return;
		}

		match frame {
			ClientFrame::Auth { token } => self.authenticate(conn, token).await,
			ClientFrame::JoinChat { chat_id } => self.join_chat(conn, chat_id).await,
			ClientFrame::LeaveChat { chat_id } => self.leave_chat(conn, chat_id),
			ClientFrame::AckDelivered { chat_id, message_id } => {
				self.ack_one(conn, AckKind::Delivered, chat_id, message_id).await
			}
			ClientFrame::AckRead { chat_id, message_id } => self.ack_one(conn, AckKind::Read, chat_id, message_id).await,
			ClientFrame::AckDeliveredAll { chat_id } => self.ack_all(conn, AckKind::Delivered, chat_id).await,
			ClientFrame::AckReadAll { chat_id } => self.ack_all(conn, AckKind::Read, chat_id).await,
			ClientFrame::TypingStart { chat_id } => self.typing(conn, chat_id, true),
			ClientFrame::TypingStop { chat_id } => self.typing(conn, chat_id, false),
		}
	}

	/// False (after terminating the connection if needed) when `conn` may not send `kind`.
	async fn require_authenticated(&self, conn: ConnId, kind: &'static str) -> bool {
		let authenticated = self.state().registry.get(conn).map(|e| e.is_authenticated());
		match authenticated {
			Some(true) => true,
			Some(false) => {
				metrics::counter!("chathub_server_policy_violations_total").increment(1);
				warn!(conn_id = %conn, frame = kind, "frame before authentication; terminating");
				let frame = ServerFrame::AuthError {
					message: "Authentication required".to_string(),
				};
				self.terminate(conn, CloseReason::PolicyViolation, Some(frame)).await;
				false
			}
			None => false,
		}
	}
}
