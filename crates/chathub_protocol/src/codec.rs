#![forbid(unsafe_code)]

use thiserror::Error;

use crate::frames::{ClientFrame, ServerFrame};

/// Default maximum text frame size for v1.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024; // 64 KiB

#[derive(Debug, Error)]
pub enum ProtocolError {
	#[error("frame exceeds maximum size: len={len} max={max}")]
	FrameTooLarge {
		len: usize,
		max: usize,
	},

	#[error("json decode error: {0}")]
	Decode(serde_json::Error),

	#[error("json encode error: {0}")]
	Encode(serde_json::Error),
}

fn check_len(len: usize, max_frame_size: usize) -> Result<(), ProtocolError> {
	if len > max_frame_size {
		return Err(ProtocolError::FrameTooLarge {
			len,
			max: max_frame_size,
		});
	}
	Ok(())
}

/// Parse a client text frame into exactly one known variant.
pub fn decode_client_frame(text: &str, max_frame_size: usize) -> Result<ClientFrame, ProtocolError> {
	check_len(text.len(), max_frame_size)?;
	serde_json::from_str(text).map_err(ProtocolError::Decode)
}

/// Serialize a server frame into a JSON text frame.
pub fn encode_server_frame(frame: &ServerFrame) -> Result<String, ProtocolError> {
	serde_json::to_string(frame).map_err(ProtocolError::Encode)
}

/// Serialize a client frame; used by clients and tests.
pub fn encode_client_frame(frame: &ClientFrame) -> Result<String, ProtocolError> {
	serde_json::to_string(frame).map_err(ProtocolError::Encode)
}

/// Parse a server text frame; used by clients and tests.
pub fn decode_server_frame(text: &str, max_frame_size: usize) -> Result<ServerFrame, ProtocolError> {
	check_len(text.len(), max_frame_size)?;
	serde_json::from_str(text).map_err(ProtocolError::Decode)
}
