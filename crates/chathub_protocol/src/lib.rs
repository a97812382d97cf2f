#![forbid(unsafe_code)]

pub mod codec;
pub mod frames;

pub use codec::{
	DEFAULT_MAX_FRAME_SIZE, ProtocolError, decode_client_frame, decode_server_frame, encode_client_frame,
	encode_server_frame,
};
pub use frames::{ClientFrame, ServerFrame};

