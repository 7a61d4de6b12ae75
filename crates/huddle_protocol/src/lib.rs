#![forbid(unsafe_code)]

pub mod frames;

pub use frames::{
	ClientFrame, DEFAULT_MAX_FRAME_BYTES, FrameError, JoinFrame, JoinMultipleFrame, MessageFrame, ServerFrame,
	TypingFrame, decode_client_frame, encode_server_frame,
};
