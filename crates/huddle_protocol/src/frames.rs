#![forbid(unsafe_code)]

use huddle_domain::{GroupId, UserId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Default maximum accepted inbound text frame size.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024; // 64 KiB

#[derive(Debug, Error)]
pub enum FrameError {
	#[error("frame exceeds maximum size: len={len} max={max}")]
	FrameTooLarge {
		len: usize,
		max: usize,
	},

	#[error("frame is not a JSON object")]
	NotAnObject,

	#[error("unrecognized frame type: {0:?}")]
	UnknownType(String),

	#[error("malformed {kind} frame: {source}")]
	Malformed {
		kind: &'static str,
		#[source]
		source: serde_json::Error,
	},

	#[error("encode error: {0}")]
	Encode(#[source] serde_json::Error),
}

/// `{"type":"join"}` — register identity and subscribe to one group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinFrame {
	pub user_id: i64,
	pub user_name: String,
	pub group_id: i64,
}

/// `{"type":"joinMultiple"}` — register identity and subscribe to several groups at once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinMultipleFrame {
	pub user_id: i64,
	pub user_name: String,
	pub group_ids: Vec<i64>,
}

/// `{"type":"message"}` — a chat message, optionally referencing a resource or task.
///
/// `groupId` zero or absent means "use the session's fallback group"; identity
/// fields default to the session's when omitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageFrame {
	#[serde(default)]
	pub group_id: Option<i64>,
	#[serde(default)]
	pub user_id: Option<i64>,
	#[serde(default)]
	pub user_name: Option<String>,
	pub text: String,
	#[serde(default)]
	pub timestamp: Option<String>,
	#[serde(default)]
	pub resource_id: Option<i64>,
	#[serde(default)]
	pub resource_title: Option<String>,
	#[serde(default)]
	pub task_id: Option<i64>,
}

/// `{"type":"typing"}` — lightweight typing indicator, never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingFrame {
	#[serde(default)]
	pub group_id: Option<i64>,
	#[serde(default)]
	pub user_id: Option<i64>,
	#[serde(default)]
	pub user_name: Option<String>,
}

/// Decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
	Join(JoinFrame),
	JoinMultiple(JoinMultipleFrame),
	Message(MessageFrame),
	Typing(TypingFrame),
}

/// Decode one inbound text frame. Type tags are matched case-insensitively.
pub fn decode_client_frame(raw: &str, max_frame_bytes: usize) -> Result<ClientFrame, FrameError> {
	if raw.len() > max_frame_bytes {
		return Err(FrameError::FrameTooLarge {
			len: raw.len(),
			max: max_frame_bytes,
		});
	}

	let value: Value = serde_json::from_str(raw).map_err(|e| FrameError::Malformed { kind: "json", source: e })?;
	if !value.is_object() {
		return Err(FrameError::NotAnObject);
	}

	let ty = value.get("type").and_then(Value::as_str).unwrap_or_default().to_string();

	if ty.eq_ignore_ascii_case("join") {
		Ok(ClientFrame::Join(parse_as("join", value)?))
	} else if ty.eq_ignore_ascii_case("joinMultiple") {
		Ok(ClientFrame::JoinMultiple(parse_as("joinMultiple", value)?))
	} else if ty.eq_ignore_ascii_case("message") {
		Ok(ClientFrame::Message(parse_as("message", value)?))
	} else if ty.eq_ignore_ascii_case("typing") {
		Ok(ClientFrame::Typing(parse_as("typing", value)?))
	} else {
		Err(FrameError::UnknownType(ty))
	}
}

fn parse_as<T: DeserializeOwned>(kind: &'static str, value: Value) -> Result<T, FrameError> {
	serde_json::from_value(value).map_err(|e| FrameError::Malformed { kind, source: e })
}

/// Outbound frame broadcast to a group's room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
	/// Deduplicated-by-user online list for a group.
	#[serde(rename = "online", rename_all = "camelCase")]
	Online {
		group_id: GroupId,
		users: Vec<String>,
	},

	#[serde(rename = "message", rename_all = "camelCase")]
	Message {
		group_id: GroupId,
		user_id: UserId,
		user_name: String,
		text: String,
		timestamp: String,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		resource_id: Option<i64>,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		resource_title: Option<String>,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		task_id: Option<i64>,
	},

	#[serde(rename = "typing", rename_all = "camelCase")]
	Typing {
		group_id: GroupId,
		user_id: UserId,
		user_name: String,
	},

	/// System notification published by business-side collaborators; the
	/// payload fields are carried verbatim.
	#[serde(rename = "EVENT")]
	Event {
		event: String,
		#[serde(flatten)]
		extra: Map<String, Value>,
	},
}

/// Encode an outbound frame as a JSON text payload.
pub fn encode_server_frame(frame: &ServerFrame) -> Result<String, FrameError> {
	serde_json::to_string(frame).map_err(FrameError::Encode)
}
