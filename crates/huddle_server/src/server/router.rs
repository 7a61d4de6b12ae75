#![forbid(unsafe_code)]

use huddle_domain::{ConnId, GroupId, UserId};
use huddle_protocol::{ClientFrame, FrameError, MessageFrame, ServerFrame, TypingFrame};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::debug;

use crate::server::presence;
use crate::server::registry::{Session, SessionRegistry};
use crate::server::room_hub::{RoomHub, RoomMember};
use crate::server::store::{PersistHandle, StoredMessage};
use crate::util::time;

/// Why an inbound frame was dropped without effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
	Malformed,
	UnknownType,
	NotJoined,
	NoTargetGroup,
	InvalidJoin,
}

impl IgnoreReason {
	fn as_str(self) -> &'static str {
		match self {
			Self::Malformed => "malformed",
			Self::UnknownType => "unknown_type",
			Self::NotJoined => "not_joined",
			Self::NoTargetGroup => "no_target_group",
			Self::InvalidJoin => "invalid_join",
		}
	}
}

/// What handling one inbound frame did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
	Joined {
		groups: Vec<GroupId>,
	},
	MessageBroadcast {
		group: GroupId,
		delivered: usize,
	},
	TypingBroadcast {
		group: GroupId,
		delivered: usize,
	},
	Ignored(IgnoreReason),
}

/// Routes decoded frames between the session registry, the room index, and
/// the persistence queue. Cheap to clone; all state is shared.
#[derive(Clone)]
pub struct EventRouter {
	registry: SessionRegistry,
	hub: RoomHub,
	persist: PersistHandle,
	max_frame_bytes: usize,
}

impl EventRouter {
	pub fn new(registry: SessionRegistry, hub: RoomHub, persist: PersistHandle, max_frame_bytes: usize) -> Self {
		Self {
			registry,
			hub,
			persist,
			max_frame_bytes,
		}
	}

	pub fn hub(&self) -> &RoomHub {
		&self.hub
	}

	pub fn registry(&self) -> &SessionRegistry {
		&self.registry
	}

	/// Handle one inbound text frame from `conn`. `tx` is the connection's
	/// outbound queue, registered into each room the connection joins.
	pub fn handle_text(&self, conn: ConnId, tx: &mpsc::Sender<String>, raw: &str) -> RouteOutcome {
		let frame = match huddle_protocol::decode_client_frame(raw, self.max_frame_bytes) {
			Ok(frame) => frame,
			Err(FrameError::UnknownType(ty)) => {
				debug!(%conn, frame_type = %ty, "router: ignoring frame of unknown type");
				return self.ignored(IgnoreReason::UnknownType);
			}
			Err(e) => {
				debug!(%conn, error = %e, "router: ignoring malformed frame");
				return self.ignored(IgnoreReason::Malformed);
			}
		};

		match frame {
			ClientFrame::Join(join) => self.handle_join(
				conn,
				tx,
				join.user_id,
				&join.user_name,
				&[join.group_id],
			),
			ClientFrame::JoinMultiple(join) => self.handle_join(conn, tx, join.user_id, &join.user_name, &join.group_ids),
			ClientFrame::Message(message) => self.handle_message(conn, message),
			ClientFrame::Typing(typing) => self.handle_typing(conn, typing),
		}
	}

	fn handle_join(
		&self,
		conn: ConnId,
		tx: &mpsc::Sender<String>,
		user_id: i64,
		user_name: &str,
		group_ids: &[i64],
	) -> RouteOutcome {
		let Ok(user_id) = UserId::new(user_id) else {
			debug!(%conn, user_id, "router: join with non-positive user id");
			return self.ignored(IgnoreReason::InvalidJoin);
		};

		let groups: Vec<GroupId> = group_ids.iter().copied().filter_map(GroupId::from_wire).collect();

		let prev = self.registry.resolve(conn);
		let identity_changed = prev
			.as_ref()
			.is_some_and(|s| s.user_id != user_id || s.user_name != user_name);

		self.registry.register(conn, user_id, user_name);
		let added = self.registry.subscribe(conn, &groups);

		// A re-register under a new identity must not leave rooms joined
		// earlier holding the old one; re-adding replaces the member in place
		// and the refreshed roster goes out to each of those rooms.
		if identity_changed && let Some(prev) = prev {
			for &group in &prev.groups {
				let members = self.hub.add(
					group,
					RoomMember {
						conn,
						user_id,
						user_name: user_name.to_string(),
						tx: tx.clone(),
					},
				);
				presence::broadcast_online(&self.hub, group, &members);
			}
		}

		for &group in &added {
			let members = self.hub.add(
				group,
				RoomMember {
					conn,
					user_id,
					user_name: user_name.to_string(),
					tx: tx.clone(),
				},
			);
			presence::broadcast_online(&self.hub, group, &members);
		}

		RouteOutcome::Joined { groups: added }
	}

	fn handle_message(&self, conn: ConnId, frame: MessageFrame) -> RouteOutcome {
		let Some(session) = self.registry.resolve(conn) else {
			debug!(%conn, "router: message from unjoined connection");
			return self.ignored(IgnoreReason::NotJoined);
		};

		let Some(group) = self.target_group(&session, frame.group_id) else {
			debug!(%conn, "router: message with no resolvable group");
			return self.ignored(IgnoreReason::NoTargetGroup);
		};

		let user_id = frame.user_id.and_then(|v| UserId::new(v).ok()).unwrap_or(session.user_id);
		let user_name = frame
			.user_name
			.filter(|s| !s.trim().is_empty())
			.unwrap_or_else(|| session.user_name.clone());
		let timestamp = frame
			.timestamp
			.filter(|s| !s.trim().is_empty())
			.unwrap_or_else(time::now_rfc3339);

		self.persist.enqueue(StoredMessage {
			group_id: group.get(),
			user_id: user_id.get(),
			text: frame.text.clone(),
			resource_id: frame.resource_id.filter(|v| *v > 0),
			resource_title: frame.resource_title.clone().filter(|s| !s.trim().is_empty()),
			task_id: frame.task_id.filter(|v| *v > 0),
			created_at_unix_ms: time::unix_ms_now(),
		});

		let out = ServerFrame::Message {
			group_id: group,
			user_id,
			user_name,
			text: frame.text,
			timestamp,
			resource_id: frame.resource_id,
			resource_title: frame.resource_title,
			task_id: frame.task_id,
		};

		let delivered = self.broadcast_frame(group, &out);
		metrics::counter!("huddle_messages_total").increment(1);

		RouteOutcome::MessageBroadcast { group, delivered }
	}

	fn handle_typing(&self, conn: ConnId, frame: TypingFrame) -> RouteOutcome {
		let Some(session) = self.registry.resolve(conn) else {
			debug!(%conn, "router: typing from unjoined connection");
			return self.ignored(IgnoreReason::NotJoined);
		};

		let Some(group) = self.target_group(&session, frame.group_id) else {
			debug!(%conn, "router: typing with no resolvable group");
			return self.ignored(IgnoreReason::NoTargetGroup);
		};

		let user_id = frame.user_id.and_then(|v| UserId::new(v).ok()).unwrap_or(session.user_id);
		let user_name = frame
			.user_name
			.filter(|s| !s.trim().is_empty())
			.unwrap_or_else(|| session.user_name.clone());

		let out = ServerFrame::Typing {
			group_id: group,
			user_id,
			user_name,
		};

		let delivered = self.broadcast_frame(group, &out);
		metrics::counter!("huddle_typing_total").increment(1);

		RouteOutcome::TypingBroadcast { group, delivered }
	}

	/// Explicit positive group id wins; zero or absent falls back to the
	/// session's earliest-joined group.
	fn target_group(&self, session: &Session, wire_group: Option<i64>) -> Option<GroupId> {
		wire_group.and_then(GroupId::from_wire).or_else(|| session.fallback_group())
	}

	/// Encode and fan out a frame to one room.
	pub fn broadcast_frame(&self, group: GroupId, frame: &ServerFrame) -> usize {
		match huddle_protocol::encode_server_frame(frame) {
			Ok(encoded) => self.hub.broadcast(group, &encoded),
			Err(e) => {
				tracing::warn!(%group, error = %e, "router: failed to encode outbound frame");
				0
			}
		}
	}

	/// Tear down a connection: drop its session, leave every room it was in,
	/// and rebroadcast presence for each room that still has members. Returns
	/// the groups the connection was subscribed to.
	pub fn disconnect(&self, conn: ConnId) -> Vec<GroupId> {
		let Some(session) = self.registry.unregister(conn) else {
			return Vec::new();
		};

		for &group in &session.groups {
			if let Some(members) = self.hub.remove(group, conn) {
				presence::broadcast_online(&self.hub, group, &members);
			}
		}

		session.groups
	}

	/// Publish a system event to a group's room. The `extra` payload fields
	/// are carried verbatim alongside the event name. No delivery to members
	/// that join later; an empty room gets nothing.
	pub fn publish_system_event(&self, group: GroupId, event: &str, extra: Map<String, Value>) -> usize {
		let frame = ServerFrame::Event {
			event: event.to_string(),
			extra,
		};

		let delivered = self.broadcast_frame(group, &frame);
		metrics::counter!("huddle_system_events_total").increment(1);

		delivered
	}

	fn ignored(&self, reason: IgnoreReason) -> RouteOutcome {
		metrics::counter!("huddle_frames_ignored_total", "reason" => reason.as_str()).increment(1);
		RouteOutcome::Ignored(reason)
	}
}
