#![forbid(unsafe_code)]

use std::collections::HashSet;

use huddle_domain::GroupId;
use huddle_protocol::ServerFrame;

use crate::server::room_hub::{RoomHub, RoomMember};

/// Distinct display names for a member snapshot, deduplicated by user id. A
/// user connected twice appears once, under the name of the earliest-joined
/// connection.
pub fn online_users(members: &[RoomMember]) -> Vec<String> {
	let mut seen = HashSet::new();
	let mut names = Vec::new();
	for member in members {
		if seen.insert(member.user_id) {
			names.push(member.user_name.clone());
		}
	}
	names
}

/// Encode and fan out an online roster for `group`, computed from `members`.
/// Returns the number of recipients the frame was queued for.
pub fn broadcast_online(hub: &RoomHub, group: GroupId, members: &[RoomMember]) -> usize {
	let frame = ServerFrame::Online {
		group_id: group,
		users: online_users(members),
	};

	match huddle_protocol::encode_server_frame(&frame) {
		Ok(encoded) => hub.broadcast(group, &encoded),
		Err(e) => {
			tracing::warn!(%group, error = %e, "presence: failed to encode online roster");
			0
		}
	}
}
