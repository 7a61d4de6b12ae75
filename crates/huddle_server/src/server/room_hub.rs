#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Arc;

use huddle_domain::{ConnId, GroupId, UserId};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

/// One connection's membership in a group room.
#[derive(Debug, Clone)]
pub struct RoomMember {
	pub conn: ConnId,
	pub user_id: UserId,
	pub user_name: String,

	/// Outbound frame queue for this connection. Sends never block.
	pub tx: mpsc::Sender<String>,
}

/// Configuration for `RoomHub`.
#[derive(Debug, Clone)]
pub struct RoomHubConfig {
	/// Number of shards the room index is split across.
	pub shard_count: usize,

	pub debug_logs: bool,
}

impl Default for RoomHubConfig {
	fn default() -> Self {
		Self {
			shard_count: 16,
			debug_logs: false,
		}
	}
}

/// Sharded reverse index from group id to its current room members, with
/// fan-out. A room whose member set becomes empty is removed from the index.
#[derive(Debug, Clone)]
pub struct RoomHub {
	shards: Arc<[Mutex<Shard>]>,
	debug_logs: bool,
}

#[derive(Debug, Default)]
struct Shard {
	rooms: HashMap<GroupId, RoomEntry>,
}

#[derive(Debug, Default)]
struct RoomEntry {
	/// Members in join order.
	members: Vec<RoomMember>,
}

impl RoomHub {
	pub fn new(cfg: RoomHubConfig) -> Self {
		let shard_count = cfg.shard_count.max(1);
		let shards: Vec<_> = (0..shard_count).map(|_| Mutex::new(Shard::default())).collect();
		Self {
			shards: shards.into(),
			debug_logs: cfg.debug_logs,
		}
	}

	fn shard(&self, group: GroupId) -> &Mutex<Shard> {
		let idx = (group.get() as u64 as usize) % self.shards.len();
		&self.shards[idx]
	}

	/// Add a member to a room. Returns the member list snapshot taken in the
	/// same lock scope as the insertion, for presence recomputation.
	pub fn add(&self, group: GroupId, member: RoomMember) -> Vec<RoomMember> {
		let mut shard = self.shard(group).lock();
		let entry = shard.rooms.entry(group).or_default();

		prune_closed_members(entry);

		match entry.members.iter_mut().find(|m| m.conn == member.conn) {
			Some(existing) => *existing = member,
			None => entry.members.push(member),
		}

		if self.debug_logs {
			debug!(%group, members = entry.members.len(), "room hub: member added");
		}

		entry.members.clone()
	}

	/// Remove a member from a room. Returns the remaining member snapshot when
	/// the room still has members and the set actually changed; `None` when
	/// the room emptied (and was dropped) or the connection was not a member.
	pub fn remove(&self, group: GroupId, conn: ConnId) -> Option<Vec<RoomMember>> {
		let mut shard = self.shard(group).lock();
		let entry = shard.rooms.get_mut(&group)?;

		let before = entry.members.len();
		entry.members.retain(|m| m.conn != conn);

		if entry.members.is_empty() {
			shard.rooms.remove(&group);
			return None;
		}

		if entry.members.len() == before {
			return None;
		}

		Some(entry.members.clone())
	}

	/// Read-only membership snapshot at call time.
	pub fn members_of(&self, group: GroupId) -> Vec<RoomMember> {
		let shard = self.shard(group).lock();
		shard.rooms.get(&group).map(|e| e.members.clone()).unwrap_or_default()
	}

	/// Fan a pre-encoded frame out to a room. Per-recipient sends are
	/// non-blocking: a full queue drops the frame for that recipient only, a
	/// closed queue is left for the connection's own disconnect cleanup.
	/// Returns the number of recipients the frame was queued for.
	pub fn broadcast(&self, group: GroupId, frame: &str) -> usize {
		let mut shard = self.shard(group).lock();
		let Some(entry) = shard.rooms.get_mut(&group) else {
			return 0;
		};

		prune_closed_members(entry);

		if entry.members.is_empty() {
			shard.rooms.remove(&group);
			return 0;
		}

		let mut delivered = 0usize;
		let mut dropped = 0u64;

		for member in &entry.members {
			match member.tx.try_send(frame.to_string()) {
				Ok(()) => delivered += 1,
				Err(mpsc::error::TrySendError::Full(_)) => dropped += 1,
				Err(mpsc::error::TrySendError::Closed(_)) => {}
			}
		}

		if dropped > 0 {
			metrics::counter!("huddle_fanout_dropped_total").increment(dropped);
			if self.debug_logs {
				debug!(%group, dropped, "room hub: dropped due to full subscriber queues");
			}
		}

		delivered
	}

	/// Current number of non-empty rooms.
	pub fn room_count(&self) -> usize {
		self.shards.iter().map(|s| s.lock().rooms.len()).sum()
	}

	/// Snapshot of member counts per room.
	pub fn member_counts(&self) -> HashMap<GroupId, usize> {
		let mut counts = HashMap::new();
		for shard in self.shards.iter() {
			let shard = shard.lock();
			for (group, entry) in &shard.rooms {
				counts.insert(*group, entry.members.iter().filter(|m| !m.tx.is_closed()).count());
			}
		}
		counts
	}
}

fn prune_closed_members(entry: &mut RoomEntry) {
	entry.members.retain(|m| !m.tx.is_closed());
}
