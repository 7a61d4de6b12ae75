#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Arc;

use huddle_domain::{ConnId, GroupId, UserId};
use parking_lot::Mutex;

/// Identity and subscriptions for one live connection.
#[derive(Debug, Clone)]
pub struct Session {
	pub user_id: UserId,
	pub user_name: String,

	/// Subscribed groups in join order, no duplicates.
	pub groups: Vec<GroupId>,
}

impl Session {
	/// Earliest-joined group still subscribed. Fallback target for message and
	/// typing frames that carry no explicit group id.
	pub fn fallback_group(&self) -> Option<GroupId> {
		self.groups.first().copied()
	}
}

/// Sharded registry mapping connections to session state. The registry
/// exclusively owns session state; the room index holds only membership.
#[derive(Debug, Clone)]
pub struct SessionRegistry {
	shards: Arc<[Mutex<HashMap<ConnId, Session>>]>,
}

impl SessionRegistry {
	pub fn new(shard_count: usize) -> Self {
		let shard_count = shard_count.max(1);
		let shards: Vec<_> = (0..shard_count).map(|_| Mutex::new(HashMap::new())).collect();
		Self { shards: shards.into() }
	}

	fn shard(&self, conn: ConnId) -> &Mutex<HashMap<ConnId, Session>> {
		let idx = (conn.get() as usize) % self.shards.len();
		&self.shards[idx]
	}

	/// Create session state for `conn`, or replace its identity if it already
	/// exists. Existing group subscriptions are kept (joins are additive).
	pub fn register(&self, conn: ConnId, user_id: UserId, user_name: &str) {
		let mut shard = self.shard(conn).lock();
		match shard.get_mut(&conn) {
			Some(session) => {
				session.user_id = user_id;
				session.user_name = user_name.to_string();
			}
			None => {
				shard.insert(
					conn,
					Session {
						user_id,
						user_name: user_name.to_string(),
						groups: Vec::new(),
					},
				);
			}
		}
	}

	/// Add groups to the session, returning only the ones it was not already
	/// subscribed to. Returns empty when the connection is unregistered.
	pub fn subscribe(&self, conn: ConnId, groups: &[GroupId]) -> Vec<GroupId> {
		let mut shard = self.shard(conn).lock();
		let Some(session) = shard.get_mut(&conn) else {
			return Vec::new();
		};

		let mut added = Vec::new();
		for &group in groups {
			if !session.groups.contains(&group) {
				session.groups.push(group);
				added.push(group);
			}
		}

		added
	}

	/// Snapshot of the session state at call time.
	pub fn resolve(&self, conn: ConnId) -> Option<Session> {
		self.shard(conn).lock().get(&conn).cloned()
	}

	/// Remove the session, returning it (with the groups it held) so the
	/// caller can clean up room membership. No-op when never registered.
	pub fn unregister(&self, conn: ConnId) -> Option<Session> {
		self.shard(conn).lock().remove(&conn)
	}

	/// Number of live sessions.
	pub fn session_count(&self) -> usize {
		self.shards.iter().map(|s| s.lock().len()).sum()
	}
}
