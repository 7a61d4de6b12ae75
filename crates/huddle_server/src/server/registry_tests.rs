#![forbid(unsafe_code)]

use huddle_domain::{ConnId, GroupId, UserId};

use crate::server::registry::SessionRegistry;

fn uid(id: i64) -> UserId {
	UserId::new(id).expect("valid UserId")
}

fn gid(id: i64) -> GroupId {
	GroupId::new(id).expect("valid GroupId")
}

#[test]
fn register_then_resolve_round_trips_identity() {
	let registry = SessionRegistry::new(4);
	let conn = ConnId::new(1);

	registry.register(conn, uid(7), "Alice");

	let session = registry.resolve(conn).expect("registered");
	assert_eq!(session.user_id, uid(7));
	assert_eq!(session.user_name, "Alice");
	assert!(session.groups.is_empty());
	assert_eq!(session.fallback_group(), None);
}

#[test]
fn subscribe_is_additive_and_returns_only_new_groups() {
	let registry = SessionRegistry::new(4);
	let conn = ConnId::new(1);
	registry.register(conn, uid(7), "Alice");

	let added = registry.subscribe(conn, &[gid(10), gid(20)]);
	assert_eq!(added, vec![gid(10), gid(20)]);

	let added = registry.subscribe(conn, &[gid(20), gid(30)]);
	assert_eq!(added, vec![gid(30)]);

	let session = registry.resolve(conn).expect("registered");
	assert_eq!(session.groups, vec![gid(10), gid(20), gid(30)]);
}

#[test]
fn fallback_group_is_earliest_joined() {
	let registry = SessionRegistry::new(4);
	let conn = ConnId::new(1);
	registry.register(conn, uid(7), "Alice");
	registry.subscribe(conn, &[gid(42), gid(5)]);

	let session = registry.resolve(conn).expect("registered");
	assert_eq!(session.fallback_group(), Some(gid(42)));
}

#[test]
fn re_register_replaces_identity_but_keeps_groups() {
	let registry = SessionRegistry::new(4);
	let conn = ConnId::new(1);

	registry.register(conn, uid(7), "Alice");
	registry.subscribe(conn, &[gid(10)]);

	registry.register(conn, uid(8), "Alicia");

	let session = registry.resolve(conn).expect("registered");
	assert_eq!(session.user_id, uid(8));
	assert_eq!(session.user_name, "Alicia");
	assert_eq!(session.groups, vec![gid(10)]);
}

#[test]
fn subscribe_without_register_is_a_noop() {
	let registry = SessionRegistry::new(4);
	let added = registry.subscribe(ConnId::new(9), &[gid(10)]);
	assert!(added.is_empty());
	assert!(registry.resolve(ConnId::new(9)).is_none());
}

#[test]
fn unregister_returns_session_and_clears_state() {
	let registry = SessionRegistry::new(4);
	let conn = ConnId::new(1);
	registry.register(conn, uid(7), "Alice");
	registry.subscribe(conn, &[gid(10), gid(20)]);
	assert_eq!(registry.session_count(), 1);

	let session = registry.unregister(conn).expect("was registered");
	assert_eq!(session.groups, vec![gid(10), gid(20)]);
	assert_eq!(registry.session_count(), 0);

	assert!(registry.unregister(conn).is_none());
	assert!(registry.resolve(conn).is_none());
}
