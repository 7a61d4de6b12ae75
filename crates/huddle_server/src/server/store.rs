#![forbid(unsafe_code)]

use std::sync::Arc;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// A chat message flattened for storage. Built by the router at broadcast
/// time; the writer task consumes it off the queue later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
	pub group_id: i64,
	pub user_id: i64,
	pub text: String,
	pub resource_id: Option<i64>,
	pub resource_title: Option<String>,
	pub task_id: Option<i64>,
	pub created_at_unix_ms: i64,
}

/// Durable destination for chat messages.
#[async_trait]
pub trait MessageSink: Send + Sync {
	async fn append(&self, message: &StoredMessage) -> anyhow::Result<()>;
}

#[derive(Clone)]
pub struct MessageStore {
	backend: Option<Backend>,
}

#[derive(Clone)]
enum Backend {
	Sqlite(sqlx::SqlitePool),
	Postgres(sqlx::PgPool),
}

impl MessageStore {
	pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
		let store = if database_url.starts_with("sqlite:") {
			let pool = sqlx::SqlitePool::connect(database_url).await.context("connect sqlite")?;
			Self {
				backend: Some(Backend::Sqlite(pool)),
			}
		} else if database_url.starts_with("postgres:") || database_url.starts_with("postgresql:") {
			let pool = sqlx::PgPool::connect(database_url).await.context("connect postgres")?;
			Self {
				backend: Some(Backend::Postgres(pool)),
			}
		} else {
			return Err(anyhow!("unsupported database_url for message store"));
		};

		store.ensure_schema().await?;

		Ok(store)
	}

	pub fn disabled() -> Self {
		Self { backend: None }
	}

	async fn ensure_schema(&self) -> anyhow::Result<()> {
		let Some(backend) = &self.backend else {
			return Ok(());
		};

		match backend {
			Backend::Sqlite(pool) => {
				sqlx::query(
					"CREATE TABLE IF NOT EXISTS messages (\
					 id INTEGER PRIMARY KEY AUTOINCREMENT, \
					 group_id INTEGER NOT NULL, \
					 user_id INTEGER NOT NULL, \
					 text TEXT NOT NULL, \
					 resource_id INTEGER, \
					 resource_title TEXT, \
					 task_id INTEGER, \
					 created_at_unix_ms INTEGER NOT NULL)",
				)
				.execute(pool)
				.await
				.context("create messages table (sqlite)")?;
			}
			Backend::Postgres(pool) => {
				sqlx::query(
					"CREATE TABLE IF NOT EXISTS messages (\
					 id BIGSERIAL PRIMARY KEY, \
					 group_id BIGINT NOT NULL, \
					 user_id BIGINT NOT NULL, \
					 text TEXT NOT NULL, \
					 resource_id BIGINT, \
					 resource_title TEXT, \
					 task_id BIGINT, \
					 created_at_unix_ms BIGINT NOT NULL)",
				)
				.execute(pool)
				.await
				.context("create messages table (postgres)")?;
			}
		}

		Ok(())
	}
}

#[async_trait]
impl MessageSink for MessageStore {
	async fn append(&self, message: &StoredMessage) -> anyhow::Result<()> {
		let Some(backend) = &self.backend else {
			return Ok(());
		};

		match backend {
			Backend::Sqlite(pool) => {
				sqlx::query(
					"INSERT INTO messages (group_id, user_id, text, resource_id, resource_title, task_id, created_at_unix_ms) \
					VALUES (?, ?, ?, ?, ?, ?, ?)",
				)
				.bind(message.group_id)
				.bind(message.user_id)
				.bind(&message.text)
				.bind(message.resource_id)
				.bind(message.resource_title.as_deref())
				.bind(message.task_id)
				.bind(message.created_at_unix_ms)
				.execute(pool)
				.await
				.context("insert message (sqlite)")?;
			}
			Backend::Postgres(pool) => {
				sqlx::query(
					"INSERT INTO messages (group_id, user_id, text, resource_id, resource_title, task_id, created_at_unix_ms) \
					VALUES ($1, $2, $3, $4, $5, $6, $7)",
				)
				.bind(message.group_id)
				.bind(message.user_id)
				.bind(&message.text)
				.bind(message.resource_id)
				.bind(message.resource_title.as_deref())
				.bind(message.task_id)
				.bind(message.created_at_unix_ms)
				.execute(pool)
				.await
				.context("insert message (postgres)")?;
			}
		}

		Ok(())
	}
}

/// Handle for enqueueing messages to the background writer. Enqueueing never
/// blocks and never fails the caller: a full or closed queue drops the
/// message and broadcast proceeds regardless.
#[derive(Clone)]
pub struct PersistHandle {
	tx: Option<mpsc::Sender<StoredMessage>>,
}

impl PersistHandle {
	pub fn disabled() -> Self {
		Self { tx: None }
	}

	pub fn enqueue(&self, message: StoredMessage) {
		let Some(tx) = &self.tx else {
			return;
		};

		match tx.try_send(message) {
			Ok(()) => {}
			Err(mpsc::error::TrySendError::Full(_)) => {
				metrics::counter!("huddle_persist_dropped_total").increment(1);
				debug!("persist: writer queue full, message dropped");
			}
			Err(mpsc::error::TrySendError::Closed(_)) => {
				debug!("persist: writer gone, message dropped");
			}
		}
	}
}

/// Spawn the background writer task and return the enqueue handle. Sink
/// errors are counted and logged; they never propagate to broadcast.
pub fn spawn_writer(sink: Arc<dyn MessageSink>, queue_capacity: usize) -> PersistHandle {
	let (tx, mut rx) = mpsc::channel::<StoredMessage>(queue_capacity.max(1));

	tokio::spawn(async move {
		while let Some(message) = rx.recv().await {
			if let Err(e) = sink.append(&message).await {
				metrics::counter!("huddle_persist_failures_total").increment(1);
				warn!(error = %e, "message persist failed (broadcast unaffected)");
			}
		}
	});

	PersistHandle { tx: Some(tx) }
}
