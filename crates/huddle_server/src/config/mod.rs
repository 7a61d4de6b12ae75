#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, anyhow};
use serde::Deserialize;
use tracing::info;

use crate::util::secret::SecretString;

/// Default config path: `~/.huddle/config.toml`.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
	let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
	Ok(home.join(".huddle").join("config.toml"))
}

/// Load the server config from TOML and env overrides.
pub fn load_server_config_from_path(path: &Path) -> anyhow::Result<ServerConfig> {
	let file_cfg = read_toml_if_exists(path)
		.with_context(|| format!("read config from {}", path.display()))?
		.unwrap_or_default();

	let mut cfg = ServerConfig::from_file(file_cfg);

	apply_env_overrides(&mut cfg);

	Ok(cfg)
}

/// Server config (v1).
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
	pub server: ServerSettings,
	pub hub: HubSettings,
	pub persistence: PersistenceSettings,
}

/// Server settings loaded by the server.
#[derive(Debug, Clone)]
pub struct ServerSettings {
	/// Optional metrics exporter bind address (host:port).
	pub metrics_bind: Option<String>,
	/// Optional HTTP sidecar bind address for health + event publish (host:port).
	pub http_bind: Option<String>,
	/// HMAC secret for the event publish endpoint's stateless access tokens.
	pub auth_hmac_secret: Option<SecretString>,
	/// Maximum accepted inbound text frame size in bytes.
	pub max_frame_bytes: usize,
	/// Capacity of each connection's outbound frame queue.
	pub outbound_queue_capacity: usize,
}

impl Default for ServerSettings {
	fn default() -> Self {
		Self {
			metrics_bind: None,
			http_bind: None,
			auth_hmac_secret: None,
			max_frame_bytes: huddle_protocol::DEFAULT_MAX_FRAME_BYTES,
			outbound_queue_capacity: 256,
		}
	}
}

/// Hub sharding settings.
#[derive(Debug, Clone)]
pub struct HubSettings {
	/// Shard count for the session registry and room index.
	pub shard_count: usize,
}

impl Default for HubSettings {
	fn default() -> Self {
		Self { shard_count: 16 }
	}
}

/// Persistence settings loaded by the server.
#[derive(Debug, Clone)]
pub struct PersistenceSettings {
	/// Enable the message store.
	pub enabled: bool,
	/// Database URL (sqlite: or postgres:).
	pub database_url: Option<String>,
	/// Capacity of the fire-and-forget writer queue.
	pub queue_capacity: usize,
}

impl Default for PersistenceSettings {
	fn default() -> Self {
		Self {
			enabled: false,
			database_url: None,
			queue_capacity: 1024,
		}
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
	#[serde(default)]
	server: FileServerSettings,

	#[serde(default)]
	hub: FileHubSettings,

	#[serde(default)]
	persistence: FilePersistenceSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileServerSettings {
	metrics_bind: Option<String>,
	http_bind: Option<String>,
	auth_hmac_secret: Option<String>,
	max_frame_bytes: Option<usize>,
	outbound_queue_capacity: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileHubSettings {
	shard_count: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FilePersistenceSettings {
	enabled: Option<bool>,
	database_url: Option<String>,
	queue_capacity: Option<usize>,
}

impl ServerConfig {
	fn from_file(file: FileConfig) -> Self {
		let defaults = ServerSettings::default();

		Self {
			server: ServerSettings {
				metrics_bind: file.server.metrics_bind.filter(|s| !s.trim().is_empty()),
				http_bind: file.server.http_bind.filter(|s| !s.trim().is_empty()),
				auth_hmac_secret: file
					.server
					.auth_hmac_secret
					.filter(|s| !s.trim().is_empty())
					.map(SecretString::new),
				max_frame_bytes: file.server.max_frame_bytes.filter(|v| *v > 0).unwrap_or(defaults.max_frame_bytes),
				outbound_queue_capacity: file
					.server
					.outbound_queue_capacity
					.filter(|v| *v > 0)
					.unwrap_or(defaults.outbound_queue_capacity),
			},
			hub: HubSettings {
				shard_count: file.hub.shard_count.filter(|v| *v > 0).unwrap_or(HubSettings::default().shard_count),
			},
			persistence: PersistenceSettings {
				enabled: file.persistence.enabled.unwrap_or(false),
				database_url: file.persistence.database_url.filter(|s| !s.trim().is_empty()),
				queue_capacity: file
					.persistence
					.queue_capacity
					.filter(|v| *v > 0)
					.unwrap_or(PersistenceSettings::default().queue_capacity),
			},
		}
	}
}

fn parse_env_bool(v: &str) -> Option<bool> {
	match v.trim().to_ascii_lowercase().as_str() {
		"1" | "true" | "yes" | "on" => Some(true),
		"0" | "false" | "no" | "off" => Some(false),
		_ => None,
	}
}

fn read_toml_if_exists(path: &Path) -> anyhow::Result<Option<FileConfig>> {
	match fs::read_to_string(path) {
		Ok(s) => {
			let cfg: FileConfig = toml::from_str(&s).context("parse TOML")?;
			Ok(Some(cfg))
		}
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(anyhow!(e).context("read config file")),
	}
}

fn apply_env_overrides(cfg: &mut ServerConfig) {
	if let Ok(v) = std::env::var("HUDDLE_METRICS_BIND") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.server.metrics_bind = Some(v);
			info!("server config: metrics_bind overridden by env");
		}
	}

	if let Ok(v) = std::env::var("HUDDLE_HTTP_BIND") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.server.http_bind = Some(v);
			info!("server config: http_bind overridden by env");
		}
	}

	if let Ok(v) = std::env::var("HUDDLE_AUTH_HMAC_SECRET") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.server.auth_hmac_secret = Some(SecretString::new(v));
			info!("server auth: auth_hmac_secret overridden by env");
		}
	}

	if let Ok(v) = std::env::var("HUDDLE_MAX_FRAME_BYTES")
		&& let Ok(bytes) = v.trim().parse::<usize>()
		&& bytes > 0
	{
		cfg.server.max_frame_bytes = bytes;
		info!(bytes, "server config: max_frame_bytes overridden by env");
	}

	if let Ok(v) = std::env::var("HUDDLE_OUTBOUND_QUEUE_CAPACITY")
		&& let Ok(capacity) = v.trim().parse::<usize>()
		&& capacity > 0
	{
		cfg.server.outbound_queue_capacity = capacity;
		info!(capacity, "server config: outbound_queue_capacity overridden by env");
	}

	if let Ok(v) = std::env::var("HUDDLE_HUB_SHARD_COUNT")
		&& let Ok(shards) = v.trim().parse::<usize>()
		&& shards > 0
	{
		cfg.hub.shard_count = shards;
		info!(shards, "server config: hub shard_count overridden by env");
	}

	if let Ok(v) = std::env::var("HUDDLE_PERSISTENCE_ENABLED")
		&& let Some(enabled) = parse_env_bool(&v)
	{
		cfg.persistence.enabled = enabled;
		info!(enabled, "persistence: enabled overridden by env");
	}

	if let Ok(v) = std::env::var("HUDDLE_PERSISTENCE_DATABASE_URL") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.persistence.database_url = Some(v);
			info!("persistence: database_url overridden by env");
		}
	}

	if let Ok(v) = std::env::var("HUDDLE_PERSISTENCE_QUEUE_CAPACITY")
		&& let Ok(capacity) = v.trim().parse::<usize>()
		&& capacity > 0
	{
		cfg.persistence.queue_capacity = capacity;
		info!(capacity, "persistence: queue_capacity overridden by env");
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn from_file_applies_defaults_for_missing_sections() {
		let cfg = ServerConfig::from_file(toml::from_str("").unwrap());
		assert_eq!(cfg.hub.shard_count, 16);
		assert_eq!(cfg.persistence.queue_capacity, 1024);
		assert!(!cfg.persistence.enabled);
		assert!(cfg.server.http_bind.is_none());
	}

	#[test]
	fn from_file_reads_sections() {
		let raw = r#"
			[server]
			http_bind = "127.0.0.1:18304"
			auth_hmac_secret = "s3cret"

			[hub]
			shard_count = 4

			[persistence]
			enabled = true
			database_url = "sqlite::memory:"
		"#;
		let cfg = ServerConfig::from_file(toml::from_str(raw).unwrap());
		assert_eq!(cfg.server.http_bind.as_deref(), Some("127.0.0.1:18304"));
		assert!(cfg.server.auth_hmac_secret.is_some());
		assert_eq!(cfg.hub.shard_count, 4);
		assert!(cfg.persistence.enabled);
	}

	#[test]
	fn blank_strings_are_treated_as_unset() {
		let raw = "[server]\nhttp_bind = \"  \"\n";
		let cfg = ServerConfig::from_file(toml::from_str(raw).unwrap());
		assert!(cfg.server.http_bind.is_none());
	}

	#[test]
	fn env_bool_parsing() {
		assert_eq!(parse_env_bool("TRUE"), Some(true));
		assert_eq!(parse_env_bool("off"), Some(false));
		assert_eq!(parse_env_bool("maybe"), None);
	}
}
