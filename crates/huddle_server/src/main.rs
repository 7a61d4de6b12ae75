#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use huddle_domain::ConnId;
use huddle_server::config;
use huddle_server::server::connection::{ConnectionSettings, handle_connection};
use huddle_server::server::http::{HealthState, HttpState, spawn_http_server};
use huddle_server::server::registry::SessionRegistry;
use huddle_server::server::room_hub::{RoomHub, RoomHubConfig};
use huddle_server::server::router::EventRouter;
use huddle_server::server::store::{MessageStore, PersistHandle, spawn_writer};
use huddle_server::util::endpoint::parse_bind_endpoint;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: huddle_server [--bind ws://host:port]\n\
\n\
Options:\n\
\t--bind    Bind endpoint (default: ws://127.0.0.1:18303)\n\
\t         Format: ws://host:port\n\
\t--help   Show this help\n\
"
	);
	std::process::exit(2)
}

fn parse_args() -> SocketAddr {
	let mut bind_endpoint = "ws://127.0.0.1:18303".to_string();

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"--bind" | "--listen" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if v.trim().is_empty() {
					eprintln!("--bind must be non-empty (expected ws://host:port)");
					usage_and_exit();
				}
				bind_endpoint = v;
			}
			other => {
				eprintln!("Unknown argument: {other}");
				usage_and_exit();
			}
		}
	}

	parse_bind_endpoint(&bind_endpoint).unwrap_or_else(|e| {
		eprintln!("{e}");
		usage_and_exit();
	})
}

fn init_tracing() {
	let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,huddle_server=debug".to_string());

	let otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
		.ok()
		.map(|v| v.trim().to_string())
		.filter(|v| !v.is_empty());
	let base = tracing_subscriber::registry()
		.with(tracing_subscriber::EnvFilter::new(filter))
		.with(tracing_subscriber::fmt::layer().with_target(false));

	if let Some(endpoint) = otlp_endpoint {
		use opentelemetry::global;
		use opentelemetry::trace::TracerProvider as _;
		use opentelemetry_otlp::WithExportConfig;

		match opentelemetry_otlp::SpanExporter::builder()
			.with_tonic()
			.with_endpoint(endpoint.clone())
			.build()
		{
			Ok(exporter) => {
				let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
					.with_batch_exporter(exporter)
					.build();
				let tracer = tracer_provider.tracer("huddle_server");
				global::set_tracer_provider(tracer_provider);

				let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
				base.with(otel_layer).init();
				info!(endpoint = %endpoint, "otlp tracing enabled");
			}
			Err(e) => {
				base.init();
				warn!(error = %e, "failed to initialize otlp tracing");
			}
		}
	} else {
		base.init();
	}
}

fn init_metrics(bind: Option<&str>) {
	let Some(bind) = bind else {
		return;
	};

	match bind.parse::<std::net::SocketAddr>() {
		Ok(addr) => {
			if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new()
				.with_http_listener(addr)
				.install()
			{
				warn!(error = %e, "failed to start metrics exporter");
			} else {
				info!(%addr, "metrics exporter listening");
			}
		}
		Err(e) => {
			warn!(error = %e, %bind, "invalid metrics bind address (expected host:port)");
		}
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_tracing();

	let bind_addr = parse_args();

	let config_path = config::default_config_path()?;
	let server_cfg = config::load_server_config_from_path(&config_path)?;
	info!(path = %config_path.display(), "loaded server config (toml + env overrides)");

	init_metrics(server_cfg.server.metrics_bind.as_deref());

	let persist = if server_cfg.persistence.enabled {
		let Some(database_url) = server_cfg.persistence.database_url.as_deref() else {
			return Err(anyhow::anyhow!("persistence enabled but no database_url configured"));
		};
		let store = MessageStore::connect(database_url).await?;
		info!("message store connected");
		spawn_writer(Arc::new(store), server_cfg.persistence.queue_capacity)
	} else {
		PersistHandle::disabled()
	};

	let registry = SessionRegistry::new(server_cfg.hub.shard_count);
	let hub = RoomHub::new(RoomHubConfig {
		shard_count: server_cfg.hub.shard_count,
		debug_logs: cfg!(debug_assertions),
	});
	let router = EventRouter::new(registry, hub, persist, server_cfg.server.max_frame_bytes);

	let health_state = HealthState::new();
	if let Some(bind) = server_cfg.server.http_bind.as_deref() {
		match bind.parse::<std::net::SocketAddr>() {
			Ok(addr) => {
				if server_cfg.server.auth_hmac_secret.is_none() {
					warn!("event publish endpoint has no auth_hmac_secret; publishing is unauthenticated");
				}
				spawn_http_server(
					addr,
					HttpState {
						health: health_state.clone(),
						router: router.clone(),
						publish_secret: server_cfg.server.auth_hmac_secret.clone(),
					},
				);
				info!(%addr, "http server listening");
			}
			Err(e) => warn!(error = %e, %bind, "invalid http bind address (expected host:port)"),
		}
	}

	let conn_settings = ConnectionSettings {
		outbound_queue_capacity: server_cfg.server.outbound_queue_capacity,
	};

	let listener = TcpListener::bind(bind_addr).await?;
	info!(bind = %bind_addr, "huddle_server: websocket endpoint ready");

	health_state.mark_ready();

	let mut next_conn_id: u64 = 1;

	loop {
		let (stream, remote) = listener.accept().await?;

		let conn_id = ConnId::new(next_conn_id);
		next_conn_id += 1;
		metrics::counter!("huddle_connections_total").increment(1);

		let router = router.clone();
		let conn_settings = conn_settings.clone();

		tokio::spawn(async move {
			if let Err(e) = handle_connection(conn_id, stream, remote, router, conn_settings).await {
				warn!(%conn_id, error = %e, "connection handler exited with error");
			}
		});
	}
}
