#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use huddle_domain::GroupId;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::Value;
use tokio::net::TcpListener;
use tracing::{debug, warn};

use crate::server::auth;
use crate::server::router::EventRouter;
use crate::util::secret::SecretString;

#[derive(Clone, Default)]
pub struct HealthState {
	ready: Arc<AtomicBool>,
}

impl HealthState {
	pub fn new() -> Self {
		Self {
			ready: Arc::new(AtomicBool::new(false)),
		}
	}

	pub fn mark_ready(&self) {
		self.ready.store(true, Ordering::Relaxed);
	}

	pub fn is_ready(&self) -> bool {
		self.ready.load(Ordering::Relaxed)
	}
}

/// Shared state of the HTTP sidecar: health probes plus the system event
/// publish endpoint.
#[derive(Clone)]
pub struct HttpState {
	pub health: HealthState,
	pub router: EventRouter,
	pub publish_secret: Option<SecretString>,
}

pub fn spawn_http_server(bind: SocketAddr, state: HttpState) {
	tokio::spawn(async move {
		if let Err(err) = run_http_server(bind, state).await {
			warn!(error = %err, "http server stopped");
		}
	});
}

async fn run_http_server(bind: SocketAddr, state: HttpState) -> anyhow::Result<()> {
	let listener = TcpListener::bind(bind).await?;
	loop {
		let (stream, _addr) = listener.accept().await?;
		let io = TokioIo::new(stream);
		let state = state.clone();
		tokio::spawn(async move {
			let service = service_fn(move |req| handle_request(req, state.clone()));
			if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
				warn!(error = %err, "http connection error");
			}
		});
	}
}

async fn handle_request(req: Request<Incoming>, state: HttpState) -> Result<Response<Full<Bytes>>, hyper::Error> {
	let path = req.uri().path().to_string();

	match (req.method().clone(), path.as_str()) {
		(Method::GET, "/healthz") => Ok(Response::builder()
			.status(StatusCode::OK)
			.body(Full::new(Bytes::from_static(b"ok")))
			.unwrap()),
		(Method::GET, "/readyz") => {
			if state.health.is_ready() {
				Ok(Response::builder()
					.status(StatusCode::OK)
					.body(Full::new(Bytes::from_static(b"ready")))
					.unwrap())
			} else {
				Ok(Response::builder()
					.status(StatusCode::SERVICE_UNAVAILABLE)
					.body(Full::new(Bytes::from_static(b"not-ready")))
					.unwrap())
			}
		}
		(Method::POST, p) if p.starts_with("/v1/groups/") => handle_publish(req, &path, state).await,
		_ => Ok(Response::builder()
			.status(StatusCode::NOT_FOUND)
			.body(Full::new(Bytes::new()))
			.unwrap()),
	}
}

/// `POST /v1/groups/{groupId}/events` — publish a system event to a group's
/// room. Responds 202 with the delivered count; delivery is best-effort and
/// an empty room delivers to no one.
async fn handle_publish(req: Request<Incoming>, path: &str, state: HttpState) -> Result<Response<Full<Bytes>>, hyper::Error> {
	let Some(group) = parse_events_path(path) else {
		return Ok(plain(StatusCode::NOT_FOUND, ""));
	};

	if let Some(secret) = &state.publish_secret {
		let token = req
			.headers()
			.get(hyper::header::AUTHORIZATION)
			.and_then(|v| v.to_str().ok())
			.and_then(|v| v.strip_prefix("Bearer "));

		let authorized = token
			.and_then(|t| auth::verify_hmac_token(t, secret.expose()).ok())
			.is_some_and(|claims| claims.allows_publish());

		if !authorized {
			debug!(%group, "event publish rejected: missing or invalid token");
			return Ok(plain(StatusCode::UNAUTHORIZED, "unauthorized"));
		}
	}

	let body = req.into_body().collect().await?.to_bytes();

	let Ok(Value::Object(mut payload)) = serde_json::from_slice::<Value>(&body) else {
		return Ok(plain(StatusCode::BAD_REQUEST, "body must be a JSON object"));
	};

	let Some(Value::String(event)) = payload.remove("event") else {
		return Ok(plain(StatusCode::BAD_REQUEST, "missing \"event\" field"));
	};

	let delivered = state.router.publish_system_event(group, &event, payload);

	Ok(Response::builder()
		.status(StatusCode::ACCEPTED)
		.header(hyper::header::CONTENT_TYPE, "application/json")
		.body(Full::new(Bytes::from(format!("{{\"delivered\":{delivered}}}"))))
		.unwrap())
}

fn parse_events_path(path: &str) -> Option<GroupId> {
	let rest = path.strip_prefix("/v1/groups/")?;
	let (group, tail) = rest.split_once('/')?;
	if tail != "events" {
		return None;
	}
	GroupId::from_str(group).ok()
}

fn plain(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
	Response::builder().status(status).body(Full::new(Bytes::from_static(body.as_bytes()))).unwrap()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_events_path() {
		assert_eq!(parse_events_path("/v1/groups/7/events"), Some(GroupId::new(7).unwrap()));
		assert_eq!(parse_events_path("/v1/groups/0/events"), None);
		assert_eq!(parse_events_path("/v1/groups/7/messages"), None);
		assert_eq!(parse_events_path("/v1/groups/abc/events"), None);
		assert_eq!(parse_events_path("/v1/groups/7"), None);
	}
}
