#![forbid(unsafe_code)]

use std::net::SocketAddr;

/// Parse a `ws://host:port` bind endpoint into a socket address. The host
/// must be an IP literal (bracketed for IPv6); DNS names are not resolved
/// for a bind address.
pub fn parse_bind_endpoint(s: &str) -> Result<SocketAddr, String> {
	let s = s.trim();
	if s.is_empty() {
		return Err("bind endpoint must be non-empty (expected ws://host:port)".to_string());
	}

	let rest = s
		.strip_prefix("ws://")
		.ok_or_else(|| format!("invalid bind endpoint (expected ws://host:port): {s}"))?;

	if rest.contains('/') || rest.contains('?') || rest.contains('#') {
		return Err(format!(
			"invalid bind endpoint (expected ws://host:port without path/query/fragment): {s}"
		));
	}

	rest.parse()
		.map_err(|_| format!("invalid bind endpoint (host must be an IP literal with a port, like ws://127.0.0.1:18303): {s}"))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_ipv4_and_bracketed_ipv6() {
		let addr = parse_bind_endpoint("ws://127.0.0.1:18303").unwrap();
		assert_eq!(addr.to_string(), "127.0.0.1:18303");

		let addr = parse_bind_endpoint("ws://[::1]:18303").unwrap();
		assert!(addr.is_ipv6());
		assert_eq!(addr.port(), 18303);
	}

	#[test]
	fn rejects_other_schemes_paths_and_partial_addresses() {
		assert!(parse_bind_endpoint("http://127.0.0.1:80").is_err());
		assert!(parse_bind_endpoint("ws://127.0.0.1:80/chat").is_err());
		assert!(parse_bind_endpoint("ws://127.0.0.1").is_err());
		assert!(parse_bind_endpoint("ws://:80").is_err());
		assert!(parse_bind_endpoint("").is_err());
	}

	#[test]
	fn rejects_dns_names_for_bind() {
		assert!(parse_bind_endpoint("ws://localhost:18303").is_err());
	}
}
