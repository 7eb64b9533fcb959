//! Key generation utilities for rate limiting.

use crate::throttle_config::ThrottleConfig;
use axum::extract::{ConnectInfo, MatchedPath};
use axum::http::request::Parts;
use axum::http::HeaderMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

/// Placeholder in custom identities replaced by `<route>/<client address>`.
pub const ROUTE_IP_PLACEHOLDER: &str = "route/ip";

/// Custom identity function. Returning `None` exempts the request.
pub type KeyFn = Arc<dyn Fn(&ThrottleConfig, &Parts) -> Option<String> + Send + Sync>;

/// Strategy for identifying who is being limited
#[derive(Clone, Default)]
pub enum KeyStrategy {
    /// Limiting switched off
    Disabled,
    /// Use client IP address
    #[default]
    ClientAddress,
    /// Caller supplied identity
    Custom(KeyFn),
}

impl KeyStrategy {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&ThrottleConfig, &Parts) -> Option<String> + Send + Sync + 'static,
    {
        KeyStrategy::Custom(Arc::new(f))
    }
}

impl fmt::Debug for KeyStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyStrategy::Disabled => f.write_str("Disabled"),
            KeyStrategy::ClientAddress => f.write_str("ClientAddress"),
            KeyStrategy::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl From<bool> for KeyStrategy {
    fn from(enabled: bool) -> Self {
        if enabled {
            KeyStrategy::ClientAddress
        } else {
            KeyStrategy::Disabled
        }
    }
}

/// Generates decision keys from request identity
pub struct KeyGenerator;

impl KeyGenerator {
    /// Decision key for a request, or `None` when it must bypass limiting.
    pub fn derive(config: &ThrottleConfig, parts: &Parts, algorithm_id: &str) -> Option<String> {
        if config.rate.is_none() {
            return None;
        }

        let identity = match &config.key {
            KeyStrategy::Disabled => return None,
            KeyStrategy::ClientAddress => Self::client_address(parts, config.trust_proxy),
            KeyStrategy::Custom(key_fn) => {
                let raw = key_fn(config, parts)?;
                Self::normalize(&raw, parts, config.trust_proxy)
            }
        };

        Some(Self::digest(&config.prefix, &identity, algorithm_id))
    }

    /// Lowercase, trim and strip spaces, then expand the route/ip placeholder.
    pub fn normalize(raw: &str, parts: &Parts, trust_proxy: bool) -> String {
        let identity = raw.trim().to_lowercase().replace(' ', "");
        if !identity.contains(ROUTE_IP_PLACEHOLDER) {
            return identity;
        }

        let route = parts
            .extensions
            .get::<MatchedPath>()
            .map(|matched| matched.as_str().to_string())
            .unwrap_or_else(|| parts.uri.path().to_string());
        let expansion = format!("{}/{}", route, Self::client_address(parts, trust_proxy));
        identity.replace(ROUTE_IP_PLACEHOLDER, &expansion)
    }

    /// 128-bit digest of prefix, identity and algorithm as lowercase hex.
    pub fn digest(prefix: &str, identity: &str, algorithm_id: &str) -> String {
        format!("{:x}", md5::compute(format!("{}{}{}", prefix, identity, algorithm_id)))
    }

    /// Real client address. Forwarding headers only count when the proxy in
    /// front of us is trusted; otherwise the socket peer is used.
    pub fn client_address(parts: &Parts, trust_proxy: bool) -> String {
        if trust_proxy {
            if let Some(ip) = Self::forwarded_ip(&parts.headers) {
                return ip;
            }
        }

        parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .or_else(|| {
                parts
                    .extensions
                    .get::<SocketAddr>()
                    .map(|addr| addr.ip().to_string())
            })
            .unwrap_or_else(|| "unknown".to_string())
    }

    fn forwarded_ip(headers: &HeaderMap) -> Option<String> {
        headers
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
            .and_then(|xff| xff.split(',').next())
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
            .or_else(|| {
                headers
                    .get("x-real-ip")
                    .and_then(|value| value.to_str().ok())
                    .map(str::trim)
                    .filter(|ip| !ip.is_empty())
            })
            .map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;

    fn parts_from(request: Request<Body>) -> Parts {
        request.into_parts().0
    }

    fn peer_request(path: &str, peer: &str) -> Request<Body> {
        let mut request = Request::builder().uri(path).body(Body::empty()).unwrap();
        let addr: SocketAddr = peer.parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(addr));
        request
    }

    fn limited_config() -> ThrottleConfig {
        ThrottleConfig {
            rate: Some("10/m".to_string()),
            ..ThrottleConfig::default()
        }
    }

    #[test]
    fn test_client_address_strategy() {
        let config = limited_config();
        let parts = parts_from(peer_request("/api", "192.168.1.1:5000"));

        let key = KeyGenerator::derive(&config, &parts, "fixed_window").unwrap();
        assert_eq!(key, KeyGenerator::digest("throttle_", "192.168.1.1", "fixed_window"));
        assert_eq!(key.len(), 32);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_derivation_is_idempotent() {
        let config = limited_config();
        let parts = parts_from(peer_request("/api", "10.0.0.7:1234"));

        let first = KeyGenerator::derive(&config, &parts, "fixed_window");
        let second = KeyGenerator::derive(&config, &parts, "fixed_window");
        assert_eq!(first, second);
    }

    #[test]
    fn test_algorithm_and_prefix_separate_keys() {
        let a = KeyGenerator::digest("throttle_", "1.2.3.4", "fixed_window");
        let b = KeyGenerator::digest("throttle_", "1.2.3.4", "token_bucket");
        let c = KeyGenerator::digest("other_", "1.2.3.4", "fixed_window");
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_digest_is_md5_hex() {
        assert_eq!(
            KeyGenerator::digest("", "", ""),
            "d41d8cd98f00b204e9800998ecf8427e"
        );
    }

    #[test]
    fn test_no_rate_or_disabled_bypasses() {
        let parts = parts_from(peer_request("/api", "10.0.0.1:80"));

        let no_rate = ThrottleConfig::default();
        assert!(KeyGenerator::derive(&no_rate, &parts, "fixed_window").is_none());

        let disabled = ThrottleConfig {
            key: KeyStrategy::Disabled,
            ..limited_config()
        };
        assert!(KeyGenerator::derive(&disabled, &parts, "fixed_window").is_none());
    }

    #[test]
    fn test_custom_strategy_normalizes_identity() {
        let config = ThrottleConfig {
            key: KeyStrategy::custom(|_, parts| {
                parts
                    .headers
                    .get("x-api-key")
                    .and_then(|v| v.to_str().ok())
                    .map(|v| format!("  Api Key {}  ", v))
            }),
            ..limited_config()
        };

        let mut request = peer_request("/api", "10.0.0.1:80");
        request
            .headers_mut()
            .insert("x-api-key", "ABC".parse().unwrap());
        let parts = parts_from(request);

        let key = KeyGenerator::derive(&config, &parts, "fixed_window").unwrap();
        assert_eq!(key, KeyGenerator::digest("throttle_", "apikeyabc", "fixed_window"));
    }

    #[test]
    fn test_custom_strategy_returning_none_bypasses() {
        let config = ThrottleConfig {
            key: KeyStrategy::custom(|_, _| None),
            ..limited_config()
        };
        let parts = parts_from(peer_request("/api", "10.0.0.1:80"));
        assert!(KeyGenerator::derive(&config, &parts, "fixed_window").is_none());
    }

    #[test]
    fn test_route_ip_placeholder_expansion() {
        let parts = parts_from(peer_request("/Orders/42", "172.16.0.9:443"));
        let identity = KeyGenerator::normalize("User:7:Route/IP", &parts, false);
        assert_eq!(identity, "user:7:/Orders/42/172.16.0.9");
    }

    #[test]
    fn test_proxy_headers_need_trust() {
        let mut request = peer_request("/", "10.0.0.1:80");
        request
            .headers_mut()
            .insert("x-forwarded-for", "203.0.113.5, 10.0.0.1".parse().unwrap());
        let parts = parts_from(request);

        assert_eq!(KeyGenerator::client_address(&parts, false), "10.0.0.1");
        assert_eq!(KeyGenerator::client_address(&parts, true), "203.0.113.5");
    }

    #[test]
    fn test_real_ip_header_fallback() {
        let mut request = Request::builder().uri("/").body(Body::empty()).unwrap();
        request
            .headers_mut()
            .insert("x-real-ip", "198.51.100.2".parse().unwrap());
        let parts = parts_from(request);

        assert_eq!(KeyGenerator::client_address(&parts, true), "198.51.100.2");
        assert_eq!(KeyGenerator::client_address(&parts, false), "unknown");
    }
}
