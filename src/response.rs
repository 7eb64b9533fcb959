use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: u64,
    pub version: String,
    pub store: String,
    pub algorithm: String,
    pub store_connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HealthResponse {
    pub fn healthy(store: &str, algorithm: &str) -> Self {
        Self {
            status: "healthy".to_string(),
            timestamp: now_secs(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            store: store.to_string(),
            algorithm: algorithm.to_string(),
            store_connected: true,
            error: None,
        }
    }

    pub fn unhealthy(store: &str, algorithm: &str, error: String) -> Self {
        Self {
            status: "unhealthy".to_string(),
            timestamp: now_secs(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            store: store.to_string(),
            algorithm: algorithm.to_string(),
            store_connected: false,
            error: Some(error),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_serialization() {
        let json = serde_json::to_value(HealthResponse::healthy("memory", "fixed_window")).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["store"], "memory");
        assert_eq!(json["algorithm"], "fixed_window");
        assert!(json.get("error").is_none());

        let json = serde_json::to_value(HealthResponse::unhealthy("redis", "fixed_window", "refused".into())).unwrap();
        assert_eq!(json["store_connected"], false);
        assert_eq!(json["error"], "refused");
    }
}
