//! Liveness probe

use axum::Json;
use serde_json::{json, Value};

/// Public probe: reports the service name and build version so operators
/// can tell which deployment answered.
pub async fn check() -> Json<Value> {
    Json(json!({
        "service": "netwatch",
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().timestamp(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_probe_names_the_service() {
        let Json(body) = check().await;
        assert_eq!(body["service"], "netwatch");
        assert_eq!(body["status"], "healthy");
        assert!(body["timestamp"].as_i64().unwrap() > 0);
    }
}
