//! Threat intelligence model
//!
//! Read-only lookup table of known-malicious addresses. Rows are maintained
//! by an external feed; this service only ever queries them during intake.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ThreatRecord {
    pub ip_address: String,
    pub threat_type: String,
}

impl ThreatRecord {
    pub async fn find_by_ip(pool: &PgPool, ip_address: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, ThreatRecord>(
            "SELECT ip_address, threat_type FROM threat_intelligence WHERE ip_address = $1",
        )
        .bind(ip_address)
        .fetch_optional(pool)
        .await
    }
}
