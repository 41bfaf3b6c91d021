//! Device model

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use chrono::{DateTime, Utc};
use validator::Validate;

/// Enforcement state of a device. Stored as text in the `devices` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceStatus {
    Allowed,
    Blocked,
    Maintenance,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::Allowed => "Allowed",
            DeviceStatus::Blocked => "Blocked",
            DeviceStatus::Maintenance => "Maintenance",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Allowed" => Some(DeviceStatus::Allowed),
            "Blocked" => Some(DeviceStatus::Blocked),
            "Maintenance" => Some(DeviceStatus::Maintenance),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Device {
    pub id: i64,
    pub name: String,
    pub ip_address: String,
    pub location: String,
    pub status: String,
    /// Hub devices represent core infrastructure and cannot be deleted
    pub is_hub: bool,
    pub detected_at: DateTime<Utc>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateDeviceRequest {
    #[validate(length(min = 1, message = "Device name is required"))]
    pub name: String,
    #[validate(length(min = 1, message = "IP address is required"))]
    pub ip_address: String,
    pub location: Option<String>,
    pub status: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateDeviceRequest {
    pub name: Option<String>,
    pub ip_address: Option<String>,
    pub location: Option<String>,
    pub status: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// Column values for a device insert, after intake has settled the status.
#[derive(Debug, Clone)]
pub struct NewDevice {
    pub name: String,
    pub ip_address: String,
    pub location: String,
    pub status: DeviceStatus,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl Device {
    pub async fn insert(pool: &PgPool, data: &NewDevice) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Device>(
            r#"
            INSERT INTO devices (name, ip_address, location, status, latitude, longitude)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(&data.name)
        .bind(&data.ip_address)
        .bind(&data.location)
        .bind(data.status.as_str())
        .bind(data.latitude)
        .bind(data.longitude)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(pool: &PgPool, id: i64) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Device>("SELECT * FROM devices WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// List devices, optionally filtered by a case-insensitive keyword over
    /// name, address, location, and status. Ordered by id.
    pub async fn search(pool: &PgPool, keyword: Option<&str>) -> Result<Vec<Self>, sqlx::Error> {
        match keyword {
            Some(kw) if !kw.is_empty() => {
                let pattern = format!("%{}%", kw);
                sqlx::query_as::<_, Device>(
                    r#"
                    SELECT * FROM devices
                    WHERE name ILIKE $1 OR ip_address ILIKE $1 OR location ILIKE $1 OR status ILIKE $1
                    ORDER BY id
                    "#,
                )
                .bind(pattern)
                .fetch_all(pool)
                .await
            }
            _ => {
                sqlx::query_as::<_, Device>("SELECT * FROM devices ORDER BY id")
                    .fetch_all(pool)
                    .await
            }
        }
    }

    pub async fn existing_addresses(pool: &PgPool) -> Result<Vec<String>, sqlx::Error> {
        sqlx::query_scalar::<_, String>("SELECT ip_address FROM devices")
            .fetch_all(pool)
            .await
    }

    /// Partial update. `detected_at` is refreshed unconditionally; absent
    /// fields keep their stored values. Returns None for an unknown id.
    pub async fn update(
        pool: &PgPool,
        id: i64,
        patch: &UpdateDeviceRequest,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Device>(
            r#"
            UPDATE devices
            SET name = COALESCE($2, name),
                ip_address = COALESCE($3, ip_address),
                location = COALESCE($4, location),
                status = COALESCE($5, status),
                latitude = COALESCE($6, latitude),
                longitude = COALESCE($7, longitude),
                detected_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&patch.name)
        .bind(&patch.ip_address)
        .bind(&patch.location)
        .bind(&patch.status)
        .bind(patch.latitude)
        .bind(patch.longitude)
        .fetch_optional(pool)
        .await
    }

    pub async fn delete(pool: &PgPool, id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM devices WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_coordinates_survive_the_wire_exactly() {
        let device = Device {
            id: 1,
            name: "Core Router".to_string(),
            ip_address: "10.0.0.1".to_string(),
            location: "Data Center".to_string(),
            status: "Allowed".to_string(),
            is_hub: true,
            detected_at: Utc::now(),
            latitude: Some(-6.938138733645462),
            longitude: Some(107.66116659273092),
        };

        let json = serde_json::to_string(&device).unwrap();
        let back: Device = serde_json::from_str(&json).unwrap();
        assert_eq!(back.latitude, Some(-6.938138733645462));
        assert_eq!(back.longitude, Some(107.66116659273092));
    }

    #[test]
    fn test_status_round_trip() {
        for status in [DeviceStatus::Allowed, DeviceStatus::Blocked, DeviceStatus::Maintenance] {
            assert_eq!(DeviceStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(DeviceStatus::parse("Quarantined"), None);
        assert_eq!(DeviceStatus::parse("allowed"), None);
    }

    #[test]
    fn test_create_request_requires_name_and_address() {
        let req = CreateDeviceRequest {
            name: String::new(),
            ip_address: "10.0.0.5".to_string(),
            location: None,
            status: None,
            latitude: None,
            longitude: None,
        };
        assert!(req.validate().is_err());

        let req = CreateDeviceRequest {
            name: "Sensor-9".to_string(),
            ip_address: "10.0.0.99".to_string(),
            location: None,
            status: None,
            latitude: None,
            longitude: None,
        };
        assert!(req.validate().is_ok());
    }
}
