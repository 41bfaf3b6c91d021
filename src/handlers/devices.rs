//! Device handlers
//!
//! Intake (create) is the threat-aware path: every new device is checked
//! against the threat intelligence table, and a match forces its status to
//! Blocked no matter what the caller asked for. Every intake and delete
//! outcome leaves at most one activity log entry behind; the settlement
//! functions below decide which, so the pairing of response and log entry
//! is checked without a live store.

use axum::{extract::{State, Path, Query}, http::StatusCode, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use validator::Validate;

use crate::{AppState, AppResult, AppError};
use crate::error::is_unique_violation;
use crate::models::{
    Device, DeviceStatus, CreateDeviceRequest, UpdateDeviceRequest, NewDevice,
    ThreatRecord, LogLevel, log_activity,
};

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub q: Option<String>,
}

/// List devices, optionally filtered by keyword
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Value>> {
    let devices = Device::search(&state.pool, query.q.as_deref()).await?;
    Ok(Json(json!({ "success": true, "devices": devices })))
}

/// Get single device
pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<Value>> {
    let device = Device::find_by_id(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Device with ID {} not found", id)))?;

    Ok(Json(json!({ "success": true, "device": device })))
}

/// Create device (threat-aware intake)
pub async fn create(
    State(state): State<AppState>,
    Json(req): Json<CreateDeviceRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    req.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let requested = parse_status(req.status.as_deref())?;

    if req.latitude.is_some() != req.longitude.is_some() {
        return Err(AppError::Validation(
            "Latitude and longitude must be provided together".to_string(),
        ));
    }

    let threat = ThreatRecord::find_by_ip(&state.pool, &req.ip_address).await?;
    let outcome = settle_intake(requested, threat.as_ref(), &req.name, &req.ip_address);

    let new_device = NewDevice {
        name: req.name.clone(),
        ip_address: req.ip_address.clone(),
        location: req.location.clone().unwrap_or_default(),
        status: outcome.status,
        latitude: req.latitude,
        longitude: req.longitude,
    };

    let result = match Device::insert(&state.pool, &new_device).await {
        Ok(device) => IntakeResult::Created(device),
        Err(err) if is_unique_violation(&err) => IntakeResult::Duplicate,
        Err(err) => IntakeResult::Failed(err),
    };

    let (created, log) = intake_response(result, outcome.log, &req.name);
    if let Some(draft) = log {
        log_activity(&state.pool, draft.level, &draft.message).await;
    }

    let device = created?;
    Ok((StatusCode::CREATED, Json(json!({ "success": true, "device": device }))))
}

/// Update device (partial patch, refreshes detected_at)
pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(patch): Json<UpdateDeviceRequest>,
) -> AppResult<Json<Value>> {
    if let Some(status) = patch.status.as_deref() {
        parse_status(Some(status))?;
    }

    // A one-sided coordinate patch is only acceptable when the stored row
    // already holds the other side
    if patch.latitude.is_some() != patch.longitude.is_some() {
        let stored = Device::find_by_id(&state.pool, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Device with ID {} not found", id)))?;
        if !coords_stay_paired(&patch, stored.latitude, stored.longitude) {
            return Err(AppError::Validation(
                "Latitude and longitude must be provided together".to_string(),
            ));
        }
    }

    match Device::update(&state.pool, id, &patch).await {
        Ok(Some(device)) => Ok(Json(json!({ "success": true, "device": device }))),
        Ok(None) => Err(AppError::NotFound(format!("Device with ID {} not found", id))),
        Err(err) if is_unique_violation(&err) => Err(AppError::Conflict(
            "This IP address is already used by another device".to_string(),
        )),
        Err(err) => Err(err.into()),
    }
}

/// Delete device
pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<Value>> {
    // Look the device up first so the log entry can name it
    let lookup = Device::find_by_id(&state.pool, id).await;
    let (found, log) = settle_delete_lookup(lookup, id);
    if let Some(draft) = log {
        log_activity(&state.pool, draft.level, &draft.message).await;
    }
    let device = found?;

    let result = Device::delete(&state.pool, id).await;
    let (message, log) = settle_delete(&device, result, id);
    if let Some(draft) = log {
        log_activity(&state.pool, draft.level, &draft.message).await;
    }

    let message = message?;
    Ok(Json(json!({ "success": true, "message": message })))
}

fn parse_status(status: Option<&str>) -> Result<DeviceStatus, AppError> {
    match status {
        Some(s) => DeviceStatus::parse(s)
            .ok_or_else(|| AppError::Validation(format!("Unknown device status: {}", s))),
        None => Ok(DeviceStatus::Allowed),
    }
}

/// An activity log entry waiting to be written
#[derive(Debug, Clone, PartialEq)]
struct LogDraft {
    level: LogLevel,
    message: String,
}

/// Result of settling an intake request against threat intelligence
#[derive(Debug)]
struct IntakeOutcome {
    status: DeviceStatus,
    log: LogDraft,
}

/// A threat match forces Blocked and composes the Warning entry; otherwise
/// the requested status stands and the entry is a plain Info.
fn settle_intake(
    requested: DeviceStatus,
    threat: Option<&ThreatRecord>,
    name: &str,
    ip_address: &str,
) -> IntakeOutcome {
    match threat {
        Some(threat) => IntakeOutcome {
            status: DeviceStatus::Blocked,
            log: LogDraft {
                level: LogLevel::Warning,
                message: format!(
                    "Device \"{}\" ({}) automatically blocked. Reason: {}.",
                    name, ip_address, threat.threat_type
                ),
            },
        },
        None => IntakeOutcome {
            status: requested,
            log: LogDraft {
                level: LogLevel::Info,
                message: format!("Device \"{}\" added.", name),
            },
        },
    }
}

/// How the insert went
#[derive(Debug)]
enum IntakeResult {
    Created(Device),
    Duplicate,
    Failed(sqlx::Error),
}

/// Map the insert result to a response and at most one log entry. A
/// duplicate address produces neither a device nor a log entry; a store
/// failure trades the success entry for a Critical one.
fn intake_response(
    result: IntakeResult,
    success_log: LogDraft,
    name: &str,
) -> (Result<Device, AppError>, Option<LogDraft>) {
    match result {
        IntakeResult::Created(device) => (Ok(device), Some(success_log)),
        IntakeResult::Duplicate => (
            Err(AppError::Conflict(
                "A device with this IP address already exists".to_string(),
            )),
            None,
        ),
        IntakeResult::Failed(err) => (
            Err(AppError::Database(err.to_string())),
            Some(LogDraft {
                level: LogLevel::Critical,
                message: format!("Failed to add device \"{}\": {}", name, err),
            }),
        ),
    }
}

/// The UPDATE coalesces each coordinate independently against the stored
/// row; the patched row must end up with both coordinates or neither.
fn coords_stay_paired(
    patch: &UpdateDeviceRequest,
    stored_lat: Option<f64>,
    stored_lng: Option<f64>,
) -> bool {
    let lat = patch.latitude.or(stored_lat);
    let lng = patch.longitude.or(stored_lng);
    lat.is_some() == lng.is_some()
}

/// Settle the lookup stage of a delete. Missing devices and hub refusals
/// produce no log entry; a failed lookup leaves a Critical one.
fn settle_delete_lookup(
    lookup: Result<Option<Device>, sqlx::Error>,
    id: i64,
) -> (Result<Device, AppError>, Option<LogDraft>) {
    match lookup {
        // Hub devices represent core infrastructure; refusal happens here,
        // not in any UI layer
        Ok(Some(device)) if device.is_hub => (
            Err(AppError::Forbidden("The hub device cannot be deleted".to_string())),
            None,
        ),
        Ok(Some(device)) => (Ok(device), None),
        Ok(None) => (
            Err(AppError::NotFound(format!("Device with ID {} not found", id))),
            None,
        ),
        Err(err) => (
            Err(AppError::Database(err.to_string())),
            Some(LogDraft {
                level: LogLevel::Critical,
                message: format!("Failed to delete device {}: {}", id, err),
            }),
        ),
    }
}

/// Settle the delete itself: success leaves one Info entry naming the
/// device, failure a Critical one.
fn settle_delete(
    device: &Device,
    result: Result<bool, sqlx::Error>,
    id: i64,
) -> (Result<String, AppError>, Option<LogDraft>) {
    match result {
        Ok(true) => {
            let message = format!("Device \"{}\" deleted.", device.name);
            let draft = LogDraft {
                level: LogLevel::Info,
                message: message.clone(),
            };
            (Ok(message), Some(draft))
        }
        Ok(false) => (
            Err(AppError::NotFound(format!("Device with ID {} not found", id))),
            None,
        ),
        Err(err) => (
            Err(AppError::Database(err.to_string())),
            Some(LogDraft {
                level: LogLevel::Critical,
                message: format!("Failed to delete device \"{}\": {}", device.name, err),
            }),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn device(id: i64, name: &str, is_hub: bool) -> Device {
        Device {
            id,
            name: name.to_string(),
            ip_address: format!("10.0.0.{}", id),
            location: String::new(),
            status: "Allowed".to_string(),
            is_hub,
            detected_at: Utc::now(),
            latitude: None,
            longitude: None,
        }
    }

    fn coord_patch(lat: Option<f64>, lng: Option<f64>) -> UpdateDeviceRequest {
        UpdateDeviceRequest {
            latitude: lat,
            longitude: lng,
            ..Default::default()
        }
    }

    #[test]
    fn test_clean_address_keeps_requested_status() {
        let outcome = settle_intake(DeviceStatus::Allowed, None, "Sensor-9", "10.0.0.99");
        assert_eq!(outcome.status, DeviceStatus::Allowed);
        assert_eq!(outcome.log.level, LogLevel::Info);
        assert!(outcome.log.message.contains("Sensor-9"));
        assert!(outcome.log.message.contains("added"));
    }

    #[test]
    fn test_threat_match_forces_blocked() {
        let threat = ThreatRecord {
            ip_address: "203.0.113.5".to_string(),
            threat_type: "Botnet".to_string(),
        };

        // The caller asked for Allowed; the match overrides it
        let outcome = settle_intake(
            DeviceStatus::Allowed,
            Some(&threat),
            "Rogue-AP",
            "203.0.113.5",
        );
        assert_eq!(outcome.status, DeviceStatus::Blocked);
        assert_eq!(outcome.log.level, LogLevel::Warning);
        assert!(outcome.log.message.contains("Rogue-AP"));
        assert!(outcome.log.message.contains("203.0.113.5"));
        assert!(outcome.log.message.contains("Botnet"));
    }

    #[test]
    fn test_threat_match_overrides_every_requested_status() {
        let threat = ThreatRecord {
            ip_address: "203.0.113.5".to_string(),
            threat_type: "C2 Server".to_string(),
        };

        for requested in [
            DeviceStatus::Allowed,
            DeviceStatus::Blocked,
            DeviceStatus::Maintenance,
        ] {
            let outcome = settle_intake(requested, Some(&threat), "Rogue-AP", "203.0.113.5");
            assert_eq!(outcome.status, DeviceStatus::Blocked);
            assert_eq!(outcome.log.level, LogLevel::Warning);
        }
    }

    #[test]
    fn test_parse_status_defaults_to_allowed() {
        assert_eq!(parse_status(None).unwrap(), DeviceStatus::Allowed);
        assert_eq!(parse_status(Some("Maintenance")).unwrap(), DeviceStatus::Maintenance);
        assert!(parse_status(Some("banana")).is_err());
    }

    #[test]
    fn test_successful_intake_writes_exactly_the_composed_entry() {
        let outcome = settle_intake(DeviceStatus::Allowed, None, "Sensor-9", "10.0.0.99");
        let (created, log) = intake_response(
            IntakeResult::Created(device(7, "Sensor-9", false)),
            outcome.log.clone(),
            "Sensor-9",
        );
        assert!(created.is_ok());
        assert_eq!(log, Some(outcome.log));
    }

    #[test]
    fn test_duplicate_address_yields_conflict_and_no_log_entry() {
        let outcome = settle_intake(DeviceStatus::Allowed, None, "Sensor-9", "10.0.0.99");
        let (created, log) = intake_response(IntakeResult::Duplicate, outcome.log, "Sensor-9");
        assert!(matches!(created, Err(AppError::Conflict(_))));
        assert_eq!(log, None);
    }

    #[test]
    fn test_store_failure_trades_success_entry_for_critical() {
        let outcome = settle_intake(DeviceStatus::Allowed, None, "Sensor-9", "10.0.0.99");
        let (created, log) = intake_response(
            IntakeResult::Failed(sqlx::Error::PoolClosed),
            outcome.log,
            "Sensor-9",
        );
        assert!(matches!(created, Err(AppError::Database(_))));
        let draft = log.expect("store failure must leave a Critical entry");
        assert_eq!(draft.level, LogLevel::Critical);
        assert!(draft.message.contains("Sensor-9"));
    }

    #[test]
    fn test_delete_of_unknown_id_yields_not_found_and_no_log_entry() {
        let (found, log) = settle_delete_lookup(Ok(None), 42);
        assert!(matches!(found, Err(AppError::NotFound(_))));
        assert_eq!(log, None);
    }

    #[test]
    fn test_hub_device_delete_is_refused() {
        let (found, log) = settle_delete_lookup(Ok(Some(device(1, "Core Router", true))), 1);
        assert!(matches!(found, Err(AppError::Forbidden(_))));
        assert_eq!(log, None);
    }

    #[test]
    fn test_delete_lookup_failure_logs_critical() {
        let (found, log) = settle_delete_lookup(Err(sqlx::Error::PoolClosed), 3);
        assert!(matches!(found, Err(AppError::Database(_))));
        assert_eq!(log.unwrap().level, LogLevel::Critical);
    }

    #[test]
    fn test_successful_delete_logs_info_naming_device() {
        let cctv = device(3, "CCTV Lobby", false);
        let (message, log) = settle_delete(&cctv, Ok(true), 3);
        assert!(message.unwrap().contains("CCTV Lobby"));
        let draft = log.unwrap();
        assert_eq!(draft.level, LogLevel::Info);
        assert!(draft.message.contains("CCTV Lobby"));
    }

    #[test]
    fn test_failed_delete_logs_critical_and_surfaces_error() {
        let cctv = device(3, "CCTV Lobby", false);
        let (message, log) = settle_delete(&cctv, Err(sqlx::Error::PoolClosed), 3);
        assert!(matches!(message, Err(AppError::Database(_))));
        assert_eq!(log.unwrap().level, LogLevel::Critical);
    }

    #[test]
    fn test_update_patch_keeps_coordinates_paired() {
        // One-sided patch onto a device without coordinates breaks the pair
        assert!(!coords_stay_paired(&coord_patch(Some(1.0), None), None, None));
        assert!(!coords_stay_paired(&coord_patch(None, Some(2.0)), None, None));

        // One-sided patch is fine when the stored row holds the other side
        assert!(coords_stay_paired(&coord_patch(Some(1.0), None), Some(-6.9), Some(107.6)));

        // Both-or-neither patches are always fine
        assert!(coords_stay_paired(&coord_patch(Some(1.0), Some(2.0)), None, None));
        assert!(coords_stay_paired(&coord_patch(None, None), None, None));
    }
}
