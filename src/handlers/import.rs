//! Spreadsheet import handler
//!
//! Bulk device intake from an uploaded .xlsx file. Rows are validated
//! individually; bad rows are skipped and reported back, good rows are
//! inserted. Imported rows bypass the threat-intelligence check, matching
//! single-device intake only on the storage path.

use std::collections::HashSet;
use std::io::Cursor;

use axum::{extract::{State, Multipart}, Json};
use calamine::{Data, Reader, Xlsx};
use serde_json::{json, Value};

use crate::{AppState, AppResult, AppError};
use crate::error::is_unique_violation;
use crate::models::{Device, DeviceStatus, NewDevice};

/// One spreadsheet row after header mapping, before validation
#[derive(Debug, Default)]
struct SheetRow {
    name: Option<String>,
    ip_address: Option<String>,
    location: Option<String>,
    status: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
}

/// Import devices from an uploaded Excel file (multipart field `file`)
pub async fn import(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<Json<Value>> {
    let mut file_bytes = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Invalid upload: {}", e)))?
    {
        if field.name() == Some("file") {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| AppError::Validation(format!("Invalid upload: {}", e)))?;
            file_bytes = Some(bytes);
            break;
        }
    }

    let bytes = file_bytes.ok_or_else(|| AppError::Validation("No file uploaded".to_string()))?;
    let rows = parse_workbook(&bytes)?;

    let mut existing: HashSet<String> = Device::existing_addresses(&state.pool)
        .await?
        .into_iter()
        .collect();

    let mut imported: u64 = 0;
    let mut errors = Vec::new();

    // Row numbers are reported as they appear in the sheet (header is row 1)
    for (i, row) in rows.iter().enumerate() {
        let row_number = i + 2;
        match validate_row(row, row_number, &existing) {
            Ok(new_device) => match Device::insert(&state.pool, &new_device).await {
                Ok(_) => {
                    existing.insert(new_device.ip_address.clone());
                    imported += 1;
                }
                // Lost a race against a concurrent insert; report like any
                // other duplicate instead of failing the whole import
                Err(err) if is_unique_violation(&err) => {
                    errors.push(format!(
                        "Row {} skipped: IP address {} already exists.",
                        row_number, new_device.ip_address
                    ));
                }
                Err(err) => return Err(err.into()),
            },
            Err(msg) => errors.push(msg),
        }
    }

    tracing::info!("Excel import finished: {} added, {} skipped", imported, errors.len());

    Ok(Json(json!({
        "success": true,
        "message": format!("Import finished. {} devices added.", imported),
        "importedCount": imported,
        "errors": errors,
    })))
}

/// Read the first worksheet into header-mapped rows
fn parse_workbook(bytes: &[u8]) -> Result<Vec<SheetRow>, AppError> {
    let mut workbook = Xlsx::new(Cursor::new(bytes))
        .map_err(|_| AppError::Validation("Could not read the Excel file".to_string()))?;

    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| AppError::Validation("The Excel file has no worksheets".to_string()))?
        .map_err(|_| AppError::Validation("Could not read the Excel file".to_string()))?;

    let mut rows = range.rows();
    let header = match rows.next() {
        Some(header) => header,
        None => return Ok(Vec::new()),
    };

    let columns: Vec<String> = header
        .iter()
        .map(|cell| cell_string(cell).unwrap_or_default().to_lowercase())
        .collect();

    let index_of = |name: &str| columns.iter().position(|c| c == name);
    let name_col = index_of("name");
    let ip_col = index_of("ip_address");
    let location_col = index_of("location");
    let status_col = index_of("status");
    let lat_col = index_of("latitude");
    let lng_col = index_of("longitude");

    let cell = |row: &[Data], col: Option<usize>| col.and_then(|c| row.get(c).cloned());

    Ok(rows
        .map(|row| SheetRow {
            name: cell(row, name_col).as_ref().and_then(cell_string),
            ip_address: cell(row, ip_col).as_ref().and_then(cell_string),
            location: cell(row, location_col).as_ref().and_then(cell_string),
            status: cell(row, status_col).as_ref().and_then(cell_string),
            latitude: cell(row, lat_col).as_ref().and_then(cell_float),
            longitude: cell(row, lng_col).as_ref().and_then(cell_float),
        })
        .collect())
}

/// Turn a sheet row into an insertable device, or a human-readable reason
/// it was skipped.
fn validate_row(
    row: &SheetRow,
    row_number: usize,
    existing: &HashSet<String>,
) -> Result<NewDevice, String> {
    let (name, ip_address) = match (&row.name, &row.ip_address) {
        (Some(name), Some(ip)) => (name.clone(), ip.clone()),
        _ => {
            return Err(format!(
                "Row {} skipped: 'name' and 'ip_address' are required.",
                row_number
            ));
        }
    };

    if existing.contains(&ip_address) {
        return Err(format!(
            "Row {} skipped: IP address {} already exists.",
            row_number, ip_address
        ));
    }

    let status = match &row.status {
        Some(s) => DeviceStatus::parse(s)
            .ok_or_else(|| format!("Row {} skipped: unknown status \"{}\".", row_number, s))?,
        None => DeviceStatus::Allowed,
    };

    // Coordinates only count when both are present and finite
    let (latitude, longitude) = match (row.latitude, row.longitude) {
        (Some(lat), Some(lng)) if lat.is_finite() && lng.is_finite() => (Some(lat), Some(lng)),
        _ => (None, None),
    };

    Ok(NewDevice {
        name,
        ip_address,
        location: row.location.clone().unwrap_or_default(),
        status,
        latitude,
        longitude,
    })
}

fn cell_string(cell: &Data) -> Option<String> {
    match cell {
        Data::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Data::Int(i) => Some(i.to_string()),
        Data::Float(f) => Some(f.to_string()),
        _ => None,
    }
}

fn cell_float(cell: &Data) -> Option<f64> {
    match cell {
        Data::Float(f) => Some(*f),
        Data::Int(i) => Some(*i as f64),
        Data::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
