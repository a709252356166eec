use std::sync::Arc;
use axum::{extract::{State, Multipart}, http::StatusCode, Json, response::{IntoResponse, Response}};
use axum::body::Bytes;
use axum::extract::multipart::MultipartRejection;
use chrono::Timelike;
use thiserror::Error;
use tracing::{error, info, warn};
use crate::{AppState, db};
use crate::db::writer::AttendanceInsert;
use crate::models::attendance::{AttendanceRecord, NewAttendance, STATUS_PRESENT};
use crate::recognition::matcher::{self, Verdict};

#[derive(Debug, Error)]
enum EmbedError {
    #[error("undecodable image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("face model failure: {0:#}")]
    Model(anyhow::Error),
}

#[derive(Default)]
struct CheckinForm {
    student_id: Option<String>,
    latitude: Option<String>,
    longitude: Option<String>,
    image: Option<Bytes>,
}

fn failed(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({
        "status": "failed",
        "message": message.into(),
        "address": ""
    }))).into_response()
}

fn already_checked_in(rec: &AttendanceRecord) -> Response {
    (StatusCode::CONFLICT, Json(serde_json::json!({
        "status": "failed",
        "message": "You have already checked in today",
        "student_id": rec.student_id,
        "date": rec.date,
        "time": rec.time,
        "address": rec.address
    }))).into_response()
}

async fn read_form(mut multipart: Multipart) -> Result<CheckinForm, axum::extract::multipart::MultipartError> {
    let mut form = CheckinForm::default();
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "image" => form.image = Some(field.bytes().await?),
            "student_id" => form.student_id = Some(field.text().await?),
            "latitude" => form.latitude = Some(field.text().await?),
            "longitude" => form.longitude = Some(field.text().await?),
            _ => {}
        }
    }
    Ok(form)
}

fn parse_coordinate(raw: Option<&str>) -> Option<f64> {
    let raw = raw.map(str::trim).filter(|s| !s.is_empty()).unwrap_or("0");
    raw.parse::<f64>().ok().filter(|v| v.is_finite())
}

pub async fn checkin(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let multipart = match multipart {
        Ok(m) => m,
        Err(e) => {
            warn!("Check-in request is not multipart: {}", e);
            return failed(StatusCode::BAD_REQUEST, "Missing student id or image");
        }
    };
    let form = match read_form(multipart).await {
        Ok(f) => f,
        Err(e) => {
            warn!("Malformed check-in upload: {}", e);
            return failed(StatusCode::BAD_REQUEST, "Malformed upload");
        }
    };

    let student_id = form.student_id.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);
    let upload = form.image.filter(|b| !b.is_empty());
    let (Some(student_id), Some(upload)) = (student_id, upload) else {
        return failed(StatusCode::BAD_REQUEST, "Missing student id or image");
    };
    let (Some(latitude), Some(longitude)) = (
        parse_coordinate(form.latitude.as_deref()),
        parse_coordinate(form.longitude.as_deref()),
    ) else {
        return failed(StatusCode::BAD_REQUEST, "Image processing error");
    };

    if !state.embedder.is_ready() {
        return failed(StatusCode::SERVICE_UNAVAILABLE, "Face recognition model is not loaded");
    }

    let embedding = tokio::task::spawn_blocking({
        let embedder = state.embedder.clone();
        let size = state.checkin.image_size;
        move || -> Result<Option<Vec<f32>>, EmbedError> {
            let img = image::load_from_memory(&upload)?;
            let img = img.resize_exact(size, size, image::imageops::FilterType::Triangle);
            embedder.embed(&img).map_err(EmbedError::Model)
        }
    }).await;

    let candidate = match embedding {
        Ok(Ok(Some(v))) => v,
        Ok(Ok(None)) => return failed(StatusCode::UNPROCESSABLE_ENTITY, "No face found"),
        Ok(Err(EmbedError::Decode(e))) => {
            warn!("Check-in image for {} could not be decoded: {}", student_id, e);
            return failed(StatusCode::BAD_REQUEST, "Image processing error");
        }
        Ok(Err(e)) => {
            error!("Face embedding failed for {}: {}", student_id, e);
            return failed(StatusCode::INTERNAL_SERVER_ERROR, "Face recognition failed");
        }
        Err(e) => {
            error!("Face embedding task panicked: {}", e);
            return failed(StatusCode::INTERNAL_SERVER_ERROR, "Face recognition failed");
        }
    };

    let threshold = state.checkin.match_threshold;
    let matched = match matcher::verify(&state.templates, &candidate, &student_id, threshold) {
        Verdict::Accepted(m) => m,
        Verdict::Unrecognized { distance } => {
            info!("Check-in rejected for {}: no template within threshold (score={:.4})", student_id, distance);
            return failed(
                StatusCode::FORBIDDEN,
                format!("Face not recognized (score={:.4}, threshold={})", distance, threshold),
            );
        }
        Verdict::Mismatch { claimed, matched } => {
            info!("Check-in rejected: account {} but face matches {} (score={:.4})", claimed, matched.student_id, matched.distance);
            return failed(
                StatusCode::FORBIDDEN,
                format!(
                    "Face does not match the account (app={}, face={}, score={:.4})",
                    claimed, matched.student_id, matched.distance
                ),
            );
        }
    };

    let now = chrono::Local::now();
    let date = now.date_naive();
    // Stored at second precision
    let time = now.time().with_nanosecond(0).unwrap_or_else(|| now.time());

    let existing = tokio::task::spawn_blocking({
        let pool = state.pool.clone();
        let sid = matched.student_id.clone();
        move || -> anyhow::Result<_> {
            let conn = pool.get()?;
            db::query::attendance_on(&conn, &sid, date)
        }
    }).await;
    match existing {
        Ok(Ok(Some(rec))) => return already_checked_in(&rec),
        Ok(Ok(None)) => {}
        Ok(Err(e)) => {
            error!("Attendance lookup failed: {:#}", e);
            return failed(StatusCode::INTERNAL_SERVER_ERROR, "Database error");
        }
        Err(_) => return failed(StatusCode::INTERNAL_SERVER_ERROR, "Task error"),
    }

    let address = state.geocoder.reverse(latitude, longitude).await;

    let inserted = tokio::task::spawn_blocking({
        let pool = state.pool.clone();
        let sid = matched.student_id.clone();
        let address = address.clone();
        move || -> anyhow::Result<_> {
            let conn = pool.get()?;
            let new = NewAttendance {
                student_id: &sid,
                date,
                time,
                status: STATUS_PRESENT,
                latitude,
                longitude,
                address: &address,
            };
            match db::writer::insert_attendance(&conn, &new)? {
                AttendanceInsert::Inserted(id) => Ok(Ok(id)),
                AttendanceInsert::AlreadyCheckedIn => Ok(Err(db::query::attendance_on(&conn, &sid, date)?)),
            }
        }
    }).await;

    match inserted {
        Ok(Ok(Ok(id))) => {
            info!("Attendance {} recorded for {} (score={:.4})", id, matched.student_id, matched.distance);
            (StatusCode::OK, Json(serde_json::json!({
                "status": STATUS_PRESENT,
                "message": format!("Check-in successful (score={:.4}, threshold={})", matched.distance, threshold),
                "student_id": matched.student_id,
                "date": date.format("%Y-%m-%d").to_string(),
                "time": time.format("%H:%M:%S").to_string(),
                "address": address,
                "distance": matched.distance,
                "threshold": threshold
            }))).into_response()
        }
        // Lost a race with a concurrent check-in for the same student
        Ok(Ok(Err(Some(rec)))) => already_checked_in(&rec),
        Ok(Ok(Err(None))) => failed(StatusCode::CONFLICT, "You have already checked in today"),
        Ok(Err(e)) => {
            error!("Failed to record attendance for {}: {:#}", matched.student_id, e);
            failed(StatusCode::INTERNAL_SERVER_ERROR, "Database error")
        }
        Err(_) => failed(StatusCode::INTERNAL_SERVER_ERROR, "Task error"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinates_default_to_zero() {
        assert_eq!(parse_coordinate(None), Some(0.0));
        assert_eq!(parse_coordinate(Some("  ")), Some(0.0));
        assert_eq!(parse_coordinate(Some("21.0285")), Some(21.0285));
        assert_eq!(parse_coordinate(Some("north")), None);
        assert_eq!(parse_coordinate(Some("NaN")), None);
    }
}
