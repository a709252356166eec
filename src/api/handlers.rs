use std::sync::Arc;
use axum::{extract::{State, Query, Form}, http::{StatusCode, header}, Json, response::{IntoResponse, Response}};
use serde::Deserialize;
use tracing::{error, info, warn};
use crate::{AppState, db, export};
use crate::models::attendance::ReportFilter;
use crate::models::user::Role;
use crate::utils::password::verify_password;

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let body = serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "database": "SQLite",
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "templates": state.templates.len(),
        "students_with_templates": state.templates.students(),
        "face_model_loaded": state.embedder.is_ready(),
        "geocoder_enabled": state.geocoder.is_enabled(),
    });
    (StatusCode::OK, Json(body))
}

#[derive(Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

pub async fn login(State(state): State<Arc<AppState>>, Form(form): Form<LoginForm>) -> impl IntoResponse {
    let username = form.username.trim().to_string();
    // Argon2 verification is CPU bound; run it next to the lookup
    let res = tokio::task::spawn_blocking({
        let pool = state.pool.clone();
        let username = username.clone();
        move || -> anyhow::Result<_> {
            let conn = pool.get()?;
            let Some(user) = db::query::find_user(&conn, &username)? else {
                return Ok(None);
            };
            match verify_password(&form.password, &user.password_hash) {
                Ok(true) => Ok(Some(user)),
                Ok(false) => Ok(None),
                Err(e) => {
                    warn!("Stored password for {} is unusable: {:#}", user.username, e);
                    Ok(None)
                }
            }
        }
    }).await;

    let user = match res {
        Ok(Ok(user)) => user,
        Ok(Err(e)) => {
            error!("Login lookup failed for {}: {:#}", username, e);
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({"status": "failed", "message": "Database error"})));
        }
        Err(e) => {
            error!("Login task panicked: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({"status": "failed", "message": "Task error"})));
        }
    };

    match user {
        Some(user) => {
            info!("User {} logged in as {}", user.username, user.role.as_str());
            let student_id = if user.role == Role::Student { user.student_id } else { None };
            (StatusCode::OK, Json(serde_json::json!({
                "status": "success",
                "role": user.role.as_str(),
                "student_id": student_id,
            })))
        }
        None => (StatusCode::UNAUTHORIZED, Json(serde_json::json!({
            "status": "failed",
            "message": "Incorrect username or password"
        }))),
    }
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    pub student_id: Option<String>,
}

pub async fn history(State(state): State<Arc<AppState>>, Query(q): Query<HistoryQuery>) -> Response {
    let Some(student_id) = q.student_id.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()) else {
        return (StatusCode::BAD_REQUEST, Json(serde_json::json!({"error": "student_id is required"}))).into_response();
    };
    let res = tokio::task::spawn_blocking({
        let pool = state.pool.clone();
        move || -> anyhow::Result<_> {
            let conn = pool.get()?;
            db::query::student_history(&conn, &student_id)
        }
    }).await;
    match res {
        Ok(Ok(items)) => (StatusCode::OK, Json(items)).into_response(),
        Ok(Err(e)) => {
            error!("History query failed: {:#}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

#[derive(Deserialize)]
pub struct ReportQuery {
    pub class: Option<String>,
    pub date: Option<String>,
}

impl ReportQuery {
    /// Blank parameters mean "no filter". A date must be `YYYY-MM-DD`.
    fn into_filter(self) -> Result<ReportFilter, String> {
        let class_name = self.class.map(|c| c.trim().to_string()).filter(|c| !c.is_empty());
        let date = match self.date.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
            Some(d) => Some(
                chrono::NaiveDate::parse_from_str(d, "%Y-%m-%d")
                    .map_err(|_| format!("invalid date '{}', expected YYYY-MM-DD", d))?,
            ),
            None => None,
        };
        Ok(ReportFilter { class_name, date })
    }
}

async fn load_report(state: &AppState, filter: ReportFilter) -> anyhow::Result<Vec<crate::models::attendance::ReportRow>> {
    let pool = state.pool.clone();
    tokio::task::spawn_blocking(move || -> anyhow::Result<_> {
        let conn = pool.get()?;
        db::query::report(&conn, &filter)
    }).await?
}

pub async fn history_teacher(State(state): State<Arc<AppState>>, Query(q): Query<ReportQuery>) -> Response {
    let filter = match q.into_filter() {
        Ok(f) => f,
        Err(msg) => return (StatusCode::BAD_REQUEST, Json(serde_json::json!({"error": msg}))).into_response(),
    };
    match load_report(&state, filter).await {
        Ok(rows) => (StatusCode::OK, Json(rows)).into_response(),
        Err(e) => {
            error!("Report query failed: {:#}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn export_excel(State(state): State<Arc<AppState>>, Query(q): Query<ReportQuery>) -> Response {
    let filename = export::export_filename(q.class.as_deref(), q.date.as_deref());
    let filter = match q.into_filter() {
        Ok(f) => f,
        Err(msg) => return (StatusCode::BAD_REQUEST, Json(serde_json::json!({"error": msg}))).into_response(),
    };
    let rows = match load_report(&state, filter).await {
        Ok(rows) => rows,
        Err(e) => {
            error!("Export query failed: {:#}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    let bytes = match tokio::task::spawn_blocking(move || export::report_to_xlsx(&rows)).await {
        Ok(Ok(b)) => b,
        Ok(Err(e)) => {
            error!("Failed to build spreadsheet: {:#}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
        Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    };
    info!("Exported {} ({} bytes)", filename, bytes.len());
    let disposition = format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        filename,
        urlencoding::encode(&filename)
    );
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, export::XLSX_CONTENT_TYPE.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    ).into_response()
}

pub async fn classes(State(state): State<Arc<AppState>>) -> Response {
    let res = tokio::task::spawn_blocking({
        let pool = state.pool.clone();
        move || -> anyhow::Result<_> {
            let conn = pool.get()?;
            db::query::list_classes(&conn)
        }
    }).await;
    match res {
        Ok(Ok(list)) => (StatusCode::OK, Json(list)).into_response(),
        _ => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}
