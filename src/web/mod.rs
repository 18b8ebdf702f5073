//! JSON API for the daemon.
//!
//! ## Endpoints
//!
//! - `GET /status` - last result, retry state and schedule
//! - `GET /history?limit=N` - per-day records, newest first
//! - `POST /trigger` - run a backup now and return its result
//! - `GET /schedule`, `PUT /schedule` - read or replace the daily trigger
//! - `GET /backups/{date}` - files stored locally for one day
//! - `GET /backups/{date}/{name}` - download one stored file

pub mod client;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::io::ErrorKind;
use std::net::SocketAddr;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::context::AppContext;
use crate::core::{BackupResult, RetryState, ScheduleSpec, StatusSnapshot, TriggerOrigin};
use crate::db::HistoryRecord;

pub use client::{ApiClient, ClientError};

/// Matches what the listing view has always shown.
const DEFAULT_HISTORY_LIMIT: usize = 100;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScheduleView {
    pub time: String,
    pub timezone: String,
}

impl From<ScheduleSpec> for ScheduleView {
    fn from(spec: ScheduleSpec) -> Self {
        Self {
            time: spec.time_string(),
            timezone: spec.timezone.name().to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatusView {
    pub status: StatusSnapshot,
    pub retry: RetryState,
    pub schedule: ScheduleView,
}

#[derive(Debug, Serialize)]
pub struct HistoryEntry {
    pub date: String,
    #[serde(flatten)]
    pub record: HistoryRecord,
}

#[derive(Debug, Serialize)]
pub struct StoredBackups {
    pub date: String,
    pub files: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

pub fn router(ctx: AppContext) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/history", get(history))
        .route("/trigger", post(trigger))
        .route("/schedule", get(get_schedule).put(put_schedule))
        .route("/backups/{date}", get(list_backups))
        .route("/backups/{date}/{name}", get(download_backup))
        .with_state(ctx)
}

pub struct WebServer {
    bind_addr: SocketAddr,
    ctx: AppContext,
    shutdown: CancellationToken,
}

impl WebServer {
    pub fn new(ctx: AppContext, bind_addr: SocketAddr, shutdown: CancellationToken) -> Self {
        Self {
            bind_addr,
            ctx,
            shutdown,
        }
    }

    /// Serve until the shutdown token is cancelled.
    pub async fn start(&self) -> anyhow::Result<()> {
        let app = router(self.ctx.clone());
        let listener = tokio::net::TcpListener::bind(self.bind_addr).await?;
        tracing::info!(addr = %self.bind_addr, "HTTP API listening");

        let shutdown = self.shutdown.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        Ok(())
    }
}

async fn status(State(ctx): State<AppContext>) -> Json<StatusView> {
    Json(StatusView {
        status: ctx.status.snapshot().await,
        retry: ctx.runner.retry_state().await,
        schedule: ctx.runner.schedule().into(),
    })
}

async fn history(
    State(ctx): State<AppContext>,
    Query(query): Query<HistoryQuery>,
) -> Json<Vec<HistoryEntry>> {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    let entries = ctx
        .runner
        .history_entries(limit)
        .await
        .into_iter()
        .map(|(date, record)| HistoryEntry { date, record })
        .collect();
    Json(entries)
}

async fn trigger(State(ctx): State<AppContext>) -> Json<BackupResult> {
    Json(ctx.runner.run_now(TriggerOrigin::Manual).await)
}

async fn get_schedule(State(ctx): State<AppContext>) -> Json<ScheduleView> {
    Json(ctx.runner.schedule().into())
}

async fn put_schedule(
    State(ctx): State<AppContext>,
    Json(view): Json<ScheduleView>,
) -> Response {
    match ScheduleSpec::parse(&view.time, &view.timezone) {
        Ok(spec) => {
            ctx.runner.reschedule(spec);
            (StatusCode::OK, Json(ScheduleView::from(spec))).into_response()
        }
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

fn error_response(code: StatusCode, message: impl Into<String>) -> Response {
    (code, Json(json!({ "error": message.into() }))).into_response()
}

fn valid_date(date: &str) -> bool {
    date.len() == 8 && date.bytes().all(|b| b.is_ascii_digit())
}

/// A bare file name inside one day directory.
fn valid_file_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\'])
        && !name.contains("..")
}

async fn list_backups(State(ctx): State<AppContext>, Path(date): Path<String>) -> Response {
    if !valid_date(&date) {
        return error_response(StatusCode::BAD_REQUEST, format!("invalid date: {date}"));
    }

    let day_dir = ctx.config.backup_root.join(&date);
    let mut entries = match tokio::fs::read_dir(&day_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Json(StoredBackups { date, files: Vec::new() }).into_response();
        }
        Err(e) => {
            warn!(error = %e, dir = %day_dir.display(), "Failed to list stored backups");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
        }
    };

    let mut files = Vec::new();
    loop {
        match entries.next_entry().await {
            Ok(Some(entry)) => {
                let name = entry.file_name().to_string_lossy().into_owned();
                let is_file = entry.file_type().await.is_ok_and(|t| t.is_file());
                if is_file && !name.starts_with('.') && !name.ends_with(".part") {
                    files.push(name);
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, dir = %day_dir.display(), "Failed to list stored backups");
                return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
            }
        }
    }
    files.sort();

    Json(StoredBackups { date, files }).into_response()
}

async fn download_backup(
    State(ctx): State<AppContext>,
    Path((date, name)): Path<(String, String)>,
) -> Response {
    if !valid_date(&date) {
        return error_response(StatusCode::BAD_REQUEST, format!("invalid date: {date}"));
    }
    if !valid_file_name(&name) {
        return error_response(StatusCode::BAD_REQUEST, format!("invalid file name: {name}"));
    }

    let path = ctx.config.backup_root.join(&date).join(&name);
    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return error_response(StatusCode::NOT_FOUND, format!("no stored backup {date}/{name}"));
        }
        Err(e) => {
            warn!(error = %e, path = %path.display(), "Failed to open stored backup");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
        }
    };

    (
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{name}\""),
            ),
        ],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response()
}
