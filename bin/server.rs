// Time-bank Ingest - Web Server
// REST API with Axum: report upload, snapshot listing, alerts, CSV export

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chrono::Local;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use timebank_ingest::{
    config::MAX_ALERT_WINDOW_DAYS, expiring_entries, list_entries, list_roster, open_database,
    write_entries_csv, Config, ImportOptions, ImportOutcome, IngestError, TimeBankImporter,
};

/// Shared application state
#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<Connection>>,
    importer: Arc<TimeBankImporter>,
    alert_window_days: i64,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
            message: None,
            error: None,
        }
    }

    fn with_message(mut self, message: String) -> Self {
        self.message = Some(message);
        self
    }
}

#[derive(Deserialize)]
struct AlertsQuery {
    within_days: Option<i64>,
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ApiResponse {
            success: false,
            data: (),
            message: None,
            error: Some(message.to_string()),
        }),
    )
        .into_response()
}

/// Lock the shared connection, recovering from poisoning. A transaction
/// dropped during unwinding has already rolled back.
fn lock_db(db: &Mutex<Connection>) -> MutexGuard<'_, Connection> {
    db.lock().unwrap_or_else(PoisonError::into_inner)
}

fn internal_error(context: &str, err: anyhow::Error) -> Response {
    tracing::error!(error = %format!("{:#}", err), "{}", context);
    error_response(StatusCode::INTERNAL_SERVER_ERROR, context)
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/coordinators/:coordinator_id/collaborators - Roster in matching order
async fn get_collaborators(
    State(state): State<AppState>,
    Path(coordinator_id): Path<String>,
) -> Response {
    let conn = lock_db(&state.db);

    match list_roster(&conn, &coordinator_id) {
        Ok(roster) => (StatusCode::OK, Json(ApiResponse::ok(roster))).into_response(),
        Err(e) => internal_error("Failed to fetch collaborators", e),
    }
}

/// GET /api/coordinators/:coordinator_id/timebank - Stored entries
async fn get_timebank(
    State(state): State<AppState>,
    Path(coordinator_id): Path<String>,
) -> Response {
    let conn = lock_db(&state.db);

    match list_entries(&conn, &coordinator_id) {
        Ok(entries) => (StatusCode::OK, Json(ApiResponse::ok(entries))).into_response(),
        Err(e) => internal_error("Failed to fetch entries", e),
    }
}

/// POST /api/coordinators/:coordinator_id/timebank - Upload a report (multipart `file`)
async fn upload_timebank(
    State(state): State<AppState>,
    Path(coordinator_id): Path<String>,
    mut multipart: Multipart,
) -> Response {
    let mut payload = None;

    loop {
        match multipart.next_field().await {
            Ok(Some(field)) => {
                if field.name() != Some("file") {
                    continue;
                }
                match field.bytes().await {
                    Ok(bytes) => {
                        payload = Some(bytes);
                        break;
                    }
                    Err(e) => return e.into_response(),
                }
            }
            Ok(None) => break,
            Err(e) => return e.into_response(),
        }
    }

    let payload = match payload {
        Some(bytes) => bytes,
        None => return error_response(StatusCode::BAD_REQUEST, "No file uploaded"),
    };

    // Extraction and parsing run before the lock is taken; only the roster
    // read and the snapshot replace hold it.
    let importer = state.importer.clone();
    let db = state.db.clone();
    let result = tokio::task::spawn_blocking(move || -> Result<ImportOutcome, IngestError> {
        let prepared = importer.prepare(&payload)?;
        let mut conn = lock_db(&db);
        importer.apply(&mut *conn, &coordinator_id, prepared)
    })
    .await;

    match result {
        Ok(Ok(outcome)) => {
            let message = outcome.message();
            (StatusCode::OK, Json(ApiResponse::ok(outcome).with_message(message))).into_response()
        }
        Ok(Err(e)) => e.into_response(),
        Err(e) => {
            tracing::error!(error = %e, "report import task failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to process report")
        }
    }
}

/// GET /api/coordinators/:coordinator_id/timebank/alerts - Balances about to expire
async fn get_alerts(
    State(state): State<AppState>,
    Path(coordinator_id): Path<String>,
    Query(query): Query<AlertsQuery>,
) -> Response {
    let within_days = query.within_days.unwrap_or(state.alert_window_days);
    if !(0..=MAX_ALERT_WINDOW_DAYS).contains(&within_days) {
        return error_response(
            StatusCode::BAD_REQUEST,
            &format!("within_days must be between 0 and {}", MAX_ALERT_WINDOW_DAYS),
        );
    }

    let conn = lock_db(&state.db);

    let today = Local::now().date_naive();
    match expiring_entries(&conn, &coordinator_id, today, within_days) {
        Ok(alerts) => (StatusCode::OK, Json(ApiResponse::ok(alerts))).into_response(),
        Err(e) => internal_error("Failed to fetch alerts", e),
    }
}

/// GET /api/coordinators/:coordinator_id/timebank/export.csv - CSV download
async fn export_timebank(
    State(state): State<AppState>,
    Path(coordinator_id): Path<String>,
) -> Response {
    let conn = lock_db(&state.db);

    let entries = match list_entries(&conn, &coordinator_id) {
        Ok(entries) => entries,
        Err(e) => return internal_error("Failed to fetch entries", e),
    };

    let mut body = Vec::new();
    if let Err(e) = write_entries_csv(&mut body, &entries) {
        return internal_error("Failed to export entries", e);
    }

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (header::CONTENT_DISPOSITION, "attachment; filename=\"timebank.csv\""),
        ],
        body,
    )
        .into_response()
}

fn build_router(state: AppState, max_upload_bytes: usize) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/coordinators/:coordinator_id/collaborators", get(get_collaborators))
        .route(
            "/coordinators/:coordinator_id/timebank",
            get(get_timebank).post(upload_timebank),
        )
        .route("/coordinators/:coordinator_id/timebank/alerts", get(get_alerts))
        .route("/coordinators/:coordinator_id/timebank/export.csv", get(export_timebank))
        .with_state(state);

    // Multipart framing needs headroom above the file itself
    let body_limit = max_upload_bytes.saturating_add(64 * 1024);

    Router::new().nest("/api", api_routes).layer(
        ServiceBuilder::new()
            .layer(CorsLayer::permissive())
            .layer(DefaultBodyLimit::max(body_limit)),
    )
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    timebank_ingest::init_tracing("info")?;

    let config = Config::load()?;
    let conn = open_database(&config.database_path)?;
    tracing::info!(database = %config.database_path.display(), "database opened");

    let state = AppState {
        db: Arc::new(Mutex::new(conn)),
        importer: Arc::new(TimeBankImporter::new(ImportOptions::from(&config))),
        alert_window_days: config.alert_window_days,
    };

    let app = build_router(state, config.max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "server listening");

    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use timebank_ingest::{insert_collaborator, setup_database};
    use tower::ServiceExt;

    const BOUNDARY: &str = "X-TIMEBANK-BOUNDARY";

    fn test_state() -> AppState {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        insert_collaborator(&conn, "coord", "Joao Pereira").unwrap();
        insert_collaborator(&conn, "coord", "Maria Lima").unwrap();

        AppState {
            db: Arc::new(Mutex::new(conn)),
            importer: Arc::new(TimeBankImporter::new(ImportOptions::default())),
            alert_window_days: 30,
        }
    }

    fn multipart_body(contents: &str) -> String {
        format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"report.txt\"\r\nContent-Type: text/plain\r\n\r\n{c}\r\n--{b}--\r\n",
            b = BOUNDARY,
            c = contents
        )
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_upload_then_list() {
        let app = build_router(test_state(), 1024 * 1024);

        let report = "12 - JOAO PEREIRA\n01/03/202500012:3001/09/2025\n99 - MARIA LIMA\n02/03/202500008:00-02/09/2025\n";
        let response = app
            .clone()
            .oneshot(
                Request::post("/api/coordinators/coord/timebank")
                    .header(
                        header::CONTENT_TYPE,
                        format!("multipart/form-data; boundary={}", BOUNDARY),
                    )
                    .body(Body::from(multipart_body(report)))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["success"], true);
        assert_eq!(json["data"]["saved"], 2);
        assert_eq!(json["message"], "Processed 2 entries, saved 2 valid active entries.");

        let response = app
            .oneshot(
                Request::get("/api/coordinators/coord/timebank")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let json = body_json(response).await;
        let entries = json["data"].as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["collaborator_name"], "Joao Pereira");
        assert_eq!(entries[0]["expiration_date"], "2025-09-01");
    }

    #[tokio::test]
    async fn test_upload_without_file_is_bad_request() {
        let app = build_router(test_state(), 1024 * 1024);

        let body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"other\"\r\n\r\nx\r\n--{b}--\r\n",
            b = BOUNDARY
        );
        let response = app
            .oneshot(
                Request::post("/api/coordinators/coord/timebank")
                    .header(
                        header::CONTENT_TYPE,
                        format!("multipart/form-data; boundary={}", BOUNDARY),
                    )
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "No file uploaded");
    }

    #[tokio::test]
    async fn test_alert_window_out_of_range_is_bad_request() {
        let app = build_router(test_state(), 1024 * 1024);

        let response = app
            .clone()
            .oneshot(
                Request::get("/api/coordinators/coord/timebank/alerts?within_days=100000000")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["success"], false);

        // The shared connection is still usable
        let response = app
            .oneshot(
                Request::get("/api/coordinators/coord/timebank")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_poisoned_lock_keeps_serving() {
        let state = test_state();
        let db = state.db.clone();
        let _ = std::thread::spawn(move || {
            let _guard = db.lock().unwrap();
            panic!("handler panicked while holding the connection");
        })
        .join();
        assert!(state.db.is_poisoned());

        let app = build_router(state, 1024 * 1024);
        let response = app
            .oneshot(
                Request::get("/api/coordinators/coord/collaborators")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["data"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_health() {
        let app = build_router(test_state(), 1024);
        let response = app
            .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["data"], "OK");
    }
}
