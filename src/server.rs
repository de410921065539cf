use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::{header::CONTENT_TYPE, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::PgPool;
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::db::{self, PgAlertStore};
use crate::epiweek;
use crate::error::SyncError;
use crate::models::{AlertRecord, AlertSummary, AlertView, ReconcileSummary};
use crate::notify::{self, Notification, NotificationKind, NotificationLog, NotificationSink};
use crate::sync::AlertSynchronizer;
use crate::upstream::{InfoDengueClient, WeekRange};

const NOTIFICATION_CAPACITY: usize = 50;
const DEFAULT_LATEST: i64 = 3;
const DASHBOARD_MONTHS: u32 = 6;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Sync(SyncError::Validation(_)) => StatusCode::BAD_REQUEST,
            ApiError::Sync(SyncError::Upstream { .. } | SyncError::Decode(_)) => {
                StatusCode::BAD_GATEWAY
            }
            ApiError::Sync(SyncError::Store(_)) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() || status == StatusCode::BAD_GATEWAY {
            error!("Request failed: {self}");
        }

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub struct AppState {
    pub config: Config,
    pub store: PgAlertStore,
    pub synchronizer: AlertSynchronizer<InfoDengueClient>,
    pub notifications: NotificationLog,
}

impl AppState {
    pub fn new(config: Config, pool: PgPool) -> anyhow::Result<Arc<Self>> {
        let client = InfoDengueClient::new(
            &config.infodengue_url,
            &config.geocode,
            &config.disease,
            config.upstream_timeout,
        )?;

        Ok(Arc::new(Self {
            config,
            store: PgAlertStore::new(pool),
            synchronizer: AlertSynchronizer::new(client),
            notifications: NotificationLog::new(NOTIFICATION_CAPACITY),
        }))
    }
}

type SharedState = Arc<AppState>;

pub fn router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(60 * 60));

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/dengue", get(list_handler).post(create_handler))
        .route("/api/dengue/latest", get(latest_handler))
        .route("/api/dengue/last-three-weeks", get(last_three_weeks_handler))
        .route("/api/dengue/last-six-months", get(last_six_months_handler))
        .route("/api/dengue/week", get(week_handler))
        .route("/api/dengue/sync", get(sync_handler).post(sync_handler))
        .route("/api/dengue/{week}/{year}", get(week_and_year_handler))
        .route("/api/notifications", get(notifications_handler))
        .layer(cors)
        .with_state(state)
}

pub async fn start_server(state: SharedState) -> anyhow::Result<()> {
    let address = format!("0.0.0.0:{}", state.config.port);
    info!("Binding to {address}");

    let listener = TcpListener::bind(&address).await?;
    info!("Server running on {address}");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(e) => {
                warn!("Failed to listen for Ctrl+C: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                warn!("Failed to install terminate handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn views(alerts: Vec<AlertRecord>) -> Vec<AlertView> {
    alerts.into_iter().map(AlertView::from).collect()
}

async fn list_handler(State(state): State<SharedState>) -> Result<Json<Vec<AlertView>>, ApiError> {
    let alerts = db::list_alerts(state.store.pool()).await?;
    if alerts.is_empty() {
        return Err(ApiError::NotFound("No dengue alerts found".to_string()));
    }

    info!("Retrieved {} alerts", alerts.len());
    Ok(Json(views(alerts)))
}

#[derive(Debug, Deserialize)]
pub struct LatestQuery {
    pub limit: Option<i64>,
}

async fn latest_handler(
    State(state): State<SharedState>,
    Query(query): Query<LatestQuery>,
) -> Result<Json<Vec<AlertView>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_LATEST);
    let alerts = db::fetch_latest(state.store.pool(), limit).await?;
    if alerts.is_empty() {
        return Err(ApiError::NotFound("No dengue alerts found".to_string()));
    }

    Ok(Json(views(alerts)))
}

async fn last_three_weeks_handler(
    State(state): State<SharedState>,
) -> Result<Json<Vec<AlertSummary>>, ApiError> {
    let alerts = db::fetch_latest(state.store.pool(), 3).await?;
    Ok(Json(alerts.iter().map(AlertSummary::from).collect()))
}

async fn last_six_months_handler(
    State(state): State<SharedState>,
) -> Result<Json<Vec<AlertView>>, ApiError> {
    let range = epiweek::range_covering_last_months(Utc::now().date_naive(), DASHBOARD_MONTHS);
    let alerts = db::fetch_between(state.store.pool(), range.start, range.end).await?;
    Ok(Json(views(alerts)))
}

#[derive(Debug, Deserialize)]
pub struct WeekQuery {
    pub ew: i32,
    pub ey: i32,
}

async fn week_handler(
    State(state): State<SharedState>,
    Query(query): Query<WeekQuery>,
) -> Result<Json<AlertSummary>, ApiError> {
    let alert = find_alert(&state, query.ew, query.ey).await?;
    Ok(Json(AlertSummary::from(&alert)))
}

async fn week_and_year_handler(
    State(state): State<SharedState>,
    Path((week, year)): Path<(i32, i32)>,
) -> Result<Json<AlertView>, ApiError> {
    let alert = find_alert(&state, week, year).await?;
    Ok(Json(AlertView::from(alert)))
}

async fn find_alert(state: &AppState, week: i32, year: i32) -> Result<AlertRecord, ApiError> {
    db::fetch_alert(state.store.pool(), week, year)
        .await?
        .ok_or_else(|| {
            ApiError::NotFound(format!(
                "No dengue alert found for week {week} and year {year}"
            ))
        })
}

async fn create_handler(
    State(state): State<SharedState>,
    Json(alert): Json<AlertRecord>,
) -> Result<(StatusCode, Json<AlertView>), ApiError> {
    WeekRange::single_year(alert.year, alert.week, alert.week).validate()?;

    if !db::create_alert(state.store.pool(), &alert).await? {
        return Err(ApiError::Conflict(format!(
            "An alert for week {} already exists",
            alert.label()
        )));
    }

    info!("Created alert for week {}", alert.label());
    Ok((StatusCode::CREATED, Json(AlertView::from(alert))))
}

#[derive(Debug, Serialize)]
pub struct SyncResponse {
    pub message: String,
    pub count: usize,
    #[serde(flatten)]
    pub summary: ReconcileSummary,
}

async fn sync_handler(State(state): State<SharedState>) -> Result<Json<SyncResponse>, ApiError> {
    info!("Starting dengue data sync");
    let outcome = state
        .synchronizer
        .sync_last_n_months(
            &state.store,
            Utc::now().date_naive(),
            state.config.sync_months,
        )
        .await
        .inspect_err(|e| {
            if e.is_retryable() {
                warn!("Sync failed, the provider may recover: {e}");
            }
        })?;

    let summary = outcome.summary;
    let notification = if summary.inserted + summary.updated > 0 {
        Notification::new(
            NotificationKind::Success,
            format!(
                "Synchronized {} weeks: {} inserted, {} updated",
                outcome.records.len(),
                summary.inserted,
                summary.updated
            ),
        )
    } else {
        Notification::new(NotificationKind::Info, "Dengue data already up to date")
    };
    state.notifications.emit(notification);
    notify::check_alerts(&outcome.records, &state.notifications);

    Ok(Json(SyncResponse {
        message: "Dengue data synchronized successfully".to_string(),
        count: outcome.records.len(),
        summary,
    }))
}

async fn notifications_handler(State(state): State<SharedState>) -> Json<Vec<Notification>> {
    Json(state.notifications.recent())
}
