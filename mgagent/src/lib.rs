use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use clap::{Args, Parser, Subcommand};
use mgstorage::{
    config::StorageConfig,
    errors::StorageError,
    models::{SyncScope, SyncType},
    MgStorage,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::signal;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

/// Runs the command line interface for the mgagent service.
pub async fn run_cli() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Some(Command::Serve(args)) => run_server(args).await?,
        None => {
            println!("No subcommand provided. Use --help to see available commands.");
        }
    }

    Ok(())
}

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Starts the HTTP service with the background sync scheduler
    Serve(ServeArgs),
}

#[derive(Args)]
struct ServeArgs {
    /// Base directory for the SQLite database
    #[arg(long, env = "MGNREGA_BASE_PATH", default_value = "./data")]
    base_path: PathBuf,
    /// Socket address to bind the HTTP service
    #[arg(long, default_value = "127.0.0.1:3000")]
    bind: String,
    /// Upstream open-data resource URL
    #[arg(long, env = "MGNREGA_BASE_URL")]
    base_url: String,
    /// API key for the upstream open-data service
    #[arg(long, env = "MGNREGA_API_KEY")]
    api_key: String,
    /// Redis URL for the read cache; caching is disabled when unset
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,
    /// Seconds between scheduled background syncs
    #[arg(long, env = "SYNC_INTERVAL_SECS", default_value_t = 86_400)]
    sync_interval_secs: u64,
    /// Disable the background sync scheduler
    #[arg(long, default_value_t = false)]
    disable_scheduler: bool,
}

#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<MgStorage>,
}

impl AppState {
    pub fn new(storage: Arc<MgStorage>) -> Self {
        Self { storage }
    }
}

#[derive(Debug, thiserror::Error)]
enum ApiError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "success": false,
            "message": self.to_string(),
            "data": [],
        }));
        (status, body).into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(value: StorageError) -> Self {
        match value {
            StorageError::NotFound(msg) => ApiError::NotFound(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Standard list envelope for the read endpoints.
fn list_response<T: Serialize>(data: Vec<T>) -> Json<serde_json::Value> {
    Json(json!({
        "success": true,
        "count": data.len(),
        "data": data,
    }))
}

#[derive(Clone, Deserialize)]
struct PerformanceQuery {
    #[serde(default)]
    year: Option<String>,
}

#[derive(Clone, Deserialize)]
struct SyncStatusQuery {
    #[serde(default)]
    limit: Option<i64>,
}

#[derive(Deserialize, Default)]
struct SyncRequest {
    #[serde(default)]
    state_name: Option<String>,
    #[serde(default)]
    fin_year: Option<String>,
}

#[derive(Clone, Deserialize, Default)]
struct SyncQueryParams {
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    year: Option<String>,
}

fn init_tracing() {
    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

async fn run_server(args: ServeArgs) -> anyhow::Result<()> {
    let addr: SocketAddr = args.bind.parse().context("failed to parse bind address")?;

    let source = Arc::new(
        mgfetcher::OpenDataClient::new(&args.base_url, &args.api_key)
            .context("failed to build upstream API client")?,
    );
    let config = StorageConfig::new(&args.base_path).with_cache_url(args.redis_url.clone());
    let storage = Arc::new(MgStorage::new(config, source).await?);

    let scheduler = if args.disable_scheduler {
        info!("Background sync scheduler disabled");
        None
    } else {
        Some(SyncScheduler::start(
            Arc::clone(&storage),
            Duration::from_secs(args.sync_interval_secs),
        ))
    };

    let state = AppState::new(storage);
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to bind service listener")?;

    info!("Service listening on {}", addr);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    if let Some(scheduler) = scheduler {
        scheduler.stop().await;
    }

    Ok(())
}

/// Builds the HTTP router used by the service.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/states", get(list_states))
        .route("/api/districts/:state", get(list_districts))
        .route("/api/performance/:district", get(district_performance))
        .route("/api/admin/sync", post(trigger_sync))
        .route("/api/admin/sync-status", get(sync_status))
        .route("/api/admin/stats", get(database_stats))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "cache_enabled": state.storage.cache.is_enabled(),
    }))
}

async fn list_states(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let states = state.storage.queries.list_states().await?;
    if states.is_empty() {
        return Err(ApiError::NotFound(
            "No states found. Data may not be synced yet.".to_string(),
        ));
    }
    Ok(list_response(states))
}

async fn list_districts(
    State(state): State<AppState>,
    Path(state_name): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let districts = state.storage.queries.list_districts(&state_name).await?;
    if districts.is_empty() {
        return Err(ApiError::NotFound(format!(
            "No districts found for state '{state_name}'"
        )));
    }
    Ok(list_response(districts))
}

async fn district_performance(
    State(state): State<AppState>,
    Path(district_name): Path<String>,
    Query(query): Query<PerformanceQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let rows = state
        .storage
        .queries
        .district_performance(&district_name, query.year.as_deref())
        .await?;
    if rows.is_empty() {
        return Err(ApiError::NotFound(format!(
            "No performance data found for district '{district_name}'"
        )));
    }
    Ok(list_response(rows))
}

/// Starts a sync in the background and acknowledges immediately; the
/// outcome lands in the sync log, observable via `/api/admin/sync-status`.
async fn trigger_sync(
    State(state): State<AppState>,
    Query(params): Query<SyncQueryParams>,
    body: Option<Json<SyncRequest>>,
) -> (StatusCode, Json<serde_json::Value>) {
    let Json(request) = body.unwrap_or_default();
    // JSON body wins over query parameters when both are present.
    let scope = SyncScope {
        state_name: request.state_name.or(params.state),
        fin_year: request.fin_year.or(params.year),
    };

    let storage = Arc::clone(&state.storage);
    tokio::spawn(async move {
        if let Err(err) = storage.synchronizer.sync(scope, SyncType::Manual).await {
            error!("Manual sync failed: {}", err);
        }
    });

    (
        StatusCode::ACCEPTED,
        Json(json!({
            "success": true,
            "message": "Sync started. Track progress via /api/admin/sync-status.",
        })),
    )
}

async fn sync_status(
    State(state): State<AppState>,
    Query(query): Query<SyncStatusQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let limit = query.limit.unwrap_or(10).clamp(1, 100);
    let logs = state.storage.queries.recent_sync_logs(limit)?;
    Ok(list_response(logs))
}

async fn database_stats(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let stats = state.storage.queries.database_stats()?;
    Ok(Json(json!({
        "success": true,
        "data": stats,
    })))
}

/// Periodic background sync driven by a fixed interval. The first run
/// happens one full interval after startup.
pub struct SyncScheduler {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl SyncScheduler {
    pub fn start(storage: Arc<MgStorage>, interval: Duration) -> Self {
        let (shutdown, mut shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately; consume it so startup
            // does not trigger a sync.
            ticker.tick().await;
            info!(
                "Sync scheduler started (every {}s)",
                interval.as_secs()
            );
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = storage
                            .synchronizer
                            .sync(SyncScope::default(), SyncType::Scheduled)
                            .await
                        {
                            warn!("Scheduled sync failed: {}", err);
                        }
                    }
                    _ = &mut shutdown_rx => {
                        info!("Sync scheduler stopping");
                        break;
                    }
                }
            }
        });
        Self { shutdown, handle }
    }

    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        let _ = self.handle.await;
    }
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
    info!("Shutdown signal received");
}
