use crate::clock::Clock;
use crate::collectors::dialect::ServiceInfo;
use crate::error::MonitorError;
use crate::executor::{CommandExecutor, CommandResult};
use crate::metrics::Metrics;
use crate::monitor::{CycleReport, StatusMonitor};
use crate::registry::{ServerPage, ServerRegistry};
use crate::state::{
    CreateServerRequest, Platform, ServerFilter, ServerRecord, ServerStatistics, ServerStatus,
    UpdateServerRequest,
};
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header::CONTENT_TYPE, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};
use tracing::{info, warn};

#[derive(Clone)]
pub struct HttpAppState {
    pub registry: Arc<dyn ServerRegistry>,
    pub monitor: Arc<StatusMonitor>,
    pub executor: Arc<CommandExecutor>,
    pub metrics: Arc<Metrics>,
    pub clock: Arc<dyn Clock>,
    pub check_on_create: bool,
}

/// Server record as exposed over the API; the password never leaves the process.
#[derive(Debug, Clone, Serialize)]
pub struct ServerView {
    pub id: u64,
    pub name: String,
    pub address: String,
    pub port: u16,
    pub description: String,
    pub platform: Platform,
    pub username: Option<String>,
    pub has_password: bool,
    pub has_private_key: bool,
    pub private_key_path: Option<String>,
    pub tags: Vec<String>,
    pub status: ServerStatus,
    pub last_checked: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
    pub cpu_usage: Option<String>,
    pub memory_usage: Option<String>,
    pub disk_usage: Option<String>,
    pub uptime: Option<String>,
    pub os_info: Option<String>,
}

impl From<&ServerRecord> for ServerView {
    fn from(value: &ServerRecord) -> Self {
        Self {
            id: value.id,
            name: value.name.clone(),
            address: value.address.clone(),
            port: value.port,
            description: value.description.clone(),
            platform: value.platform,
            username: value.username.clone(),
            has_password: value.password.is_some(),
            has_private_key: value.private_key_path.is_some(),
            private_key_path: value.private_key_path.clone(),
            tags: value.tags(),
            status: value.status,
            last_checked: value.last_checked,
            created_at: value.created_at,
            updated_at: value.updated_at,
            cpu_usage: value.metrics.cpu_usage.clone(),
            memory_usage: value.metrics.memory_usage.clone(),
            disk_usage: value.metrics.disk_usage.clone(),
            uptime: value.metrics.uptime.clone(),
            os_info: value.metrics.os_info.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ServerPageView {
    pub items: Vec<ServerView>,
    pub total: usize,
    pub page: u32,
    pub page_size: u32,
}

impl From<ServerPage> for ServerPageView {
    fn from(value: ServerPage) -> Self {
        Self {
            items: value.items.iter().map(ServerView::from).collect(),
            total: value.total,
            page: value.page,
            page_size: value.page_size,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CheckStatusResponse {
    pub success: bool,
    pub status: ServerStatus,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct CheckAllResponse {
    pub success: bool,
    pub message: String,
    #[serde(flatten)]
    pub report: CycleReport,
}

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    pub command: String,
}

#[derive(Debug, Serialize)]
pub struct ExecuteResponse {
    #[serde(flatten)]
    pub result: CommandResult,
    pub executed_at: String,
}

pub fn build_router(state: HttpAppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_handler))
        .route("/api/servers", get(list_servers).post(create_server))
        .route("/api/servers/statistics", get(statistics))
        .route("/api/servers/check-all-status", post(check_all))
        .route(
            "/api/servers/:id",
            get(get_server).put(update_server).delete(delete_server),
        )
        .route("/api/servers/:id/check-status", post(check_server))
        .route("/api/servers/:id/execute", post(execute_command))
        .route("/api/servers/:id/services", get(list_services))
        .route(
            "/api/servers/:id/services/:service/:action",
            post(manage_service),
        )
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn metrics_handler(State(state): State<HttpAppState>) -> Response {
    state.metrics.inc_scrape_count();
    state.metrics.refresh_uptime(state.clock.now_unix());
    match state.registry.statistics().await {
        Ok(stats) => state.metrics.set_server_counts(&stats),
        Err(err) => warn!(error = %err, "не удалось получить статистику реестра"),
    }
    match state.metrics.encode_metrics() {
        Ok(encoded) => {
            let mut response = Response::new(Body::from(encoded));
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            response
        }
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("ошибка кодирования метрик: {err}"),
        )
            .into_response(),
    }
}

async fn list_servers(
    State(state): State<HttpAppState>,
    Query(filter): Query<ServerFilter>,
) -> Result<Json<ServerPageView>, MonitorError> {
    let page = state.registry.list(&filter).await?;
    Ok(Json(page.into()))
}

async fn statistics(
    State(state): State<HttpAppState>,
) -> Result<Json<ServerStatistics>, MonitorError> {
    Ok(Json(state.registry.statistics().await?))
}

async fn get_server(
    State(state): State<HttpAppState>,
    Path(id): Path<u64>,
) -> Result<Json<ServerView>, MonitorError> {
    let record = state
        .registry
        .get(id)
        .await?
        .ok_or(MonitorError::NotFound(id))?;
    Ok(Json(ServerView::from(&record)))
}

async fn create_server(
    State(state): State<HttpAppState>,
    Json(request): Json<CreateServerRequest>,
) -> Result<(StatusCode, Json<ServerView>), MonitorError> {
    let record = state.registry.insert(request).await?;
    info!(server_id = record.id, name = %record.name, "сервер добавлен");

    if state.check_on_create {
        let monitor = state.monitor.clone();
        let id = record.id;
        tokio::spawn(async move {
            if let Err(err) = monitor.check_server(id).await {
                warn!(server_id = id, error = %err, "первичная проверка не выполнена");
            }
        });
    }

    Ok((StatusCode::CREATED, Json(ServerView::from(&record))))
}

async fn update_server(
    State(state): State<HttpAppState>,
    Path(id): Path<u64>,
    Json(request): Json<UpdateServerRequest>,
) -> Result<Json<ServerView>, MonitorError> {
    request.validate()?;
    let record = state
        .registry
        .update(id, request.into())
        .await?
        .ok_or(MonitorError::NotFound(id))?;
    Ok(Json(ServerView::from(&record)))
}

async fn delete_server(
    State(state): State<HttpAppState>,
    Path(id): Path<u64>,
) -> Result<StatusCode, MonitorError> {
    if state.registry.delete(id).await? {
        info!(server_id = id, "сервер удалён");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(MonitorError::NotFound(id))
    }
}

async fn check_server(
    State(state): State<HttpAppState>,
    Path(id): Path<u64>,
) -> Result<Json<CheckStatusResponse>, MonitorError> {
    let status = state.monitor.check_server(id).await?;
    Ok(Json(CheckStatusResponse {
        success: status != ServerStatus::Error,
        status,
        message: format!("статус сервера: {}", status.as_str()),
    }))
}

async fn check_all(
    State(state): State<HttpAppState>,
) -> Result<Json<CheckAllResponse>, MonitorError> {
    let report = state.monitor.check_all().await?;
    Ok(Json(CheckAllResponse {
        success: true,
        message: format!("проверено серверов: {}", report.checked),
        report,
    }))
}

async fn execute_command(
    State(state): State<HttpAppState>,
    Path(id): Path<u64>,
    Json(request): Json<ExecuteRequest>,
) -> Result<Json<ExecuteResponse>, MonitorError> {
    let result = state.executor.execute(id, &request.command).await?;
    Ok(Json(stamped(&state, result)))
}

async fn list_services(
    State(state): State<HttpAppState>,
    Path(id): Path<u64>,
) -> Result<Json<Vec<ServiceInfo>>, MonitorError> {
    Ok(Json(state.executor.list_services(id).await?))
}

async fn manage_service(
    State(state): State<HttpAppState>,
    Path((id, service, action)): Path<(u64, String, String)>,
) -> Result<Json<ExecuteResponse>, MonitorError> {
    let result = state.executor.manage_service(id, &service, &action).await?;
    Ok(Json(stamped(&state, result)))
}

fn stamped(state: &HttpAppState, result: CommandResult) -> ExecuteResponse {
    let now = UNIX_EPOCH + Duration::from_secs(state.clock.now_unix().max(0) as u64);
    ExecuteResponse {
        result,
        executed_at: humantime::format_rfc3339_seconds(now).to_string(),
    }
}
