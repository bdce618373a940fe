//! HTTP routes
//!
//! | Route | Response |
//! |---|---|
//! | `GET /healthz` | `ok` |
//! | `GET /packageview?url&name&version` | chart metadata and file list |
//! | `GET /packageview/files?url&name&version` | sorted file list |
//! | `GET /packageview/files/{path}?url&name&version&format` | one file, conditional |
//! | `GET /chartrepositories/charts?url` | chart names |
//! | `GET /chartrepositories/charts/{name}/versions?url` | versions, newest first |

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use chartserve_core::{ChartMetadata, DataFormat};
use chartserve_repo::{ChartService, ResolvedChart};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::error::{Result, ServerError};
use crate::serve::{FreshnessPolicy, ServedFile};

/// State shared by all handlers
pub struct AppState {
    pub service: ChartService,
    pub policy: FreshnessPolicy,
}

impl AppState {
    pub fn new(service: ChartService, policy: FreshnessPolicy) -> Self {
        Self { service, policy }
    }
}

/// Query parameters naming a chart
#[derive(Debug, Default, Deserialize)]
pub struct ChartQuery {
    pub url: Option<String>,
    pub name: Option<String>,
    pub version: Option<String>,
    pub format: Option<String>,
}

impl ChartQuery {
    fn url(&self) -> Result<&str> {
        required(self.url.as_deref(), "url")
    }

    fn name(&self) -> Result<&str> {
        required(self.name.as_deref(), "chart name")
    }

    fn version(&self) -> &str {
        self.version.as_deref().unwrap_or_default()
    }
}

fn required<'a>(value: Option<&'a str>, parameter: &str) -> Result<&'a str> {
    match value.map(str::trim) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(ServerError::missing(parameter)),
    }
}

/// Summary of one resolved chart
#[derive(Debug, Clone, Serialize)]
pub struct PackageView {
    pub url: String,
    pub name: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ChartMetadata>,
    pub digest: String,
    pub files: Vec<String>,
}

impl From<&ResolvedChart> for PackageView {
    fn from(resolved: &ResolvedChart) -> Self {
        let chart = &resolved.chart;
        Self {
            url: chart.key.repository.clone(),
            name: chart.key.name.clone(),
            version: resolved.version.clone(),
            metadata: chart.metadata.clone(),
            digest: chart.digest.clone(),
            files: file_list(resolved),
        }
    }
}

fn file_list(resolved: &ResolvedChart) -> Vec<String> {
    resolved
        .chart
        .file_names()
        .into_iter()
        .map(str::to_string)
        .collect()
}

/// Build the router over shared state
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/packageview", get(package_view))
        .route("/packageview/files", get(list_files))
        .route("/packageview/files/*path", get(get_file))
        .route("/chartrepositories/charts", get(list_charts))
        .route("/chartrepositories/charts/:name/versions", get(list_versions))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn resolve(state: &AppState, query: &ChartQuery) -> Result<ResolvedChart> {
    let (url, name) = (query.url()?, query.name()?);
    Ok(state.service.get_chart(url, name, query.version()).await?)
}

async fn package_view(State(state): State<Arc<AppState>>, Query(query): Query<ChartQuery>) -> Result<Json<PackageView>> {
    let resolved = resolve(&state, &query).await?;
    Ok(Json(PackageView::from(&resolved)))
}

async fn list_files(State(state): State<Arc<AppState>>, Query(query): Query<ChartQuery>) -> Result<Json<Vec<String>>> {
    let resolved = resolve(&state, &query).await?;
    Ok(Json(file_list(&resolved)))
}

async fn get_file(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    Query(query): Query<ChartQuery>,
    headers: HeaderMap,
) -> Result<Response> {
    let format = DataFormat::parse(query.format.as_deref().unwrap_or_default())?;
    let resolved = resolve(&state, &query).await?;
    let max_age = state.policy.max_age(query.version());

    let file = ServedFile::from_chart(&resolved.chart, &path, format, max_age)?;
    tracing::debug!(
        chart = %resolved.chart.key,
        path = %path,
        format = format.as_str(),
        bytes = file.data.len(),
        "serving chart file"
    );
    Ok(file.respond(&headers))
}

async fn list_charts(State(state): State<Arc<AppState>>, Query(query): Query<ChartQuery>) -> Result<Json<Vec<String>>> {
    Ok(Json(state.service.list_charts(query.url()?).await?))
}

async fn list_versions(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(query): Query<ChartQuery>,
) -> Result<Json<Vec<String>>> {
    let name = required(Some(name.as_str()), "chart name")?;
    Ok(Json(state.service.list_versions(query.url()?, name).await?))
}

/// Serve until Ctrl-C
pub async fn run(config: ServerConfig) -> Result<()> {
    let service = config.build_service().await?;
    let state = Arc::new(AppState::new(service, config.freshness));

    let listener = tokio::net::TcpListener::bind(config.listen).await?;
    tracing::info!(listen = %config.listen, "chartserve listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("chartserve stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
