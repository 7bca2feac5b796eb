use crate::config::ServiceConfig;
use crate::protocol::{
    AppInfo, DeleteServersResponse, ServerModeResponse, ServersResponse, SetServerModeRequest,
    SetServerModeResponse, SetServersRequest, SetServersResponse, VersionResponse,
};
use crate::service::{ChronyService, ServiceError};
use crate::status::StatusSnapshot;
use axum::body::Bytes;
use axum::extract::{FromRequest, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    pub service: ChronyService,
    pub app: Arc<AppInfo>,
}

impl AppState {
    pub fn new(service: ChronyService, app: AppInfo) -> Self {
        Self {
            service,
            app: Arc::new(app),
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Request-level failures. Everything else is reported inside a 200 body.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message).into_response(),
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

/// JSON request body, parsed whatever the `Content-Type`. Any read or parse
/// failure is a 400.
pub struct JsonBody<T>(pub T);

impl<S, T> FromRequest<S> for JsonBody<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|e| ApiError::BadRequest(format!("Invalid JSON: {}", e.body_text())))?;

        serde_json::from_slice(&bytes)
            .map(JsonBody)
            .map_err(|e| ApiError::BadRequest(format!("Invalid JSON: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/chrony/version", get(chrony_version))
        .route("/chrony/status", get(status))
        .route(
            "/chrony/servers",
            get(list_servers).put(set_servers).delete(delete_servers),
        )
        .route("/chrony/servers/default", axum::routing::put(default_servers))
        .route(
            "/chrony/server-mode",
            get(server_mode).put(set_server_mode),
        )
        .route("/version", get(app_version))
        .route("/health", get(health))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn chrony_version(State(state): State<AppState>) -> Json<VersionResponse> {
    Json(state.service.chrony_version().await)
}

async fn status(State(state): State<AppState>) -> Json<StatusSnapshot> {
    Json(state.service.status().await)
}

async fn list_servers(State(state): State<AppState>) -> Json<ServersResponse> {
    Json(state.service.servers().await)
}

async fn set_servers(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<SetServersRequest>,
) -> Result<Json<SetServersResponse>, ApiError> {
    let resp = state.service.set_servers(req.servers).await?;
    Ok(Json(resp))
}

async fn delete_servers(State(state): State<AppState>) -> Json<DeleteServersResponse> {
    Json(state.service.delete_servers().await)
}

async fn default_servers(State(state): State<AppState>) -> Json<SetServersResponse> {
    Json(state.service.reset_default_servers().await)
}

async fn server_mode(State(state): State<AppState>) -> Json<ServerModeResponse> {
    Json(state.service.server_mode().await)
}

async fn set_server_mode(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<SetServerModeRequest>,
) -> Json<SetServerModeResponse> {
    Json(state.service.set_server_mode(req.enabled).await)
}

async fn app_version(State(state): State<AppState>) -> Json<AppInfo> {
    Json(state.app.as_ref().clone())
}

async fn health() -> &'static str {
    "OK"
}

// ---------------------------------------------------------------------------
// Serving
// ---------------------------------------------------------------------------

pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

/// Bind to the configured address and serve until SIGINT or SIGTERM.
pub async fn run(config: ServiceConfig) -> color_eyre::Result<()> {
    let addr = config.bind_addr();
    let service = ChronyService::from_config(config)?;
    let state = AppState::new(service, AppInfo::current());

    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(
        "Starting chrony API server on http://{}",
        listener.local_addr()?
    );

    serve(listener, state, signal_shutdown()).await?;
    tracing::info!("server stopped");
    Ok(())
}

pub async fn signal_shutdown() {
    use tokio::signal::unix::{SignalKind, signal};

    let (mut sigterm, mut sigint) =
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(term), Ok(int)) => (term, int),
            (Err(e), _) | (_, Err(e)) => {
                tracing::error!(error = %e, "failed to install signal handlers");
                return std::future::pending().await;
            }
        };

    tokio::select! {
        _ = sigterm.recv() => tracing::info!("received SIGTERM"),
        _ = sigint.recv() => tracing::info!("received SIGINT"),
    }
}
