//! Purpose: Provide the HTTP/JSON card gateway server.
//! Exports: `ServeConfig`, `serve`.
//! Role: Axum server translating `/records` requests into `Gateway` calls.
//! Invariants: Error envelopes are `{"error":{"kind","message"}}`; kinds stay stable.
//! Invariants: Store failures degrade data routes to 503; the process keeps serving.
//! Notes: Store I/O is blocking and runs on the blocking pool, one task per request.

use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Path as AxumPath, State};
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{Value, json};
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::Duration;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

use cards::api::{Error, ErrorKind};
use cards::gateway::{Gateway, GatewayOptions};
use cards::store::{StoreSettings, open_store};

#[derive(Clone, Debug)]
pub struct ServeConfig {
    pub bind: SocketAddr,
    pub store: StoreSettings,
    pub list_limit: Option<usize>,
    pub max_body_bytes: u64,
    pub cors_allowed_origins: Vec<String>,
    pub static_dir: Option<PathBuf>,
}

struct AppState {
    gateway: Gateway,
}

pub async fn serve(config: ServeConfig) -> Result<(), Error> {
    validate_config(&config)?;

    init_tracing();

    let max_body_bytes: usize = config
        .max_body_bytes
        .try_into()
        .map_err(|_| Error::new(ErrorKind::Usage).with_message("--max-body-bytes is too large"))?;
    let cors = cors_layer(&config.cors_allowed_origins)?;

    let store = open_store(&config.store)?;
    let gateway = Gateway::new(
        store,
        GatewayOptions {
            list_limit: config.list_limit,
        },
    );
    let backend = gateway.backend_name();
    let state = Arc::new(AppState {
        gateway: gateway.clone(),
    });

    let mut app = Router::new()
        .route("/healthz", get(healthz))
        .route("/records", get(list_records).post(create_record))
        .route(
            "/records/:id",
            get(get_record).put(update_record).delete(delete_record),
        );
    if let Some(dir) = &config.static_dir {
        app = app.fallback_service(ServeDir::new(dir));
    }
    let mut app = app.layer(DefaultBodyLimit::max(max_body_bytes));
    if let Some(cors) = cors {
        app = app.layer(cors);
    }
    let app = app.layer(TraceLayer::new_for_http()).with_state(state);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to bind server")
                .with_source(err)
        })?;
    info!(addr = %config.bind, backend, "card gateway listening");

    tokio::spawn(async move {
        match run_blocking(move || gateway.probe()).await {
            Ok(()) => info!(backend, "store reachable"),
            Err(err) => {
                warn!(backend, error = %err, "store unreachable; data requests will return 503")
            }
        }
    });

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        })
        .into_future();
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => {
            result.map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("server failed")
                    .with_source(err)
            })?;
        }
        _ = shutdown_signal() => {
            info!("shutting down");
            let _ = shutdown_tx.send(());
            match tokio::time::timeout(Duration::from_secs(10), &mut server).await {
                Ok(result) => result.map_err(|err| {
                    Error::new(ErrorKind::Io)
                        .with_message("server failed")
                        .with_source(err)
                })?,
                Err(_) => {
                    return Err(Error::new(ErrorKind::Io).with_message("server shutdown timed out"));
                }
            }
        }
    };
    Ok(())
}

fn validate_config(config: &ServeConfig) -> Result<(), Error> {
    if config.max_body_bytes == 0 {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--max-body-bytes must be greater than zero")
            .with_hint("Use a positive value like 65536."));
    }

    if config.max_body_bytes > usize::MAX as u64 {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--max-body-bytes exceeds platform limits")
            .with_hint("Use a smaller value that fits in memory."));
    }

    if config.list_limit == Some(0) {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--list-limit must be greater than zero")
            .with_hint("Omit --list-limit to return every card."));
    }

    if config.store.timeout.is_zero() {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--store-timeout-ms must be greater than zero")
            .with_hint("Use a positive value like 10000."));
    }

    if let Some(dir) = &config.static_dir {
        if !dir.is_dir() {
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!("--static-dir is not a directory: {}", dir.display()))
                .with_hint("Point --static-dir at an existing directory of assets."));
        }
    }

    Ok(())
}

fn cors_layer(origins: &[String]) -> Result<Option<CorsLayer>, Error> {
    if origins.is_empty() {
        return Ok(None);
    }
    let mut allowed = Vec::with_capacity(origins.len());
    for origin in origins {
        allowed.push(parse_origin(origin)?);
    }
    let layer = CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT]);
    Ok(Some(layer))
}

fn parse_origin(origin: &str) -> Result<HeaderValue, Error> {
    let invalid = || {
        Error::new(ErrorKind::Usage)
            .with_message(format!("invalid --cors-origin: {origin}"))
            .with_hint("Use an origin like https://cards.example.com (scheme and host only).")
    };
    let url = Url::parse(origin).map_err(|err| invalid().with_source(err))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() || url.path() != "/"
    {
        return Err(invalid());
    }
    let normalized = origin.trim_end_matches('/');
    HeaderValue::from_str(normalized).map_err(|err| invalid().with_source(err))
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .try_init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        let mut signal = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("install SIGTERM handler");
        signal.recv().await;
    };
    #[cfg(unix)]
    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    #[cfg(not(unix))]
    ctrl_c.await;
}

async fn run_blocking<T, F>(task: F) -> Result<T, Error>
where
    F: FnOnce() -> Result<T, Error> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task).await.map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("store task failed")
            .with_source(err)
    })?
}

async fn healthz() -> Response {
    json_response(StatusCode::OK, json!({ "ok": true }))
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    kind: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
}

async fn list_records(State(state): State<Arc<AppState>>) -> Response {
    let gateway = state.gateway.clone();
    match run_blocking(move || gateway.list()).await {
        Ok(records) => {
            let records: Vec<Value> = records.into_iter().map(Value::Object).collect();
            json_response(StatusCode::OK, Value::Array(records))
        }
        Err(err) => error_response(err),
    }
}

async fn create_record(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Response {
    let body = match payload {
        Ok(Json(body)) => body,
        Err(rejection) => return rejection_response(rejection),
    };
    let gateway = state.gateway.clone();
    match run_blocking(move || gateway.create(&body)).await {
        Ok(id) => json_response(
            StatusCode::CREATED,
            json!({ "message": "Card created", "id": id }),
        ),
        Err(err) => error_response(err),
    }
}

async fn get_record(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<String>,
) -> Response {
    let gateway = state.gateway.clone();
    match run_blocking(move || gateway.get(&id)).await {
        Ok(record) => json_response(StatusCode::OK, Value::Object(record)),
        Err(err) => error_response(err),
    }
}

async fn update_record(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<String>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Response {
    let body = match payload {
        Ok(Json(body)) => body,
        Err(rejection) => return rejection_response(rejection),
    };
    let gateway = state.gateway.clone();
    match run_blocking(move || gateway.update(&id, &body)).await {
        Ok(id) => json_response(
            StatusCode::OK,
            json!({ "message": "Card updated", "id": id }),
        ),
        Err(err) => error_response(err),
    }
}

async fn delete_record(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<String>,
) -> Response {
    let gateway = state.gateway.clone();
    match run_blocking(move || gateway.delete(&id)).await {
        Ok(id) => json_response(
            StatusCode::OK,
            json!({ "message": "Card deleted", "id": id }),
        ),
        Err(err) => error_response(err),
    }
}

fn json_response(status: StatusCode, payload: Value) -> Response {
    (status, Json(payload)).into_response()
}

/// Every unreadable body is a client error: wrong content type, bad JSON, or over the limit.
fn rejection_response(rejection: JsonRejection) -> Response {
    let err = Error::new(ErrorKind::Invalid).with_message(rejection.body_text());
    error_response_with_status(err, StatusCode::BAD_REQUEST)
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Invalid | ErrorKind::Usage => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Busy => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::Internal | ErrorKind::Io => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: Error) -> Response {
    let status = status_for(err.kind());
    match err.kind() {
        ErrorKind::Unavailable => warn!(error = %err, "store unavailable"),
        ErrorKind::Internal | ErrorKind::Io => error!(error = %err, "request failed"),
        _ => {}
    }
    error_response_with_status(err, status)
}

fn error_response_with_status(err: Error, status: StatusCode) -> Response {
    let body = if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
        ErrorBody {
            kind: err.kind().as_str(),
            message: "internal error".to_string(),
            hint: None,
            id: None,
        }
    } else {
        ErrorBody {
            kind: err.kind().as_str(),
            message: err.message().unwrap_or("error").to_string(),
            hint: err.hint().map(str::to_string),
            id: err.id().map(str::to_string),
        }
    };
    (status, Json(ErrorEnvelope { error: body })).into_response()
}
