//! HTTP front door: maps bundle and asset requests onto the router.

use std::collections::HashSet;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, Method, StatusCode, Uri},
    response::{
        sse::{Event, KeepAlive},
        IntoResponse, Response, Sse,
    },
    routing::get,
    Router as HttpRouter,
};
use forkserve_protocol::{BuildOptions, BundleRequest, Platform};
use forkserve_router::{BundleError, BundleResult, FileError, FileResult, Router, ServedFile};
use serde::Deserialize;
use tokio_stream::{wrappers::BroadcastStream, Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Body sent when a request's options differ from the running build.
pub const OPTION_CONFLICT_BODY: &str = "Changing query params after the bundle has been created is not supported. To see the changes you need to restart the forkserve server.";

#[derive(Clone)]
pub struct AppState {
    router: Router,
    platforms: Arc<HashSet<String>>,
    shutdown: CancellationToken,
}

impl AppState {
    /// `shutdown` ends open event streams so graceful shutdown can finish.
    pub fn new(
        router: Router,
        platforms: impl IntoIterator<Item = Platform>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            router,
            platforms: Arc::new(platforms.into_iter().map(|p| p.to_string()).collect()),
            shutdown,
        }
    }
}

pub fn app(state: AppState) -> HttpRouter {
    HttpRouter::new()
        .route("/events", get(handle_events))
        .fallback(handle_request)
        .with_state(state)
}

async fn handle_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(state.router.subscribe()).filter_map(|item| {
        let event = item.ok()?;
        Event::default().json_data(&event).ok().map(Ok)
    });
    let stream =
        futures_util::StreamExt::take_until(stream, state.shutdown.clone().cancelled_owned());

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

#[derive(Debug, Default, Deserialize)]
pub struct BundleQuery {
    platform: Option<String>,
    dev: Option<String>,
    minify: Option<String>,
}

async fn handle_request(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
) -> Response {
    if method != Method::GET && method != Method::HEAD {
        return text(StatusCode::METHOD_NOT_ALLOWED, "method not allowed");
    }

    let path = uri.path();
    if !path.ends_with(".bundle") {
        let filename = path.trim_start_matches('/');
        if filename.is_empty() {
            return text(StatusCode::NOT_FOUND, "not found");
        }
        debug!(%filename, "file request");
        return file_response(state.router.request_file(filename).await);
    }

    let query = match Query::<BundleQuery>::try_from_uri(&uri) {
        Ok(Query(query)) => query,
        Err(rejection) => return text(StatusCode::BAD_REQUEST, rejection.body_text()),
    };
    let request = match parse_bundle_request(path, &query, &state.platforms) {
        Ok(request) => request,
        Err(message) => return text(StatusCode::BAD_REQUEST, message),
    };
    debug!(platform = %request.platform, filename = %request.filename, "bundle request");
    bundle_response(state.router.request_bundle(request).await)
}

/// Turn `/{name}.{platform}.bundle` (or `/{name}.bundle?platform=…`) plus
/// its query into a router request.
pub fn parse_bundle_request(
    path: &str,
    query: &BundleQuery,
    platforms: &HashSet<String>,
) -> Result<BundleRequest, String> {
    let filename = path.trim_start_matches('/');
    let base = filename.rsplit('/').next().unwrap_or(filename);
    let stem = base.strip_suffix(".bundle").unwrap_or(base);

    let from_name = stem
        .rsplit_once('.')
        .map(|(_, platform)| platform)
        .filter(|platform| platforms.contains(*platform));
    let platform = match (from_name, query.platform.as_deref()) {
        (Some(platform), _) => platform,
        (None, Some(platform)) => platform,
        (None, None) => return Err("missing platform".to_string()),
    };
    if !platforms.contains(platform) {
        return Err(format!("unsupported platform: {platform}"));
    }
    let platform = platform.parse::<Platform>().map_err(|err| err.to_string())?;

    let options = BuildOptions {
        dev: parse_flag("dev", query.dev.as_deref())?,
        minify: parse_flag("minify", query.minify.as_deref())?,
    };

    Ok(BundleRequest {
        platform,
        filename: filename.to_string(),
        options,
    })
}

fn parse_flag(name: &str, value: Option<&str>) -> Result<Option<bool>, String> {
    match value {
        None => Ok(None),
        Some("true") | Some("1") | Some("") => Ok(Some(true)),
        Some("false") | Some("0") => Ok(Some(false)),
        Some(other) => Err(format!("invalid value for {name}: {other}")),
    }
}

pub fn bundle_response(result: BundleResult) -> Response {
    match result {
        Ok(file) => served(file),
        Err(BundleError::Compile { errors }) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            axum::Json(serde_json::json!({ "errors": errors })),
        )
            .into_response(),
        Err(BundleError::NotFound) => text(StatusCode::NOT_FOUND, "bundle not found"),
        Err(BundleError::OptionConflict { .. }) => {
            text(StatusCode::NOT_IMPLEMENTED, OPTION_CONFLICT_BODY)
        }
        Err(BundleError::TimedOut) => text(StatusCode::GATEWAY_TIMEOUT, "build worker timed out"),
        Err(BundleError::Terminated) => {
            text(StatusCode::SERVICE_UNAVAILABLE, "server is shutting down")
        }
        Err(err @ (BundleError::BuildFailed { .. }
        | BundleError::Read { .. }
        | BundleError::Transport(_))) => {
            warn!(error = %err, "bundle request failed");
            text(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

pub fn file_response(result: FileResult) -> Response {
    match result {
        Ok(file) => served(file),
        Err(FileError::NotFound) => text(StatusCode::NOT_FOUND, "not found"),
        Err(err @ FileError::TimedOut { .. }) => {
            text(StatusCode::GATEWAY_TIMEOUT, err.to_string())
        }
        Err(FileError::Terminated) => {
            text(StatusCode::SERVICE_UNAVAILABLE, "server is shutting down")
        }
        Err(err @ FileError::Read { .. }) => {
            warn!(error = %err, "file request failed");
            text(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

fn served(file: ServedFile) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, file.mime_type),
            (header::CACHE_CONTROL, "no-cache".to_string()),
        ],
        Body::from(file.content),
    )
        .into_response()
}

fn text(status: StatusCode, body: impl Into<String>) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body.into(),
    )
        .into_response()
}
