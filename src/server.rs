use std::{
    convert::Infallible,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context as _;
use bytes::Bytes;
use http_body_util::Full;
use hyper::{
    HeaderMap, Method, Request, Response, StatusCode, Uri,
    body::Incoming,
    header::{self, HeaderValue},
    service::service_fn,
};
use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server::conn::auto::Builder as ConnectionBuilder,
};
use tokio::{net::TcpListener, sync::oneshot};
use tracing::Instrument as _;

use crate::{
    archive::{self, SkippedEntry},
    config::Config,
    resolver::{LookupKey, Resolution, ResourceIndex},
};

type ReplayBody = Full<Bytes>;

const NOT_FOUND_BODY: &str = "Not Found";
const BLANK_PAGE_BODY: &str = "Blank page";
const SERVICE_PROVIDER_BODY: &str = r#"{"data":{"id":"0000"}}"#;
const ALLOWED_METHODS: &str = "GET, HEAD, OPTIONS";
const TEXT_HTML: &str = "text/html; charset=utf-8";
const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

#[derive(Debug)]
pub struct ServerHandle {
    pub listen_addr: SocketAddr,
    pub index_len: usize,
    pub entries_skipped: usize,
    /// Archive location after `~` expansion and config-relative resolution.
    pub archive_path: PathBuf,
    pub index_page: Option<PathBuf>,
    shutdown_tx: oneshot::Sender<()>,
    join: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.join.await;
    }
}

/// The archive named by a config, parsed and indexed.
#[derive(Debug)]
pub struct IndexedArchive {
    pub archive_path: PathBuf,
    pub index: ResourceIndex,
    pub skipped: Vec<SkippedEntry>,
}

#[derive(Debug)]
struct ServerState {
    index: Arc<ResourceIndex>,
    index_page: Option<PathBuf>,
}

/// Reads and indexes the configured archive. A missing or malformed archive
/// is an error; malformed entries are logged and left out of the index.
pub async fn load_index(config: &Config) -> anyhow::Result<IndexedArchive> {
    let archive_path = config.archive_path()?;
    let path_for_task = archive_path.clone();
    let loaded = tokio::task::spawn_blocking(move || archive::load(&path_for_task))
        .await
        .context("join archive load task")?
        .context("load HTTP archive")?;

    log_skipped_entries(&archive_path, &loaded.skipped);
    let index = ResourceIndex::build(&loaded.exchanges, &config.archive.api_root);
    tracing::debug!(keys = ?index.sorted_keys(), "indexed recorded resources");

    Ok(IndexedArchive {
        archive_path,
        index,
        skipped: loaded.skipped,
    })
}

fn log_skipped_entries(archive_path: &Path, skipped: &[SkippedEntry]) {
    if skipped.is_empty() {
        return;
    }
    tracing::warn!(
        archive = %archive_path.display(),
        skipped = skipped.len(),
        "skipped malformed archive entries"
    );
    for entry in skipped {
        tracing::debug!(
            index = entry.index,
            reason = entry.reason.as_str(),
            "skipped archive entry"
        );
    }
}

/// Loads the archive, then binds `server.listen` and starts accepting.
///
/// The listener is not bound until the index is complete, so no request can
/// observe a partially built index.
pub async fn serve(config: &Config) -> anyhow::Result<ServerHandle> {
    let indexed = load_index(config).await?;
    let index_page = config.index_page_path()?;
    let state = Arc::new(ServerState {
        index: Arc::new(indexed.index),
        index_page: index_page.clone(),
    });

    let listener = TcpListener::bind(config.server.listen)
        .await
        .with_context(|| format!("bind {}", config.server.listen))?;
    let listen_addr = listener.local_addr().context("get local_addr")?;
    tracing::info!(
        listen = %listen_addr,
        archive = %indexed.archive_path.display(),
        resources = state.index.len(),
        skipped = indexed.skipped.len(),
        "replay server listening"
    );

    let index_len = state.index.len();
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
    let join = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = &mut shutdown_rx => break,
                accept = listener.accept() => {
                    let (stream, _peer) = match accept {
                        Ok(accepted) => accepted,
                        Err(err) => {
                            tracing::debug!("accept error: {err}");
                            continue;
                        }
                    };
                    let io = TokioIo::new(stream);
                    let state = Arc::clone(&state);
                    tokio::spawn(async move {
                        let service =
                            service_fn(move |req| replay_handler(req, Arc::clone(&state)));
                        let builder = ConnectionBuilder::new(TokioExecutor::new());
                        if let Err(err) = builder.serve_connection(io, service).await {
                            tracing::debug!("connection error: {err}");
                        }
                    });
                }
            }
        }
    });

    Ok(ServerHandle {
        listen_addr,
        index_len,
        entries_skipped: indexed.skipped.len(),
        archive_path: indexed.archive_path,
        index_page,
        shutdown_tx,
        join,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Route {
    Index,
    Blank,
    Live(LookupKey),
    ServiceProvider,
    Unmatched,
}

impl Route {
    fn from_uri(uri: &Uri) -> Self {
        let path = uri.path();
        if let Some(key) = LookupKey::from_request_target(path, uri.query()) {
            return Self::Live(key);
        }
        match path {
            "/" => Self::Index,
            "/blank" => Self::Blank,
            "/service-provider" => Self::ServiceProvider,
            _ => Self::Unmatched,
        }
    }

    fn log_label(&self) -> &'static str {
        match self {
            Self::Index => "index",
            Self::Blank => "blank",
            Self::Live(_) => "live",
            Self::ServiceProvider => "service-provider",
            Self::Unmatched => "unmatched",
        }
    }
}

#[derive(Debug)]
struct Dispatched {
    route: Route,
    resolution: Option<&'static str>,
    response: Response<ReplayBody>,
}

async fn replay_handler(
    req: Request<Incoming>,
    state: Arc<ServerState>,
) -> Result<Response<ReplayBody>, Infallible> {
    let (parts, _body) = req.into_parts();
    let request_method = parts.method.to_string();
    let request_url = parts.uri.to_string();
    let request_span = tracing::info_span!(
        "replay.request",
        method = %request_method,
        url = %request_url,
    );

    let dispatched = dispatch(&state, &parts.method, &parts.uri, &parts.headers)
        .instrument(request_span.clone())
        .await;
    request_span.in_scope(|| {
        emit_request_log(
            &request_method,
            &request_url,
            &dispatched.route,
            dispatched.resolution,
            dispatched.response.status(),
        )
    });
    Ok(dispatched.response)
}

async fn dispatch(
    state: &ServerState,
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
) -> Dispatched {
    let route = Route::from_uri(uri);
    let mut resolution = None;

    let mut response = if *method == Method::OPTIONS {
        preflight_response(headers)
    } else if *method != Method::GET && *method != Method::HEAD {
        method_not_allowed_response()
    } else {
        match &route {
            Route::Index => index_page_response(state.index_page.as_deref()).await,
            Route::Blank => simple_response(StatusCode::OK, BLANK_PAGE_BODY),
            Route::ServiceProvider => {
                body_response(StatusCode::OK, "application/json", SERVICE_PROVIDER_BODY)
            }
            Route::Live(key) => {
                let resolved = state.index.resolve(key);
                resolution = Some(resolved.log_label());
                tracing::debug!(
                    key = %key,
                    outcome = resolved.log_label(),
                    "resolved lookup key"
                );
                match resolved {
                    Resolution::Hit(body) => body_response(StatusCode::OK, TEXT_HTML, body),
                    Resolution::Miss => simple_response(StatusCode::NOT_FOUND, NOT_FOUND_BODY),
                }
            }
            Route::Unmatched => simple_response(StatusCode::NOT_FOUND, NOT_FOUND_BODY),
        }
    };

    if let Some(origin) = headers.get(header::ORIGIN) {
        apply_cors_headers(response.headers_mut(), origin);
    }

    Dispatched {
        route,
        resolution,
        response,
    }
}

async fn index_page_response(index_page: Option<&Path>) -> Response<ReplayBody> {
    let Some(index_page) = index_page else {
        return simple_response(StatusCode::NOT_FOUND, NOT_FOUND_BODY);
    };

    match tokio::fs::read(index_page).await {
        Ok(contents) => {
            let mut response = Response::new(Full::new(Bytes::from(contents)));
            response
                .headers_mut()
                .insert(header::CONTENT_TYPE, HeaderValue::from_static(TEXT_HTML));
            response
        }
        Err(err) => {
            tracing::warn!(
                path = %index_page.display(),
                "failed to read index page: {err}"
            );
            simple_response(StatusCode::INTERNAL_SERVER_ERROR, "index page unavailable")
        }
    }
}

/// Credentialed CORS: the request origin is echoed back, never `*`.
fn apply_cors_headers(headers: &mut HeaderMap, origin: &HeaderValue) {
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
        HeaderValue::from_static("true"),
    );
    headers.append(header::VARY, HeaderValue::from_static("Origin"));
}

fn preflight_response(request_headers: &HeaderMap) -> Response<ReplayBody> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = StatusCode::NO_CONTENT;
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOWED_METHODS),
    );
    if let Some(requested) = request_headers.get(header::ACCESS_CONTROL_REQUEST_HEADERS) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, requested.clone());
    }
    headers.insert(header::ALLOW, HeaderValue::from_static(ALLOWED_METHODS));
    response
}

fn method_not_allowed_response() -> Response<ReplayBody> {
    let mut response = simple_response(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed");
    response
        .headers_mut()
        .insert(header::ALLOW, HeaderValue::from_static(ALLOWED_METHODS));
    response
}

fn simple_response(status: StatusCode, message: &str) -> Response<ReplayBody> {
    body_response(status, TEXT_PLAIN, message)
}

fn body_response(
    status: StatusCode,
    content_type: &'static str,
    body: &str,
) -> Response<ReplayBody> {
    let mut response = Response::new(Full::new(Bytes::copy_from_slice(body.as_bytes())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

fn emit_request_log(
    method: &str,
    url: &str,
    route: &Route,
    resolution: Option<&'static str>,
    status: StatusCode,
) {
    tracing::info!(
        method = method,
        url = url,
        route = route.log_label(),
        outcome = resolution.unwrap_or("none"),
        status = status.as_u16(),
        "replay request completed",
    );
}
