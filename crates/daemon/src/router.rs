//! HTTP routes for browser clients.
//!
//! This module maps the HTTP surface onto the file access layer:
//! - `GET /` serves the single-page browser UI
//! - `GET /api/list` returns a JSON directory listing
//! - `GET /download/{*path}` streams a file as an attachment
//! - `POST /upload` stores a multipart upload
//! - `GET /qr.png` serves the QR code of the share URL
//!
//! Filesystem work runs on the blocking pool. The root is read from the
//! registry once per request and travels with the resolved path, so a root
//! change never splits one request across two roots.

use std::io::{self, Read};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::multipart::{Field, MultipartError};
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::{Buf, Bytes};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use protocol::{
    ErrorBody, ListParams, ListResponse, SortSpec, UploadParams, UPLOAD_FILE_FIELD,
    UPLOAD_PATH_FIELD,
};
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio_util::io::ReaderStream;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::files::{
    resolve, DirectoryBrowser, Download, Entry, FileTransfer, ListError, ListingQuery,
    ResolveError, Root, RootRegistry, StagedUpload, TransferError, Upload,
};

/// The browser UI.
const INDEX_HTML: &str = include_str!("../assets/index.html");

/// Allowance on top of the upload limit for multipart framing and the
/// destination field.
const MULTIPART_OVERHEAD: u64 = 1024 * 1024;

/// Upload chunks buffered between the request body and the writer.
const UPLOAD_CHANNEL_CAPACITY: usize = 16;

/// RFC 5987 `attr-char` plus the unreserved set; everything else is escaped.
const FILENAME_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// Currently shared root.
    pub registry: Arc<RootRegistry>,
    /// Directory listing settings.
    pub browser: Arc<DirectoryBrowser>,
    /// Download and upload handler.
    pub transfer: Arc<FileTransfer>,
    /// Pre-rendered QR code of the share URL.
    pub qr_png: Option<Bytes>,
}

impl AppState {
    /// Create handler state without a QR code.
    pub fn new(
        registry: Arc<RootRegistry>,
        browser: DirectoryBrowser,
        transfer: FileTransfer,
    ) -> Self {
        Self {
            registry,
            browser: Arc::new(browser),
            transfer: Arc::new(transfer),
            qr_png: None,
        }
    }

    /// Serve `png` at `/qr.png`.
    pub fn with_qr_png(mut self, png: impl Into<Bytes>) -> Self {
        self.qr_png = Some(png.into());
        self
    }
}

/// Build the application router.
pub fn build_router(state: AppState) -> Router {
    let upload_limit = state
        .transfer
        .max_file_size()
        .saturating_add(MULTIPART_OVERHEAD);
    let upload_limit = usize::try_from(upload_limit).unwrap_or(usize::MAX);

    Router::new()
        .route("/", get(index))
        .route("/api/list", get(list))
        .route("/download/{*path}", get(download))
        .route(
            "/upload",
            post(upload).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/qr.png", get(qr_code))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Error returned by handlers as `{"error": "..."}`.
///
/// Messages are fixed per failure class and never carry filesystem paths.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    /// Create an error with an explicit status.
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// A 400 response.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    /// A generic 500 response.
    pub fn internal() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
    }

    /// HTTP status of this error.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Message sent to the client.
    pub fn message(&self) -> &str {
        &self.message
    }

    fn invalid_path() -> Self {
        Self::bad_request("Invalid path")
    }

    fn from_multipart(err: MultipartError) -> Self {
        let status = err.status();
        debug!(error = %err, %status, "Rejected multipart body");
        if status == StatusCode::PAYLOAD_TOO_LARGE {
            Self::new(status, "File too large")
        } else if status.is_client_error() {
            Self::bad_request("Malformed upload")
        } else {
            Self::internal()
        }
    }

    fn from_join(err: tokio::task::JoinError) -> Self {
        error!(error = %err, "Blocking file task failed");
        Self::internal()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody::new(self.message))).into_response()
    }
}

impl From<ResolveError> for ApiError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::NoRootConfigured => Self::bad_request("No folder selected"),
            ResolveError::PathTraversal(ref path) => {
                warn!(path = %path, "Rejected path outside shared root");
                Self::invalid_path()
            }
            other => {
                debug!(error = %other, "Rejected path");
                Self::invalid_path()
            }
        }
    }
}

impl From<ListError> for ApiError {
    fn from(err: ListError) -> Self {
        match err {
            ListError::NotFound(_) => Self::invalid_path(),
            ListError::NotADirectory(_) => Self::bad_request("Not a directory"),
            ListError::AccessDenied(ref path) => {
                debug!(path = ?path, "Listing denied");
                Self::new(StatusCode::FORBIDDEN, "Access denied")
            }
            ListError::Io(e) => {
                error!(error = %e, "Listing failed");
                Self::internal()
            }
        }
    }
}

impl From<TransferError> for ApiError {
    fn from(err: TransferError) -> Self {
        match err {
            TransferError::NotFound(_)
            | TransferError::NotADirectory(_)
            | TransferError::OutsideRoot(_) => Self::invalid_path(),
            TransferError::IsADirectory(_) => Self::bad_request("Is a directory"),
            TransferError::InvalidFilename(_) => Self::bad_request("Invalid filename"),
            TransferError::FileTooLarge { limit } => Self::new(
                StatusCode::PAYLOAD_TOO_LARGE,
                format!("File too large (limit {limit} bytes)"),
            ),
            TransferError::Interrupted(e) => {
                debug!(error = %e, "Upload body ended early");
                Self::bad_request("Upload interrupted")
            }
            other => {
                error!(error = %other, "File transfer failed");
                Self::internal()
            }
        }
    }
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn list(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<ListResponse>, ApiError> {
    let sort = params.sort_spec().unwrap_or_else(|e| {
        debug!(error = %e, "Ignoring sort parameter");
        SortSpec::default()
    });
    let mut query = ListingQuery::new().sort(sort);
    if let Some(term) = params.search_term() {
        query = query.search(term);
    }
    let relative = params.path.unwrap_or_default();

    let root = state.registry.get();
    let browser = Arc::clone(&state.browser);
    let target = relative.clone();
    let entries = tokio::task::spawn_blocking(move || -> Result<Vec<Entry>, ApiError> {
        let dir = resolve(root.as_ref(), &target)?;
        Ok(browser.list(&dir, &query)?)
    })
    .await
    .map_err(ApiError::from_join)??;

    Ok(Json(ListResponse {
        path: relative,
        items: entries.iter().map(Entry::to_wire).collect(),
    }))
}

async fn download(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Response, ApiError> {
    let root = state.registry.get();
    let transfer = Arc::clone(&state.transfer);
    let download = tokio::task::spawn_blocking(move || -> Result<Download, ApiError> {
        let resolved = resolve(root.as_ref(), &path)?;
        Ok(transfer.open_for_read(&resolved)?)
    })
    .await
    .map_err(ApiError::from_join)??;

    let disposition = content_disposition(download.file_name());
    let len = download.len();
    info!(file = %download.file_name(), size = len, "Serving download");

    // Never send more than the advertised length if the file grows meanwhile
    let file = tokio::fs::File::from_std(download.into_file()).take(len);
    let body = Body::from_stream(ReaderStream::new(file));

    let mut response = Response::new(body);
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&disposition).map_err(|e| {
            error!(error = %e, "Unencodable Content-Disposition");
            ApiError::internal()
        })?,
    );
    Ok(response)
}

async fn upload(
    State(state): State<AppState>,
    Query(params): Query<UploadParams>,
    mut multipart: Multipart,
) -> Result<&'static str, ApiError> {
    // One snapshot for staging and for the final destination
    let root = state.registry.get();
    let mut destination = params.path.unwrap_or_default();
    let mut staged = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(ApiError::from_multipart)?
    {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some(UPLOAD_PATH_FIELD) => {
                destination = field.text().await.map_err(ApiError::from_multipart)?;
            }
            Some(UPLOAD_FILE_FIELD) if staged.is_none() => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                if file_name.is_empty() {
                    return Err(ApiError::bad_request("No selected file"));
                }
                staged = Some(stage_field(&state, root.clone(), file_name, field).await?);
            }
            _ => {}
        }
    }

    let staged = staged.ok_or_else(|| ApiError::bad_request("Missing file"))?;
    let transfer = Arc::clone(&state.transfer);
    let stored = tokio::task::spawn_blocking(move || -> Result<Upload, ApiError> {
        let dir = resolve(root.as_ref(), &destination)?;
        Ok(transfer.commit(staged, &dir)?)
    })
    .await
    .map_err(ApiError::from_join)??;

    debug!(file = %stored.file_name, size = stored.size, "Upload accepted");
    Ok("OK")
}

/// Pump one multipart field into a hidden file in the shared root.
async fn stage_field(
    state: &AppState,
    root: Option<Arc<Root>>,
    file_name: String,
    mut field: Field<'_>,
) -> Result<StagedUpload, ApiError> {
    let transfer = Arc::clone(&state.transfer);
    let (tx, rx) = mpsc::channel(UPLOAD_CHANNEL_CAPACITY);

    let writer = tokio::task::spawn_blocking(move || -> Result<StagedUpload, ApiError> {
        let staging = resolve(root.as_ref(), "")?;
        Ok(transfer.stage(&staging, &file_name, ChannelReader::new(rx))?)
    });

    let mut stream_error = None;
    loop {
        match field.chunk().await {
            Ok(Some(chunk)) => {
                // A closed channel means the writer already gave up
                if tx.send(Ok(chunk)).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                let _ = tx.send(Err(io::Error::other(e.body_text()))).await;
                stream_error = Some(e);
                break;
            }
        }
    }
    drop(tx);

    let staged = writer.await.map_err(ApiError::from_join)?;
    if let Some(e) = stream_error {
        return Err(ApiError::from_multipart(e));
    }
    staged
}

async fn qr_code(State(state): State<AppState>) -> Result<Response, ApiError> {
    let png = state
        .qr_png
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "QR code unavailable"))?;
    Ok(([(header::CONTENT_TYPE, "image/png")], png).into_response())
}

/// Blocking reader over chunks sent from the async side.
///
/// A sent error is returned once and ends the upload; a closed channel reads
/// as end of file.
struct ChannelReader {
    rx: mpsc::Receiver<io::Result<Bytes>>,
    current: Bytes,
}

impl ChannelReader {
    fn new(rx: mpsc::Receiver<io::Result<Bytes>>) -> Self {
        Self {
            rx,
            current: Bytes::new(),
        }
    }
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.current.is_empty() {
            match self.rx.blocking_recv() {
                Some(Ok(chunk)) => self.current = chunk,
                Some(Err(e)) => return Err(e),
                None => return Ok(0),
            }
        }

        let n = buf.len().min(self.current.len());
        buf[..n].copy_from_slice(&self.current[..n]);
        self.current.advance(n);
        Ok(n)
    }
}

/// `Content-Disposition` value offering `name` as an attachment.
///
/// Carries an ASCII fallback plus the exact UTF-8 name in `filename*`.
pub fn content_disposition(name: &str) -> String {
    let fallback: String = name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii_graphic() || c == ' ' => c,
            _ => '_',
        })
        .collect();
    let encoded = utf8_percent_encode(name, FILENAME_ESCAPE);
    format!("attachment; filename=\"{fallback}\"; filename*=UTF-8''{encoded}")
}
