//! Integration tests for the HTTP surface.
//!
//! These tests drive the router in-process and verify:
//! - Listing, searching and sorting
//! - Downloads and their headers
//! - Multipart uploads, including hostile names and destinations
//! - Confinement to the shared folder

use std::fs;
use std::path::Path;
use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use daemon::files::{DirectoryBrowser, FileTransfer, Root, RootRegistry};
use daemon::router::{build_router, AppState};
use protocol::{ErrorBody, ListResponse};
use tempfile::TempDir;
use tower::ServiceExt;

const BOUNDARY: &str = "lanshare-test-boundary";
const TEST_UPLOAD_LIMIT: u64 = 1024 * 1024;

/// A router sharing a fresh temporary folder.
fn create_test_app(limit: u64) -> (Router, Arc<RootRegistry>, TempDir) {
    let share = TempDir::new().unwrap();
    let registry = Arc::new(RootRegistry::with_root(Root::new(share.path()).unwrap()));
    let state = AppState::new(
        Arc::clone(&registry),
        DirectoryBrowser::new(),
        FileTransfer::new(limit),
    );
    (build_router(state), registry, share)
}

fn populate(root: &Path) {
    fs::create_dir(root.join("dirA")).unwrap();
    fs::write(root.join("b.txt"), b"0123456789").unwrap();
    fs::write(root.join("A.txt"), b"01234").unwrap();
}

async fn get(app: &Router, uri: &str) -> Response {
    app.clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn body_bytes(response: Response) -> Vec<u8> {
    to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

async fn error_message(response: Response) -> String {
    let body: ErrorBody = serde_json::from_slice(&body_bytes(response).await).unwrap();
    body.error
}

async fn list(app: &Router, uri: &str) -> Vec<String> {
    let response = get(app, uri).await;
    assert_eq!(response.status(), StatusCode::OK);
    let listing: ListResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
    listing.items.into_iter().map(|item| item.name).collect()
}

/// One multipart part: field name, optional file name, content.
struct Part<'a> {
    name: &'a str,
    file_name: Option<&'a str>,
    content: &'a [u8],
}

fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part.file_name {
            Some(file_name) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                        part.name, file_name
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(b"Content-Type: application/octet-stream\r\n");
            }
            None => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n", part.name)
                        .as_bytes(),
                );
            }
        }
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(part.content);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

async fn upload(app: &Router, uri: &str, parts: &[Part<'_>]) -> Response {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body(parts)))
        .unwrap();
    app.clone().oneshot(request).await.unwrap()
}

fn file_part<'a>(file_name: &'a str, content: &'a [u8]) -> Part<'a> {
    Part {
        name: "file",
        file_name: Some(file_name),
        content,
    }
}

fn path_part(path: &str) -> Part<'_> {
    Part {
        name: "path",
        file_name: None,
        content: path.as_bytes(),
    }
}

fn leftover_partials(dir: &Path) -> Vec<String> {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(".part"))
        .collect()
}

// =============================================================================
// Index
// =============================================================================

#[tokio::test]
async fn test_index_serves_html() {
    let (app, _registry, _share) = create_test_app(TEST_UPLOAD_LIMIT);

    let response = get(&app, "/").await;
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
    assert!(content_type.starts_with("text/html"));

    let body = String::from_utf8(body_bytes(response).await).unwrap();
    assert!(body.contains("/api/list"));
}

// =============================================================================
// Listing
// =============================================================================

#[tokio::test]
async fn test_list_root_directories_first_then_name() {
    let (app, _registry, share) = create_test_app(TEST_UPLOAD_LIMIT);
    populate(share.path());

    assert_eq!(list(&app, "/api/list").await, vec!["dirA", "A.txt", "b.txt"]);
    assert_eq!(
        list(&app, "/api/list?path=&sort=name").await,
        vec!["dirA", "A.txt", "b.txt"]
    );
}

#[tokio::test]
async fn test_list_response_shape() {
    let (app, _registry, share) = create_test_app(TEST_UPLOAD_LIMIT);
    populate(share.path());

    let response = get(&app, "/api/list?sort=size_desc").await;
    let listing: ListResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();

    assert_eq!(listing.path, "");
    let b = listing.items.iter().find(|i| i.name == "b.txt").unwrap();
    assert!(!b.is_dir);
    assert_eq!(b.size, 10);
    assert!(chrono::DateTime::parse_from_rfc3339(&b.modified).is_ok());

    let names: Vec<_> = listing.items.iter().map(|i| i.name.as_str()).collect();
    assert_eq!(names, vec!["dirA", "b.txt", "A.txt"]);
}

#[tokio::test]
async fn test_list_search_is_case_insensitive() {
    let (app, _registry, share) = create_test_app(TEST_UPLOAD_LIMIT);
    populate(share.path());
    fs::create_dir(share.path().join("Backups")).unwrap();

    assert_eq!(
        list(&app, "/api/list?search=B").await,
        vec!["Backups", "b.txt"]
    );
}

#[tokio::test]
async fn test_list_subdirectory() {
    let (app, _registry, share) = create_test_app(TEST_UPLOAD_LIMIT);
    fs::create_dir_all(share.path().join("photos/2024")).unwrap();
    fs::write(share.path().join("photos/cat.jpg"), b"meow").unwrap();

    assert_eq!(
        list(&app, "/api/list?path=photos").await,
        vec!["2024", "cat.jpg"]
    );
}

#[tokio::test]
async fn test_list_rejects_traversal_and_missing_alike() {
    let (app, _registry, _share) = create_test_app(TEST_UPLOAD_LIMIT);

    let escaped = get(&app, "/api/list?path=../..").await;
    assert_eq!(escaped.status(), StatusCode::BAD_REQUEST);
    let escaped = error_message(escaped).await;

    let missing = get(&app, "/api/list?path=does-not-exist").await;
    assert_eq!(missing.status(), StatusCode::BAD_REQUEST);
    let missing = error_message(missing).await;

    assert_eq!(escaped, "Invalid path");
    assert_eq!(escaped, missing);
}

#[tokio::test]
async fn test_list_file_is_not_a_directory() {
    let (app, _registry, share) = create_test_app(TEST_UPLOAD_LIMIT);
    populate(share.path());

    let response = get(&app, "/api/list?path=b.txt").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_list_unknown_sort_falls_back_to_name() {
    let (app, _registry, share) = create_test_app(TEST_UPLOAD_LIMIT);
    populate(share.path());

    assert_eq!(
        list(&app, "/api/list?sort=type").await,
        vec!["dirA", "A.txt", "b.txt"]
    );
}

#[tokio::test]
async fn test_list_parent_of_file_rejected() {
    let (app, _registry, share) = create_test_app(TEST_UPLOAD_LIMIT);
    populate(share.path());

    let response = get(&app, "/api/list?path=b.txt/..").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_message(response).await, "Invalid path");
}

#[cfg(unix)]
#[tokio::test]
async fn test_list_unreadable_directory_forbidden() {
    use std::os::unix::fs::PermissionsExt;

    let (app, _registry, share) = create_test_app(TEST_UPLOAD_LIMIT);
    let locked = share.path().join("locked");
    fs::create_dir(&locked).unwrap();
    fs::write(locked.join("inside.txt"), b"x").unwrap();
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

    // Permission bits do not bind a privileged user
    let enforced = fs::read_dir(&locked).is_err();
    let response = get(&app, "/api/list?path=locked").await;
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
    if !enforced {
        return;
    }

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(error_message(response).await, "Access denied");
}

#[tokio::test]
async fn test_list_without_root() {
    let (app, registry, _share) = create_test_app(TEST_UPLOAD_LIMIT);
    registry.clear();

    let response = get(&app, "/api/list").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_message(response).await, "No folder selected");
}

#[tokio::test]
async fn test_root_change_applies_to_next_request() {
    let (app, registry, share) = create_test_app(TEST_UPLOAD_LIMIT);
    populate(share.path());

    let other = TempDir::new().unwrap();
    fs::write(other.path().join("elsewhere.txt"), b"x").unwrap();
    registry.set_path(other.path()).unwrap();

    assert_eq!(list(&app, "/api/list").await, vec!["elsewhere.txt"]);
}

// =============================================================================
// Downloads
// =============================================================================

#[tokio::test]
async fn test_download_file() {
    let (app, _registry, share) = create_test_app(TEST_UPLOAD_LIMIT);
    fs::create_dir(share.path().join("docs")).unwrap();
    fs::write(share.path().join("docs/report final.pdf"), b"%PDF-1.7").unwrap();

    let response = get(&app, "/download/docs/report%20final.pdf").await;
    assert_eq!(response.status(), StatusCode::OK);

    let headers = response.headers();
    assert_eq!(headers[header::CONTENT_LENGTH], "8");
    let disposition = headers[header::CONTENT_DISPOSITION].to_str().unwrap();
    assert!(disposition.starts_with("attachment;"));
    assert!(disposition.contains("filename=\"report final.pdf\""));
    assert!(!disposition.contains("docs"));

    assert_eq!(body_bytes(response).await, b"%PDF-1.7");
}

#[tokio::test]
async fn test_download_directory_rejected() {
    let (app, _registry, share) = create_test_app(TEST_UPLOAD_LIMIT);
    populate(share.path());

    let response = get(&app, "/download/dirA").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_download_traversal_rejected() {
    let (app, _registry, share) = create_test_app(TEST_UPLOAD_LIMIT);
    let secret_dir = TempDir::new().unwrap();
    fs::write(secret_dir.path().join("secret.txt"), b"top secret").unwrap();

    let relative = format!(
        "{}/secret.txt",
        pathdiff(share.path(), secret_dir.path())
    );
    let encoded = relative.replace('/', "%2F");

    let response = get(&app, &format!("/download/{encoded}")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_message(response).await, "Invalid path");
}

#[cfg(unix)]
#[tokio::test]
async fn test_download_through_escaping_symlink_rejected() {
    let (app, _registry, share) = create_test_app(TEST_UPLOAD_LIMIT);
    let outside = TempDir::new().unwrap();
    fs::write(outside.path().join("secret.txt"), b"top secret").unwrap();
    std::os::unix::fs::symlink(outside.path(), share.path().join("link")).unwrap();

    let response = get(&app, "/download/link/secret.txt").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

/// `../` steps leading from `from` to `to` (both absolute temp dirs).
fn pathdiff(from: &Path, to: &Path) -> String {
    let from = from.canonicalize().unwrap();
    let to = to.canonicalize().unwrap();
    let ups = from.components().count() - 1;
    let mut relative = "../".repeat(ups);
    let to = to.to_string_lossy();
    relative.push_str(to.trim_start_matches('/'));
    relative
}

// =============================================================================
// Uploads
// =============================================================================

#[tokio::test]
async fn test_upload_then_download_round_trip() {
    let (app, _registry, share) = create_test_app(TEST_UPLOAD_LIMIT);
    let content: Vec<u8> = (0..=255u8).cycle().take(200_000).collect();

    let response = upload(
        &app,
        "/upload",
        &[path_part("d"), file_part("blob.bin", &content)],
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, b"OK");
    assert!(share.path().join("d/blob.bin").is_file());

    let response = get(&app, "/download/d/blob.bin").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, content);
}

#[tokio::test]
async fn test_upload_sanitizes_file_name() {
    let (app, _registry, share) = create_test_app(TEST_UPLOAD_LIMIT);

    let response = upload(
        &app,
        "/upload",
        &[path_part("x/y"), file_part("../evil.txt", b"payload")],
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    assert_eq!(
        fs::read(share.path().join("x/y/evil.txt")).unwrap(),
        b"payload"
    );
    assert!(!share.path().join("x/evil.txt").exists());
    assert!(!share.path().join("evil.txt").exists());
}

#[tokio::test]
async fn test_upload_destination_from_query() {
    let (app, _registry, share) = create_test_app(TEST_UPLOAD_LIMIT);

    let response = upload(&app, "/upload?path=inbox", &[file_part("note.txt", b"hi")]).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(share.path().join("inbox/note.txt").is_file());
}

#[tokio::test]
async fn test_upload_destination_field_after_file() {
    let (app, _registry, share) = create_test_app(TEST_UPLOAD_LIMIT);

    let response = upload(
        &app,
        "/upload",
        &[file_part("a.txt", b"data"), path_part("x/y")],
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    assert_eq!(fs::read(share.path().join("x/y/a.txt")).unwrap(), b"data");
    assert!(!share.path().join("a.txt").exists());
    assert!(leftover_partials(share.path()).is_empty());
}

#[tokio::test]
async fn test_upload_destination_field_overrides_query() {
    let (app, _registry, share) = create_test_app(TEST_UPLOAD_LIMIT);

    let response = upload(
        &app,
        "/upload?path=inbox",
        &[file_part("a.txt", b"data"), path_part("outbox")],
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(share.path().join("outbox/a.txt").is_file());
    assert!(!share.path().join("inbox").exists());
}

#[tokio::test]
async fn test_upload_late_traversal_destination_leaves_nothing() {
    let (app, _registry, share) = create_test_app(TEST_UPLOAD_LIMIT);

    let response = upload(
        &app,
        "/upload",
        &[file_part("evil.txt", b"x"), path_part("../lanshare-late-escape")],
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_message(response).await, "Invalid path");
    assert!(!share.path().join("evil.txt").exists());
    assert!(leftover_partials(share.path()).is_empty());
}

#[tokio::test]
async fn test_upload_overwrites_existing_file() {
    let (app, _registry, share) = create_test_app(TEST_UPLOAD_LIMIT);
    fs::write(share.path().join("note.txt"), b"old").unwrap();

    let response = upload(&app, "/upload", &[file_part("note.txt", b"new")]).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(fs::read(share.path().join("note.txt")).unwrap(), b"new");
}

#[tokio::test]
async fn test_upload_missing_file() {
    let (app, _registry, _share) = create_test_app(TEST_UPLOAD_LIMIT);

    let response = upload(&app, "/upload", &[path_part("x")]).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_message(response).await, "Missing file");
}

#[tokio::test]
async fn test_upload_empty_file_name() {
    let (app, _registry, _share) = create_test_app(TEST_UPLOAD_LIMIT);

    let response = upload(&app, "/upload", &[file_part("", b"data")]).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_message(response).await, "No selected file");
}

#[tokio::test]
async fn test_upload_traversal_destination_rejected() {
    let (app, _registry, share) = create_test_app(TEST_UPLOAD_LIMIT);
    let parent = share.path().parent().unwrap().to_path_buf();

    let response = upload(
        &app,
        "/upload",
        &[path_part("../lanshare-escape"), file_part("evil.txt", b"x")],
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_message(response).await, "Invalid path");
    assert!(!parent.join("lanshare-escape").exists());
}

#[tokio::test]
async fn test_upload_without_root() {
    let (app, registry, _share) = create_test_app(TEST_UPLOAD_LIMIT);
    registry.clear();

    let response = upload(&app, "/upload", &[file_part("a.txt", b"x")]).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_message(response).await, "No folder selected");
}

#[tokio::test]
async fn test_upload_too_large_leaves_nothing() {
    let (app, _registry, share) = create_test_app(16);

    let response = upload(
        &app,
        "/upload",
        &[file_part("big.bin", &[7u8; 64])],
    )
    .await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert!(!share.path().join("big.bin").exists());
    assert!(leftover_partials(share.path()).is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn test_upload_into_read_only_directory_is_server_error() {
    use std::os::unix::fs::PermissionsExt;

    let (app, _registry, share) = create_test_app(TEST_UPLOAD_LIMIT);
    let locked = share.path().join("locked");
    fs::create_dir(&locked).unwrap();
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o555)).unwrap();

    // Permission bits do not bind a privileged user
    let enforced = fs::write(locked.join("check"), b"").is_err();
    let response = upload(
        &app,
        "/upload",
        &[path_part("locked"), file_part("a.txt", b"data")],
    )
    .await;
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
    if !enforced {
        return;
    }

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(error_message(response).await, "Internal server error");
    assert!(fs::read_dir(&locked).unwrap().next().is_none());
    assert!(leftover_partials(share.path()).is_empty());
}

#[tokio::test]
async fn test_upload_temp_file_hidden_from_listing() {
    let (app, _registry, share) = create_test_app(TEST_UPLOAD_LIMIT);
    fs::write(share.path().join(".movie.mp4.18c2f1a0b3d4e5f6deadbeef.part"), b"half").unwrap();
    fs::write(share.path().join("done.txt"), b"x").unwrap();

    assert_eq!(list(&app, "/api/list").await, vec!["done.txt"]);
}

// =============================================================================
// QR code
// =============================================================================

#[tokio::test]
async fn test_qr_missing_without_url() {
    let (app, _registry, _share) = create_test_app(TEST_UPLOAD_LIMIT);

    let response = get(&app, "/qr.png").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_qr_served_when_rendered() {
    let share = TempDir::new().unwrap();
    let registry = Arc::new(RootRegistry::with_root(Root::new(share.path()).unwrap()));
    let png = daemon::ui::generate_png_qr_bytes("http://192.168.1.20:3000/").unwrap();
    let state = AppState::new(registry, DirectoryBrowser::new(), FileTransfer::new(1024))
        .with_qr_png(png.clone());
    let app = build_router(state);

    let response = get(&app, "/qr.png").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
    assert_eq!(body_bytes(response).await, png);
}
