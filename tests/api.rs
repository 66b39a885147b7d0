use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use pixvault::config::Config;
use pixvault::db::Database;
use pixvault::storage::ChunkedStore;
use pixvault::{create_router, AppState};

const BOUNDARY: &str = "pixvault-test-boundary";

async fn test_app_with(configure: impl FnOnce(&mut Config)) -> (Router, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();

    let mut config = Config::default();
    config.database.path = dir.path().join("test.db").display().to_string();
    config.storage.base_path = dir.path().join("blobs").display().to_string();
    config.jwt.secret = "integration-test-secret".to_string();
    configure(&mut config);

    let db = Database::new(&config.database.path).await.unwrap();
    db.run_migrations().await.unwrap();

    let store = ChunkedStore::open(&config.storage.base_path, config.storage.chunk_size)
        .await
        .unwrap();

    let state = AppState {
        db,
        config: Arc::new(config),
        store: Arc::new(store),
    };

    (create_router(state), dir)
}

async fn test_app() -> (Router, tempfile::TempDir) {
    test_app_with(|_| {}).await
}

async fn json_body(res: Response) -> Value {
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn raw_body(res: Response) -> Vec<u8> {
    res.into_body().collect().await.unwrap().to_bytes().to_vec()
}

async fn register_and_login(app: &Router, email: &str) -> String {
    let res = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/auth/register")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(format!(
                    "{{\"email\":\"{email}\",\"name\":\"Test\",\"password\":\"secret1\"}}"
                )))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);

    let res = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/auth/login")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(format!(
                    "{{\"email\":\"{email}\",\"password\":\"secret1\"}}"
                )))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let body = json_body(res).await;
    body["token"].as_str().unwrap().to_string()
}

fn multipart_body(field_name: &str, filename: &str, content_type: &str, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(
        format!("Content-Disposition: form-data; name=\"{field_name}\"; filename=\"{filename}\"\r\n")
            .as_bytes(),
    );
    body.extend_from_slice(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

async fn upload(
    app: &Router,
    token: &str,
    filename: &str,
    content_type: &str,
    data: &[u8],
) -> Response {
    app.clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/files/upload")
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .header(
                    header::CONTENT_TYPE,
                    format!("multipart/form-data; boundary={BOUNDARY}"),
                )
                .body(Body::from(multipart_body("file", filename, content_type, data)))
                .unwrap(),
        )
        .await
        .unwrap()
}

async fn get(app: &Router, token: &str, uri: &str) -> Response {
    app.clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri(uri)
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap()
}

async fn delete(app: &Router, token: &str, uri: &str) -> Response {
    app.clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(uri)
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn upload_and_download_roundtrip() {
    let (app, _dir) = test_app().await;
    let token = register_and_login(&app, "alice@example.com").await;

    // Spans several 256 KiB chunks
    let data: Vec<u8> = (0..700_000).map(|i| (i % 249) as u8).collect();

    let res = upload(&app, &token, "photo.png", "image/png", &data).await;
    assert_eq!(res.status(), StatusCode::CREATED);

    let body = json_body(res).await;
    assert_eq!(body["size"], 700_000);
    assert_eq!(body["originalname"], "photo.png");
    assert_eq!(body["contentType"], "image/png");
    let filename = body["filename"].as_str().unwrap();
    assert!(filename.ends_with(".png"));
    assert!(!filename.contains("photo"));
    assert!(body["uploadDate"].as_str().is_some());
    let id = body["id"].as_str().unwrap().to_string();

    let res = get(&app, &token, &format!("/api/files/{id}")).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(
        res.headers().get(header::CONTENT_TYPE).unwrap(),
        "image/png"
    );
    assert_eq!(res.headers().get(header::CONTENT_LENGTH).unwrap(), "700000");
    let disposition = res
        .headers()
        .get(header::CONTENT_DISPOSITION)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(disposition.starts_with("inline;"));
    assert!(disposition.contains("photo.png"));

    assert_eq!(raw_body(res).await, data);
}

#[tokio::test]
async fn upload_rejects_disallowed_type() {
    let (app, _dir) = test_app().await;
    let token = register_and_login(&app, "alice@example.com").await;

    let res = upload(&app, &token, "notes.txt", "text/plain", b"hello").await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let body = json_body(res).await;
    assert_eq!(body["message"], "Only image files are allowed");
}

#[tokio::test]
async fn upload_rejects_oversize_payload() {
    let (app, _dir) = test_app_with(|config| {
        config.storage.max_upload_size = 1024;
    })
    .await;
    let token = register_and_login(&app, "alice@example.com").await;

    let res = upload(&app, &token, "big.png", "image/png", &vec![0u8; 2048]).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    // A payload within the limit still goes through
    let res = upload(&app, &token, "ok.png", "image/png", &vec![0u8; 512]).await;
    assert_eq!(res.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn upload_requires_a_file_field() {
    let (app, _dir) = test_app().await;
    let token = register_and_login(&app, "alice@example.com").await;

    let res = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/files/upload")
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .header(
                    header::CONTENT_TYPE,
                    format!("multipart/form-data; boundary={BOUNDARY}"),
                )
                .body(Body::from(multipart_body(
                    "other",
                    "photo.png",
                    "image/png",
                    b"data",
                )))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body = json_body(res).await;
    assert_eq!(body["message"], "Please upload a file");
}

#[tokio::test]
async fn listing_paginates() {
    let (app, _dir) = test_app().await;
    let token = register_and_login(&app, "alice@example.com").await;

    for i in 0..5 {
        let res = upload(
            &app,
            &token,
            &format!("photo-{i}.png"),
            "image/png",
            &[i as u8; 32],
        )
        .await;
        assert_eq!(res.status(), StatusCode::CREATED);
    }

    let res = get(&app, &token, "/api/files?page=1&limit=2").await;
    assert_eq!(res.status(), StatusCode::OK);
    let body = json_body(res).await;
    assert_eq!(body["files"].as_array().unwrap().len(), 2);
    assert_eq!(body["pagination"]["totalFiles"], 5);
    assert_eq!(body["pagination"]["totalPages"], 3);
    assert_eq!(body["pagination"]["currentPage"], 1);
    assert_eq!(body["pagination"]["limit"], 2);

    // Past the last page: empty list, not an error
    let res = get(&app, &token, "/api/files?page=4&limit=2").await;
    assert_eq!(res.status(), StatusCode::OK);
    let body = json_body(res).await;
    assert_eq!(body["files"].as_array().unwrap().len(), 0);
    assert_eq!(body["pagination"]["totalFiles"], 5);

    // Defaults: page 1, limit 10
    let res = get(&app, &token, "/api/files").await;
    let body = json_body(res).await;
    assert_eq!(body["files"].as_array().unwrap().len(), 5);
    assert_eq!(body["pagination"]["limit"], 10);
    assert_eq!(body["pagination"]["currentPage"], 1);
}

#[tokio::test]
async fn owners_cannot_see_each_other() {
    let (app, _dir) = test_app().await;
    let alice = register_and_login(&app, "alice@example.com").await;
    let bob = register_and_login(&app, "bob@example.com").await;

    let res = upload(&app, &alice, "secret.png", "image/png", b"alice-only").await;
    assert_eq!(res.status(), StatusCode::CREATED);
    let id = json_body(res).await["id"].as_str().unwrap().to_string();

    // Bob gets a plain 404, indistinguishable from a nonexistent file
    let res = get(&app, &bob, &format!("/api/files/{id}")).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(res).await["message"], "File not found");

    let res = delete(&app, &bob, &format!("/api/files/{id}")).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = get(&app, &bob, "/api/files").await;
    assert_eq!(json_body(res).await["pagination"]["totalFiles"], 0);

    // Alice is untouched
    let res = get(&app, &alice, &format!("/api/files/{id}")).await;
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn delete_then_fetch_is_gone() {
    let (app, _dir) = test_app().await;
    let token = register_and_login(&app, "alice@example.com").await;

    let res = upload(&app, &token, "photo.png", "image/png", b"data").await;
    let id = json_body(res).await["id"].as_str().unwrap().to_string();

    let res = delete(&app, &token, &format!("/api/files/{id}")).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(json_body(res).await["message"], "File deleted successfully");

    // Second delete and fetch both report a plain miss
    let res = delete(&app, &token, &format!("/api/files/{id}")).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = get(&app, &token, &format!("/api/files/{id}")).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn file_routes_require_auth() {
    let (app, _dir) = test_app().await;

    let res = app
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/api/files")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = get(&app, "not-a-real-token", "/api/files").await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn profile_returns_current_user() {
    let (app, _dir) = test_app().await;
    let token = register_and_login(&app, "alice@example.com").await;

    let res = get(&app, &token, "/api/auth/profile").await;
    assert_eq!(res.status(), StatusCode::OK);
    let body = json_body(res).await;
    assert_eq!(body["email"], "alice@example.com");
    assert_eq!(body["name"], "Test");
}

#[tokio::test]
async fn duplicate_registration_conflicts() {
    let (app, _dir) = test_app().await;
    register_and_login(&app, "alice@example.com").await;

    let res = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/auth/register")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    "{\"email\":\"alice@example.com\",\"name\":\"Dup\",\"password\":\"secret1\"}",
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn public_view_is_off_by_default() {
    let (app, _dir) = test_app().await;
    let token = register_and_login(&app, "alice@example.com").await;

    let res = upload(&app, &token, "photo.png", "image/png", b"data").await;
    let id = json_body(res).await["id"].as_str().unwrap().to_string();

    // Route is not registered unless explicitly enabled
    let res = app
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri(format!("/api/public/files/{id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn public_view_works_when_enabled() {
    let (app, _dir) = test_app_with(|config| {
        config.storage.allow_public_view = true;
    })
    .await;
    let token = register_and_login(&app, "alice@example.com").await;

    let res = upload(&app, &token, "shared.png", "image/png", b"public-bytes").await;
    let id = json_body(res).await["id"].as_str().unwrap().to_string();

    // No Authorization header needed
    let res = app
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri(format!("/api/public/files/{id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(raw_body(res).await, b"public-bytes");

    let res = app
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/api/public/files/nonexistent")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}
