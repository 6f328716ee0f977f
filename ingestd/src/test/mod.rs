//! End-to-end tests through the full router.

use std::path::Path;

use axum::http::StatusCode;
use axum_test::multipart::{MultipartForm, Part};
use futures::future::join_all;

use crate::api::models::uploads::UploadResponse;
use crate::config::UploadPolicy;
use crate::test_utils::create_test_app;

fn image(name: &str, mime: &str, bytes: &'static [u8]) -> Part {
    Part::bytes(bytes).file_name(name.to_string()).mime_type(mime.to_string())
}

fn listing(dir: &Path) -> Vec<String> {
    if !dir.exists() {
        return Vec::new();
    }
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[test_log::test(tokio::test)]
async fn test_upload_image_and_fetch_it_back() {
    let temp_dir = tempfile::tempdir().unwrap();
    let server = create_test_app(temp_dir.path(), |_| {});
    let payload: &'static [u8] = b"\xFF\xD8\xFF\xE0 jpeg body";

    let response = server
        .post("/api/v1/uploads")
        .multipart(MultipartForm::new().add_part("photo", image("photo.JPG", "image/jpeg", payload)))
        .await;

    assert_eq!(response.status_code(), StatusCode::CREATED, "{}", response.text());
    let body: UploadResponse = response.json();
    assert_eq!(body.files.len(), 1);
    assert_eq!(body.files[0].status, "stored");
    assert_eq!(body.files[0].original_name.as_deref(), Some("photo.JPG"));

    let file = body.files[0].file.as_ref().unwrap();
    assert!(file.name.ends_with(".JPG"));
    assert_eq!(file.extension.as_deref(), Some("JPG"));
    assert_eq!(file.size, payload.len() as u64);
    assert_eq!(listing(&temp_dir.path().join("uploads")), vec![file.name.clone()]);

    let url = body.files[0].url.as_ref().unwrap();
    assert_eq!(url, &format!("/uploads/{}", file.name));

    let fetched = server.get(url).await;
    fetched.assert_status_ok();
    assert_eq!(fetched.as_bytes().as_ref(), payload);
}

#[test_log::test(tokio::test)]
async fn test_non_image_is_rejected_and_nothing_written() {
    let temp_dir = tempfile::tempdir().unwrap();
    let server = create_test_app(temp_dir.path(), |_| {});

    let response = server
        .post("/api/v1/uploads")
        .multipart(MultipartForm::new().add_part("file", image("malware.exe", "application/octet-stream", b"MZ\x90\x00")))
        .await;

    response.assert_status(StatusCode::UNSUPPORTED_MEDIA_TYPE);
    let body: UploadResponse = response.json();
    assert_eq!(body.files[0].status, "rejected");
    assert!(body.files[0].file.is_none());
    assert!(listing(&temp_dir.path().join("uploads")).is_empty());
}

#[test_log::test(tokio::test)]
async fn test_mixed_upload_is_multi_status() {
    let temp_dir = tempfile::tempdir().unwrap();
    let server = create_test_app(temp_dir.path(), |_| {});

    let form = MultipartForm::new()
        .add_text("album", "holiday")
        .add_part("photos", image("beach.png", "image/png", b"png-1"))
        .add_part("photos", image("notes.txt", "text/plain", b"not an image"))
        .add_part("photos", image("sunset.gif", "image/gif", b"gif-1"));

    let response = server.post("/api/v1/uploads").multipart(form).await;

    response.assert_status(StatusCode::MULTI_STATUS);
    let body: UploadResponse = response.json();
    let statuses: Vec<&str> = body.files.iter().map(|f| f.status.as_str()).collect();
    assert_eq!(statuses, vec!["stored", "rejected", "stored"]);
    assert_eq!(body.fields.get("album").map(String::as_str), Some("holiday"));
    assert_eq!(listing(&temp_dir.path().join("uploads")).len(), 2);
}

#[test_log::test(tokio::test)]
async fn test_all_or_nothing_discards_stored_files() {
    let temp_dir = tempfile::tempdir().unwrap();
    let server = create_test_app(temp_dir.path(), |c| c.uploads.policy = UploadPolicy::AllOrNothing);

    let form = MultipartForm::new()
        .add_part("photos", image("a.png", "image/png", b"png-a"))
        .add_part("photos", image("b.pdf", "application/pdf", b"%PDF"));

    let response = server.post("/api/v1/uploads").multipart(form).await;

    response.assert_status(StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert!(listing(&temp_dir.path().join("uploads")).is_empty());
}

#[test_log::test(tokio::test)]
async fn test_oversized_file_is_rejected() {
    let temp_dir = tempfile::tempdir().unwrap();
    let server = create_test_app(temp_dir.path(), |c| c.limits.files.max_file_size = 16);

    let response = server
        .post("/api/v1/uploads")
        .multipart(MultipartForm::new().add_part("photo", image("big.png", "image/png", &[0u8; 1024])))
        .await;

    response.assert_status(StatusCode::PAYLOAD_TOO_LARGE);
    // directory was bootstrapped for the write, but holds no partial file
    assert!(listing(&temp_dir.path().join("uploads")).is_empty());
}

#[test_log::test(tokio::test)]
async fn test_request_without_files() {
    let temp_dir = tempfile::tempdir().unwrap();
    let server = create_test_app(temp_dir.path(), |_| {});

    let response = server
        .post("/api/v1/uploads")
        .multipart(MultipartForm::new().add_text("caption", "no attachment"))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    assert!(!temp_dir.path().join("uploads").exists());
}

#[test_log::test(tokio::test)]
async fn test_non_multipart_request() {
    let temp_dir = tempfile::tempdir().unwrap();
    let server = create_test_app(temp_dir.path(), |_| {});

    let response = server.post("/api/v1/uploads").text("just text").await;
    response.assert_status(StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[test_log::test(tokio::test)]
async fn test_too_many_files() {
    let temp_dir = tempfile::tempdir().unwrap();
    let server = create_test_app(temp_dir.path(), |c| c.limits.files.max_files_per_request = 1);

    let form = MultipartForm::new()
        .add_part("a", image("a.png", "image/png", b"a"))
        .add_part("b", image("b.png", "image/png", b"b"));

    let response = server.post("/api/v1/uploads").multipart(form).await;
    response.assert_status(StatusCode::BAD_REQUEST);
    assert!(listing(&temp_dir.path().join("uploads")).is_empty());
}

#[test_log::test(tokio::test)]
async fn test_concurrent_uploads_into_fresh_directory() {
    let temp_dir = tempfile::tempdir().unwrap();
    let server = create_test_app(temp_dir.path(), |_| {});

    let requests = (0..16).map(|_| {
        server
            .post("/api/v1/uploads")
            .multipart(MultipartForm::new().add_part("photo", image("same-name.png", "image/png", b"png")))
            .into_future()
    });
    let responses = join_all(requests).await;

    for response in &responses {
        response.assert_status(StatusCode::CREATED);
    }
    assert_eq!(listing(&temp_dir.path().join("uploads")).len(), 16);
}

#[test_log::test(tokio::test)]
async fn test_partial_files_are_never_served() {
    let temp_dir = tempfile::tempdir().unwrap();
    let server = create_test_app(temp_dir.path(), |_| {});

    let uploads = temp_dir.path().join("uploads");
    std::fs::create_dir_all(&uploads).unwrap();
    std::fs::write(uploads.join(".123-456.png.part"), b"half").unwrap();
    std::fs::write(uploads.join("123-456.png"), b"whole").unwrap();

    server.get("/uploads/.123-456.png.part").await.assert_status(StatusCode::NOT_FOUND);
    server.get("/uploads/123-456.png").await.assert_status_ok();
    server.get("/uploads/missing.png").await.assert_status(StatusCode::NOT_FOUND);
}

#[test_log::test(tokio::test)]
async fn test_healthz() {
    let temp_dir = tempfile::tempdir().unwrap();
    let server = create_test_app(temp_dir.path(), |_| {});

    let response = server.get("/healthz").await;
    response.assert_status_ok();
    response.assert_text("OK");
}

#[test_log::test(tokio::test)]
async fn test_metrics_disabled() {
    let temp_dir = tempfile::tempdir().unwrap();
    let server = create_test_app(temp_dir.path(), |c| c.enable_metrics = false);

    server.get("/internal/metrics").await.assert_status(StatusCode::NOT_FOUND);
}

#[test_log::test(tokio::test)]
async fn test_metrics_enabled() {
    let temp_dir = tempfile::tempdir().unwrap();
    let server = create_test_app(temp_dir.path(), |c| c.enable_metrics = true);

    server
        .post("/api/v1/uploads")
        .multipart(MultipartForm::new().add_part("photo", image("a.png", "image/png", b"png")))
        .await
        .assert_status(StatusCode::CREATED);

    let metrics_response = server.get("/internal/metrics").await;
    assert_eq!(metrics_response.status_code().as_u16(), 200);

    let metrics_content = metrics_response.text();
    assert!(metrics_content.contains("# TYPE"));
    assert!(metrics_content.contains("ingestd_files_total"));
}
