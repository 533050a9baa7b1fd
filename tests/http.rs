#![cfg(feature = "server")]
//! HTTP adapter tests, driven through the router with `oneshot`.

mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use common::*;
use scanscribe::http::create_router;
use scanscribe::JobId;
use serde_json::Value;
use std::time::Duration;
use tower::ServiceExt;

const BOUNDARY: &str = "scanscribe-test-boundary";

fn multipart_body(field: &str, filename: &str, bytes: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(
        format!("Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n")
            .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/pdf\r\n\r\n");
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn upload_request(field: &str, filename: &str, bytes: &[u8]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body(field, filename, bytes)))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn json(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn app(h: &Harness) -> Router {
    create_router(h.service.clone())
}

#[tokio::test]
async fn given_running_server_when_health_check_then_returns_ok() {
    let h = Harness::builder().build();

    let response = app(&h).oneshot(get("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json(response).await["status"], "ok");
}

#[tokio::test]
async fn given_form_without_file_field_when_upload_then_returns_bad_request() {
    let h = Harness::builder().build();

    let response = app(&h)
        .oneshot(upload_request("note", "a.pdf", &pdf(1)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json(response).await["error"], "No file uploaded");
    assert!(h.service.store().is_empty());
}

#[tokio::test]
async fn given_non_pdf_filename_when_upload_then_returns_bad_request() {
    let h = Harness::builder().build();

    let response = app(&h)
        .oneshot(upload_request("file", "notes.txt", b"plain text"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json(response).await["error"], "Only PDF files are accepted");
}

#[tokio::test]
async fn given_bytes_without_pdf_marker_when_upload_then_returns_bad_request() {
    let h = Harness::builder().build();

    let response = app(&h)
        .oneshot(upload_request("file", "notes.pdf", b"GIF89a"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(h.service.store().is_empty());
}

#[tokio::test]
async fn given_oversized_file_when_upload_then_returns_payload_too_large() {
    let h = Harness::builder().max_upload_bytes(64).build();
    let bytes = [pdf(1), vec![b' '; 128]].concat();

    let response = app(&h)
        .oneshot(upload_request("file", "big.pdf", &bytes))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert!(h.service.store().is_empty());
}

#[tokio::test]
async fn given_unknown_job_when_status_then_returns_not_found() {
    let h = Harness::builder().build();

    let response = app(&h)
        .oneshot(get(&format!("/status/{}", JobId::new())))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json(response).await["error"], "Job not found");
}

#[tokio::test]
async fn given_malformed_job_id_when_status_then_returns_not_found() {
    let h = Harness::builder().build();

    let response = app(&h).oneshot(get("/status/not-a-uuid")).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn given_unknown_job_when_cancel_then_returns_not_found() {
    let h = Harness::builder().build();

    let response = app(&h)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/cancel/{}", JobId::new()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn given_traversal_filename_when_download_then_returns_bad_request() {
    let h = Harness::builder().build();

    let response = app(&h)
        .oneshot(get("/download/..%2Fsecret.md"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn given_unknown_output_when_download_then_returns_not_found() {
    let h = Harness::builder().build();

    let response = app(&h).oneshot(get("/download/nothing.md")).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn given_valid_pdf_when_upload_then_job_completes_and_downloads() {
    let h = Harness::builder().build();
    let app = app(&h);

    let response = app
        .clone()
        .oneshot(upload_request("file", "notebook.pdf", &pdf(2)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let job_id = json(response).await["job_id"].as_str().unwrap().to_string();

    let status = loop {
        let response = app
            .clone()
            .oneshot(get(&format!("/status/{job_id}")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json(response).await;
        if body["status"] == "complete" || body["status"] == "error" {
            break body;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    };
    assert_eq!(status["status"], "complete");
    assert_eq!(status["progress"], 2);
    assert_eq!(status["total"], 2);
    assert!(status.get("error").is_none());

    let filename = status["output_filename"].as_str().unwrap().to_string();
    assert_eq!(filename, format!("{job_id}_notebook.md"));

    let response = app
        .oneshot(get(&format!("/download/{filename}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let disposition = response.headers()[header::CONTENT_DISPOSITION]
        .to_str()
        .unwrap()
        .to_string();
    assert!(disposition.starts_with("attachment"));
    assert!(disposition.contains(&filename));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.starts_with(&FakeTranscriber::text_for(1)));
    assert!(text.contains("<!-- page 2 -->"));
}

#[tokio::test]
async fn given_failing_page_when_status_then_reports_error_and_kind() {
    let h = Harness::builder()
        .transcriber(FakeTranscriber::failing_on(1))
        .build();
    let app = app(&h);

    let response = app
        .clone()
        .oneshot(upload_request("file", "notes.pdf", &pdf(1)))
        .await
        .unwrap();
    let job_id: JobId = json(response).await["job_id"]
        .as_str()
        .unwrap()
        .parse()
        .unwrap();
    wait_terminal(&h.service, job_id).await;

    let response = app
        .oneshot(get(&format!("/status/{job_id}")))
        .await
        .unwrap();
    let body = json(response).await;
    assert_eq!(body["status"], "error");
    assert_eq!(body["error_kind"], "transcription_failure");
    assert!(body["error"].as_str().unwrap().contains("page 1"));
    assert!(body.get("output_filename").is_none());
}
