//! Job service boundary: validation, queries, downloads and retention.

mod common;

use common::*;
use scanscribe::{ErrorKind, JobId, JobStatus, ScribeError, Upload};
use std::time::Duration;

#[tokio::test]
async fn unknown_job_is_not_found_without_side_effects() {
    let h = Harness::builder().build();
    let id = JobId::new();

    let err = h.service.query(id).unwrap_err();
    assert!(matches!(err, ScribeError::NotFound { .. }));
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = h.service.cancel(id).unwrap_err();
    assert!(matches!(err, ScribeError::NotFound { .. }));
    assert!(h.service.store().is_empty());
}

#[tokio::test]
async fn invalid_uploads_create_no_job() {
    let h = Harness::builder().max_upload_bytes(64).build();
    let cases = [
        Upload::new("", pdf(1)),
        Upload::new("notes.docx", pdf(1)),
        Upload::new("notes.pdf", Vec::new()),
        Upload::new("notes.pdf", b"GIF89a not a pdf".to_vec()),
        Upload::new("big.pdf", [pdf(1), vec![b' '; 100]].concat()),
    ];

    for upload in cases {
        let name = upload.filename.clone();
        let err = h.service.submit(upload).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput, "{name:?}: {err}");
    }
    assert!(h.service.store().is_empty());
    assert!(Harness::files_in(&h.upload_dir()).is_empty());
}

#[tokio::test]
async fn oversized_upload_reports_both_sizes() {
    let h = Harness::builder().max_upload_bytes(16).build();
    let err = h
        .service
        .submit(Upload::new("big.pdf", [pdf(1), vec![b' '; 32]].concat()))
        .await
        .unwrap_err();
    assert!(matches!(err, ScribeError::TooLarge { limit: 16, .. }));
    assert!(err.to_string().contains("limit is 16 bytes"));
}

#[tokio::test]
async fn submit_returns_before_the_pipeline_finishes() {
    let h = Harness::builder()
        .transcriber(FakeTranscriber::slow(Duration::from_millis(200)))
        .build();
    let id = h
        .service
        .submit(Upload::new("a.pdf", pdf(2)))
        .await
        .unwrap();

    let job = h.service.query(id).unwrap();
    assert!(!job.is_terminal());
    assert_eq!(job.original_filename, "a.pdf");
    assert_eq!(wait_terminal(&h.service, id).await.status, JobStatus::Complete);
}

#[tokio::test]
async fn submit_path_copies_and_keeps_the_callers_file() {
    let h = Harness::builder().build();
    let src = h.dir.path().join("mine.pdf");
    std::fs::write(&src, pdf(1)).unwrap();
    let out = h.dir.path().join("result/mine.md");

    let id = h.service.submit_path(&src, Some(out.clone())).await.unwrap();
    let job = wait_terminal(&h.service, id).await;

    assert_eq!(job.status, JobStatus::Complete);
    assert_eq!(job.output_path.as_deref(), Some(out.as_path()));
    assert!(out.is_file());
    assert!(src.exists(), "the caller's file must survive");
}

#[tokio::test]
async fn submit_path_of_missing_file_is_invalid_input() {
    let h = Harness::builder().build();
    let err = h
        .service
        .submit_path(&h.dir.path().join("nope.pdf"), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}

#[tokio::test]
async fn download_resolves_only_completed_outputs() {
    let h = Harness::builder().build();
    let id = h
        .service
        .submit(Upload::new("notes.pdf", pdf(1)))
        .await
        .unwrap();
    let job = wait_terminal(&h.service, id).await;
    let filename = job.output_filename.unwrap();

    let path = h.service.resolve_download(&filename).unwrap();
    assert_eq!(Some(path), job.output_path);

    let missing = h.service.resolve_download("nobody_notes.md").unwrap_err();
    assert!(matches!(missing, ScribeError::NotFound { .. }));
}

#[tokio::test]
async fn download_rejects_traversal_and_foreign_types() {
    let h = Harness::builder().build();
    for name in ["", "../secret.md", "a/b.md", "..\\b.md", "a..md"] {
        let err = h.service.resolve_download(name).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput, "{name:?}");
    }
    let err = h.service.resolve_download("notes.exe").unwrap_err();
    assert_eq!(err.to_string(), "InvalidInput: Invalid file type");
}

#[tokio::test]
async fn failed_jobs_have_nothing_to_download() {
    let h = Harness::builder()
        .transcriber(FakeTranscriber::failing_on(1))
        .build();
    let id = h
        .service
        .submit(Upload::new("notes.pdf", pdf(1)))
        .await
        .unwrap();
    wait_terminal(&h.service, id).await;

    let guess = format!("{id}_notes.md");
    let err = h.service.resolve_download(&guess).unwrap_err();
    assert!(matches!(err, ScribeError::NotFound { .. }));
}

#[tokio::test]
async fn sweep_keeps_fresh_jobs() {
    let h = Harness::builder().build();
    let id = h
        .service
        .submit(Upload::new("notes.pdf", pdf(1)))
        .await
        .unwrap();
    wait_terminal(&h.service, id).await;

    assert_eq!(h.service.sweep().await, 0);
    assert!(h.service.query(id).is_ok());
}

#[tokio::test]
async fn sweep_evicts_expired_jobs_and_their_outputs() {
    let h = Harness::builder().build();
    let id = h
        .service
        .submit(Upload::new("notes.pdf", pdf(1)))
        .await
        .unwrap();
    let job = wait_terminal(&h.service, id).await;
    let output = job.output_path.unwrap();
    assert!(output.is_file());

    // Age the record past the 24 h retention window.
    h.service.store().update(id, |j| {
        j.updated_at = chrono::Utc::now() - chrono::Duration::hours(25);
        Ok(())
    })
    .unwrap();

    assert_eq!(h.service.sweep().await, 1);
    assert!(h.service.query(id).is_err());
    assert!(!output.exists());
}
