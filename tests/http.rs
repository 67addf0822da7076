#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{
        Method, Request, StatusCode,
        header::{CONTENT_LENGTH, CONTENT_TYPE},
    },
    response::Response,
};
use html_pdf_export::{
    application::render::{PdfRenderer, WkhtmltopdfRenderer},
    domain::conversion::{ConversionOutcome, ConversionRequest},
    infra::{
        artifacts::ArtifactStore,
        http::{HttpState, build_router},
    },
};
use tempfile::TempDir;
use tower::ServiceExt;

const TIMEOUT: Duration = Duration::from_secs(10);
const SAMPLE_HTML: &str = "<html><body><h1>Invoice</h1></body></html>";

struct Harness {
    _scripts: TempDir,
    artifacts: TempDir,
    router: Router,
}

impl Harness {
    fn with_script(script: &str) -> Self {
        Self::with_script_and_timeout(script, TIMEOUT)
    }

    fn with_script_and_timeout(script: &str, timeout: Duration) -> Self {
        let scripts = TempDir::new().expect("scripts dir");
        let binary = write_script(scripts.path(), script);
        Self::with_renderer(scripts, Arc::new(WkhtmltopdfRenderer::new(binary)), timeout)
    }

    fn with_renderer(scripts: TempDir, renderer: Arc<dyn PdfRenderer>, timeout: Duration) -> Self {
        let artifacts = TempDir::new().expect("artifacts dir");
        let state = HttpState::new(
            ArtifactStore::new(artifacts.path().to_path_buf()),
            renderer,
            timeout,
        );
        Self {
            _scripts: scripts,
            artifacts,
            router: build_router(state),
        }
    }

    async fn send(&self, request: Request<Body>) -> Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router should respond")
    }

    fn leftover_artifacts(&self) -> Vec<PathBuf> {
        std::fs::read_dir(self.artifacts.path())
            .expect("read artifacts dir")
            .map(|entry| entry.expect("dir entry").path())
            .collect()
    }
}

/// A stand-in renderer that copies the submitted html into the pdf slot.
const COPY_INPUT: &str = r#"cp "$6" "$7""#;

fn write_script(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("fake-wkhtmltopdf");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
    let mut permissions = std::fs::metadata(&path)
        .expect("script metadata")
        .permissions();
    permissions.set_mode(0o755);
    std::fs::set_permissions(&path, permissions).expect("chmod script");
    path
}

fn html_post(body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/")
        .header(CONTENT_TYPE, "text/html")
        .body(body.into())
        .expect("request should build")
}

async fn body_bytes(response: Response) -> Vec<u8> {
    to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body should collect")
        .to_vec()
}

#[tokio::test]
async fn converts_html_and_streams_pdf_back() {
    let harness = Harness::with_script(COPY_INPUT);

    let response = harness.send(html_post(SAMPLE_HTML)).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(CONTENT_TYPE).expect("content-type"),
        "application/pdf"
    );
    assert_eq!(
        response.headers().get(CONTENT_LENGTH).expect("content-length"),
        SAMPLE_HTML.len().to_string().as_str()
    );
    assert_eq!(body_bytes(response).await, SAMPLE_HTML.as_bytes());
    assert!(harness.leftover_artifacts().is_empty());
}

#[tokio::test]
async fn any_path_reaches_the_converter() {
    let harness = Harness::with_script(COPY_INPUT);
    let request = Request::builder()
        .method(Method::POST)
        .uri("/some/nested/path?with=query")
        .header(CONTENT_TYPE, "text/html")
        .body(Body::from(SAMPLE_HTML))
        .expect("request should build");

    let response = harness.send(request).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, SAMPLE_HTML.as_bytes());
}

#[tokio::test]
async fn non_post_methods_are_rejected_without_artifacts() {
    let harness = Harness::with_script(COPY_INPUT);

    for method in [Method::GET, Method::PUT, Method::DELETE, Method::HEAD] {
        let request = Request::builder()
            .method(method.clone())
            .uri("/")
            .header(CONTENT_TYPE, "text/html")
            .body(Body::from(SAMPLE_HTML))
            .expect("request should build");
        let response = harness.send(request).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED, "{method}");
        assert!(body_bytes(response).await.is_empty());
    }

    assert!(harness.leftover_artifacts().is_empty());
}

#[tokio::test]
async fn malformed_requests_are_bad_requests() {
    let harness = Harness::with_script(COPY_INPUT);

    let missing_body = html_post(Body::empty());
    let missing_content_type = Request::builder()
        .method(Method::POST)
        .uri("/")
        .body(Body::from(SAMPLE_HTML))
        .expect("request should build");
    let wrong_content_type = Request::builder()
        .method(Method::POST)
        .uri("/")
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from("{}"))
        .expect("request should build");
    let parameterised_content_type = Request::builder()
        .method(Method::POST)
        .uri("/")
        .header(CONTENT_TYPE, "text/html; charset=utf-8")
        .body(Body::from(SAMPLE_HTML))
        .expect("request should build");

    for request in [
        missing_body,
        missing_content_type,
        wrong_content_type,
        parameterised_content_type,
    ] {
        let response = harness.send(request).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_bytes(response).await.is_empty());
    }

    assert!(harness.leftover_artifacts().is_empty());
}

#[tokio::test]
async fn diagnostics_fail_the_request_even_when_the_exit_is_clean() {
    let harness = Harness::with_script(
        r#"cp "$6" "$7"
echo "Warning: Failed to load font" >&2
exit 0"#,
    );

    let response = harness.send(html_post(SAMPLE_HTML)).await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body_bytes(response).await.is_empty());
    assert!(harness.leftover_artifacts().is_empty());
}

#[tokio::test]
async fn failing_renderer_yields_empty_500() {
    let harness = Harness::with_script("exit 1");

    let response = harness.send(html_post(SAMPLE_HTML)).await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body_bytes(response).await.is_empty());
    assert!(harness.leftover_artifacts().is_empty());
}

#[tokio::test]
async fn renderer_that_writes_nothing_yields_500() {
    let harness = Harness::with_script(r#": > "$7""#);

    let response = harness.send(html_post(SAMPLE_HTML)).await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(harness.leftover_artifacts().is_empty());
}

#[tokio::test]
async fn missing_renderer_binary_yields_500() {
    let scripts = TempDir::new().expect("scripts dir");
    let binary = scripts.path().join("not-installed");
    let harness = Harness::with_renderer(
        scripts,
        Arc::new(WkhtmltopdfRenderer::new(binary)),
        TIMEOUT,
    );

    let response = harness.send(html_post(SAMPLE_HTML)).await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(harness.leftover_artifacts().is_empty());
}

#[tokio::test]
async fn hung_renderer_is_killed_at_the_deadline() {
    let harness = Harness::with_script_and_timeout("exec sleep 30", Duration::from_millis(300));

    let started = Instant::now();
    let response = harness.send(html_post(SAMPLE_HTML)).await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(harness.leftover_artifacts().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_keep_their_own_documents() {
    let harness = Arc::new(Harness::with_script(COPY_INPUT));

    let handles: Vec<_> = (0..8)
        .map(|n| {
            let harness = Arc::clone(&harness);
            tokio::spawn(async move {
                let html = format!("<html><body><p>document {n}</p></body></html>");
                let response = harness.send(html_post(html.clone())).await;
                assert_eq!(response.status(), StatusCode::OK);
                (html, body_bytes(response).await)
            })
        })
        .collect();

    for handle in handles {
        let (html, pdf) = handle.await.expect("task should join");
        assert_eq!(pdf, html.as_bytes());
    }

    assert!(harness.leftover_artifacts().is_empty());
}

struct PanickingRenderer;

#[async_trait]
impl PdfRenderer for PanickingRenderer {
    async fn convert(&self, request: &ConversionRequest, _timeout: Duration) -> ConversionOutcome {
        assert!(request.input_path().exists(), "input written before render");
        panic!("renderer blew up");
    }
}

#[tokio::test]
async fn panics_become_empty_500s_and_still_clean_up() {
    let scripts = TempDir::new().expect("scripts dir");
    let harness = Harness::with_renderer(scripts, Arc::new(PanickingRenderer), TIMEOUT);

    let response = harness.send(html_post(SAMPLE_HTML)).await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body_bytes(response).await.is_empty());
    assert!(harness.leftover_artifacts().is_empty());
}

#[tokio::test]
async fn abandoned_response_still_removes_artifacts() {
    let harness = Harness::with_script(COPY_INPUT);

    let response = harness.send(html_post(SAMPLE_HTML)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(harness.leftover_artifacts().len(), 2);

    drop(response);

    assert!(harness.leftover_artifacts().is_empty());
}
