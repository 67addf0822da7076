use std::{any::Any, panic::AssertUnwindSafe, time::Instant};

use axum::{
    body::Body,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use futures::FutureExt;
use tracing::{Instrument, error, info_span, warn};

use crate::{application::error::ErrorReport, domain::conversion::RequestId};

/// Per-request context handed to every stage as a value.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: RequestId,
}

pub async fn set_request_context(mut request: Request<Body>, next: Next) -> Response {
    let ctx = RequestContext {
        request_id: RequestId::new(),
    };
    request.extensions_mut().insert(ctx.clone());

    let span = info_span!("request", request_id = %ctx.request_id);
    let mut response = next.run(request).instrument(span).await;
    response.extensions_mut().insert(ctx);
    response
}

/// Last line of defence: a panicking handler becomes a bodiless 500.
pub async fn catch_panics(request: Request<Body>, next: Next) -> Response {
    match AssertUnwindSafe(next.run(request)).catch_unwind().await {
        Ok(response) => response,
        Err(payload) => {
            let mut response = StatusCode::INTERNAL_SERVER_ERROR.into_response();
            ErrorReport::from_message(
                "infra::http::middleware::catch_panics",
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("request handler panicked: {}", panic_message(payload.as_ref())),
            )
            .attach(&mut response);
            response
        }
    }
}

pub async fn log_responses(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let request_id = request
        .extensions()
        .get::<RequestContext>()
        .map(|ctx| ctx.request_id.to_string())
        .unwrap_or_default();

    let mut response = next.run(request).await;
    let status = response.status();

    if status.is_client_error() || status.is_server_error() {
        let elapsed_ms = start.elapsed().as_millis();
        let report = response.extensions_mut().remove::<ErrorReport>();
        let (source, messages) = match report {
            Some(report) => (report.source, report.messages),
            None => ("unknown", Vec::new()),
        };
        let detail = messages
            .first()
            .cloned()
            .unwrap_or_else(|| "no diagnostic available".to_string());

        if status.is_server_error() {
            error!(
                target = "html_pdf_export::http::response",
                status = status.as_u16(),
                method = %method,
                path = %uri.path(),
                elapsed_ms = elapsed_ms,
                source = source,
                detail = %detail,
                chain = ?messages,
                request_id = request_id,
                "request failed",
            );
        } else {
            warn!(
                target = "html_pdf_export::http::response",
                status = status.as_u16(),
                method = %method,
                path = %uri.path(),
                elapsed_ms = elapsed_ms,
                source = source,
                detail = %detail,
                chain = ?messages,
                request_id = request_id,
                "client request error",
            );
        }
    }

    response
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}
