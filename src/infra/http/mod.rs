mod convert;
mod middleware;

pub use convert::{HTML_MEDIA_TYPE, PDF_MEDIA_TYPE, convert_document};
pub use middleware::RequestContext;

use std::{sync::Arc, time::Duration};

use axum::{Router, middleware as axum_middleware};

use crate::{application::render::PdfRenderer, infra::artifacts::ArtifactStore};

use middleware::{catch_panics, log_responses, set_request_context};

/// Shared handler state. Nothing in here is mutated per request.
#[derive(Clone)]
pub struct HttpState {
    pub artifacts: ArtifactStore,
    pub renderer: Arc<dyn PdfRenderer>,
    pub conversion_timeout: Duration,
}

impl HttpState {
    pub fn new(
        artifacts: ArtifactStore,
        renderer: Arc<dyn PdfRenderer>,
        conversion_timeout: Duration,
    ) -> Self {
        Self {
            artifacts,
            renderer,
            conversion_timeout,
        }
    }
}

/// Every path and method lands on the conversion handler, which decides the status.
pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .fallback(convert_document)
        .with_state(state)
        .layer(axum_middleware::from_fn(catch_panics))
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
}
