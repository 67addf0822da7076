//! The single conversion endpoint: HTML in, PDF out.

use axum::{
    body::{Body, HttpBody},
    extract::State,
    http::{
        HeaderValue, Method, Request, StatusCode,
        header::{CONTENT_LENGTH, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use tracing::info;

use crate::{application::error::HttpError, domain::conversion::RequestId};

use super::{HttpState, middleware::RequestContext};

const SOURCE: &str = "infra::http::convert::convert_document";

/// The only media type accepted for submitted documents.
pub const HTML_MEDIA_TYPE: &str = "text/html";

/// Media type of a successful response body.
pub const PDF_MEDIA_TYPE: &str = "application/pdf";

pub async fn convert_document(
    State(state): State<HttpState>,
    request: Request<Body>,
) -> Result<Response, HttpError> {
    validate(&request)?;

    let request_id = request
        .extensions()
        .get::<RequestContext>()
        .map(|ctx| ctx.request_id)
        .unwrap_or_else(RequestId::new);
    let conversion = state.artifacts.request(request_id);

    // Dropping the guard removes both artifacts, so every early return below
    // cleans up after itself.
    let cleanup = state.artifacts.cleanup_guard(&conversion);

    info!(
        target = SOURCE,
        request_id = %request_id,
        input = %conversion.input_path().display(),
        "Writing request body to file"
    );
    state
        .artifacts
        .write_input(&conversion, request.into_body().into_data_stream())
        .await
        .map_err(|err| HttpError::from_error(SOURCE, StatusCode::INTERNAL_SERVER_ERROR, &err))?;

    let pdf = state
        .renderer
        .convert(&conversion, state.conversion_timeout)
        .await
        .map_err(|err| HttpError::from_error(SOURCE, StatusCode::INTERNAL_SERVER_ERROR, &err))?;

    let chunks = state
        .artifacts
        .open_for_streaming(&pdf.path)
        .await
        .map_err(|err| HttpError::from_error(SOURCE, StatusCode::INTERNAL_SERVER_ERROR, &err))?;

    let body = async_stream::stream! {
        let _cleanup = cleanup;
        futures::pin_mut!(chunks);
        while let Some(chunk) = chunks.next().await {
            yield chunk;
        }
    };

    Ok((
        StatusCode::OK,
        [
            (CONTENT_TYPE, HeaderValue::from_static(PDF_MEDIA_TYPE)),
            (CONTENT_LENGTH, HeaderValue::from(pdf.size)),
        ],
        Body::from_stream(body),
    )
        .into_response())
}

/// Checks run in order; the first failure decides the status.
fn validate(request: &Request<Body>) -> Result<(), HttpError> {
    if request.method() != Method::POST {
        return Err(HttpError::new(
            SOURCE,
            StatusCode::METHOD_NOT_ALLOWED,
            format!("Invalid request method {}", request.method()),
        ));
    }

    if request.body().is_end_stream() {
        return Err(HttpError::new(
            SOURCE,
            StatusCode::BAD_REQUEST,
            "Missing request body",
        ));
    }

    let Some(content_type) = request.headers().get(CONTENT_TYPE) else {
        return Err(HttpError::new(
            SOURCE,
            StatusCode::BAD_REQUEST,
            "Missing content-type request header",
        ));
    };

    if content_type.as_bytes() != HTML_MEDIA_TYPE.as_bytes() {
        return Err(HttpError::new(
            SOURCE,
            StatusCode::BAD_REQUEST,
            format!(
                "Invalid content-type request header {:?}",
                String::from_utf8_lossy(content_type.as_bytes())
            ),
        ));
    }

    Ok(())
}
