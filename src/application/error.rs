use std::error::Error as StdError;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::infra::error::InfraError;

/// Diagnostic chain attached to an error response for the logging middleware.
///
/// Clients only ever see the status code; everything in here stays in the log.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = Vec::new();
        messages.push(error.to_string());
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn from_message(
        source: &'static str,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            status,
            messages: vec![message.into()],
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

/// An error response with an empty body and a log-only report.
#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    report: ErrorReport,
}

impl HttpError {
    pub fn new(source: &'static str, status: StatusCode, detail: impl Into<String>) -> Self {
        let report = ErrorReport::from_message(source, status, detail);
        Self { status, report }
    }

    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let report = ErrorReport::from_error(source, status, error);
        Self { status, report }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let mut response = self.status.into_response();
        self.report.attach(&mut response);
        response
    }
}

/// Failures that end the service itself rather than a single request.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }
}
