//! HTML to PDF rendering through an external converter process.

mod wkhtmltopdf;

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::conversion::{ConversionOutcome, ConversionRequest};

pub use wkhtmltopdf::{RENDERER_ARGS, WkhtmltopdfRenderer, resolve_binary};

pub(crate) const METRIC_CONVERSIONS_TOTAL: &str = "html_pdf_export_conversions_total";
pub(crate) const METRIC_CONVERSION_MS: &str = "html_pdf_export_conversion_ms";

/// Default deadline for a single conversion.
pub const DEFAULT_CONVERSION_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Converts a request's input artifact into its output artifact.
///
/// Implementations must leave the deadline's effect confined to the in-flight
/// process: once an outcome is produced it is final.
#[async_trait]
pub trait PdfRenderer: Send + Sync {
    async fn convert(&self, request: &ConversionRequest, timeout: Duration) -> ConversionOutcome;
}
