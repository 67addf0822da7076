//! Conversion requests, their on-disk artifacts, and the outcomes a render can produce.

use std::{
    fmt,
    path::{Path, PathBuf},
    time::Duration,
};

use thiserror::Error;
use uuid::Uuid;

/// Extension used for the submitted HTML artifact.
pub const INPUT_EXTENSION: &str = "html";

/// Extension used for the rendered PDF artifact.
pub const OUTPUT_EXTENSION: &str = "pdf";

/// Unguessable identifier assigned to every inbound conversion call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.simple().fmt(f)
    }
}

/// A single HTML to PDF conversion and the artifact pair it owns.
///
/// Both paths are derived from the identifier and the artifact root, so two
/// requests never share a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionRequest {
    id: RequestId,
    input_path: PathBuf,
    output_path: PathBuf,
}

impl ConversionRequest {
    pub fn new(id: RequestId, root: &Path) -> Self {
        Self {
            id,
            input_path: root.join(format!("{id}.{INPUT_EXTENSION}")),
            output_path: root.join(format!("{id}.{OUTPUT_EXTENSION}")),
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn input_path(&self) -> &Path {
        &self.input_path
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }
}

/// Result of probing an artifact on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ArtifactStat {
    pub exists: bool,
    pub size: u64,
}

impl ArtifactStat {
    pub const MISSING: Self = Self {
        exists: false,
        size: 0,
    };

    /// An artifact is ready when it exists and holds at least one byte.
    pub fn is_ready(&self) -> bool {
        self.exists && self.size >= 1
    }
}

/// A PDF the renderer produced and that passed output verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPdf {
    pub path: PathBuf,
    pub size: u64,
}

/// Why a conversion failed.
///
/// Variants are listed in the order they are checked; the first applicable
/// one wins.
#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("renderer binary `{binary}` could not be found on PATH")]
    BinaryNotFound { binary: String },
    #[error("html for conversion {} does not exist or is not readable", path.display())]
    InputMissing { path: PathBuf },
    #[error("html file-size for conversion {} is smaller than 1 byte", path.display())]
    InputEmpty { path: PathBuf },
    #[error("renderer timed out after {} ms and was killed", after.as_millis())]
    Timeout { after: Duration },
    #[error("renderer reported diagnostics: {stderr}")]
    DiagnosticOutput { stderr: String },
    #[error("renderer exited with {}", describe_exit(*code))]
    NonZeroExit { code: Option<i32> },
    #[error("pdf file-size for conversion {} is smaller than 1 byte", path.display())]
    OutputEmpty { path: PathBuf },
    #[error("renderer process i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

impl ConversionError {
    /// Short stable label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ConversionError::BinaryNotFound { .. } => "binary_not_found",
            ConversionError::InputMissing { .. } => "input_missing",
            ConversionError::InputEmpty { .. } => "input_empty",
            ConversionError::Timeout { .. } => "timeout",
            ConversionError::DiagnosticOutput { .. } => "diagnostic_output",
            ConversionError::NonZeroExit { .. } => "non_zero_exit",
            ConversionError::OutputEmpty { .. } => "output_empty",
            ConversionError::Io(_) => "io",
        }
    }
}

fn describe_exit(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("code {code}"),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

/// Outcome of a single conversion.
pub type ConversionOutcome = Result<RenderedPdf, ConversionError>;
