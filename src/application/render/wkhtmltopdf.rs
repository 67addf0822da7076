use std::{
    env,
    io::ErrorKind,
    path::{Path, PathBuf},
    process::Stdio,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use metrics::{counter, histogram};
use tokio::{fs, io::AsyncReadExt, process::Command};
use tracing::{info, warn};

use crate::domain::conversion::{
    ConversionError, ConversionOutcome, ConversionRequest, RenderedPdf,
};
use crate::infra::artifacts::stat_artifact;

use super::{METRIC_CONVERSION_MS, METRIC_CONVERSIONS_TOTAL, PdfRenderer};

/// Fixed flags passed ahead of the input and output paths.
pub const RENDERER_ARGS: [&str; 5] = [
    "--log-level",
    "warn",
    "--print-media-type",
    "--disable-javascript",
    "--no-outline",
];

/// Renderer that shells out to `wkhtmltopdf` (or a compatible binary).
#[derive(Debug, Clone)]
pub struct WkhtmltopdfRenderer {
    binary: PathBuf,
}

impl WkhtmltopdfRenderer {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    async fn run(&self, request: &ConversionRequest, timeout: Duration) -> ConversionOutcome {
        let binary = resolve_binary(&self.binary).ok_or_else(|| ConversionError::BinaryNotFound {
            binary: self.binary.display().to_string(),
        })?;

        let input_path = request.input_path();
        let output_path = request.output_path();
        let html_size = match readable_size(input_path).await {
            Some(size) => size,
            None => {
                return Err(ConversionError::InputMissing {
                    path: input_path.to_path_buf(),
                });
            }
        };
        if html_size < 1 {
            return Err(ConversionError::InputEmpty {
                path: input_path.to_path_buf(),
            });
        }

        info!(
            target = "html_pdf_export::render",
            op = "wkhtmltopdf::convert",
            request_id = %request.id(),
            input = %input_path.display(),
            html_bytes = html_size,
            "Starting conversion of HTML to PDF"
        );

        let mut child = Command::new(&binary)
            .args(RENDERER_ARGS)
            .arg(input_path)
            .arg(output_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| {
                if err.kind() == ErrorKind::NotFound {
                    ConversionError::BinaryNotFound {
                        binary: binary.display().to_string(),
                    }
                } else {
                    ConversionError::Io(err)
                }
            })?;

        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| std::io::Error::other("renderer stderr was not captured"))?;

        // Exit and stderr drain are awaited together so a chatty renderer cannot
        // block on a full pipe.
        let completion = async {
            let mut diagnostics = Vec::new();
            let (status, _) =
                tokio::try_join!(child.wait(), stderr.read_to_end(&mut diagnostics))?;
            Ok::<_, std::io::Error>((status, diagnostics))
        };

        let completed = tokio::time::timeout(timeout, completion).await;
        let (status, diagnostics) = match completed {
            Ok(completed) => completed?,
            Err(_) => {
                if let Err(err) = child.start_kill() {
                    warn!(
                        target = "html_pdf_export::render",
                        op = "wkhtmltopdf::convert",
                        request_id = %request.id(),
                        error = %err,
                        "Failed to kill timed out renderer"
                    );
                }
                // Reap the child so it does not linger as a zombie.
                child.wait().await?;
                return Err(ConversionError::Timeout { after: timeout });
            }
        };

        if !diagnostics.is_empty() {
            return Err(ConversionError::DiagnosticOutput {
                stderr: String::from_utf8_lossy(&diagnostics).into_owned(),
            });
        }

        if !status.success() {
            return Err(ConversionError::NonZeroExit {
                code: status.code(),
            });
        }

        let output = stat_artifact(output_path).await;
        if !output.is_ready() {
            return Err(ConversionError::OutputEmpty {
                path: output_path.to_path_buf(),
            });
        }

        Ok(RenderedPdf {
            path: output_path.to_path_buf(),
            size: output.size,
        })
    }
}

#[async_trait]
impl PdfRenderer for WkhtmltopdfRenderer {
    async fn convert(&self, request: &ConversionRequest, timeout: Duration) -> ConversionOutcome {
        let started_at = Instant::now();
        let outcome = self.run(request, timeout).await;
        let elapsed_ms = started_at.elapsed().as_millis() as u64;

        match &outcome {
            Ok(pdf) => {
                info!(
                    target = "html_pdf_export::render",
                    op = "wkhtmltopdf::convert",
                    result = "success",
                    request_id = %request.id(),
                    elapsed_ms,
                    pdf_bytes = pdf.size,
                    "Done converting HTML to PDF"
                );
            }
            Err(err) => {
                warn!(
                    target = "html_pdf_export::render",
                    op = "wkhtmltopdf::convert",
                    result = "error",
                    error_code = err.kind(),
                    request_id = %request.id(),
                    elapsed_ms,
                    error = %err,
                    "HTML to PDF conversion failed"
                );
            }
        }

        let result = match &outcome {
            Ok(_) => "success",
            Err(err) => err.kind(),
        };
        counter!(METRIC_CONVERSIONS_TOTAL, "result" => result).increment(1);
        histogram!(METRIC_CONVERSION_MS).record(started_at.elapsed().as_secs_f64() * 1000.0);

        outcome
    }
}

/// Locate `binary` the way a shell would.
///
/// Names without a directory component are searched on `PATH`; anything else
/// is checked in place.
pub fn resolve_binary(binary: &Path) -> Option<PathBuf> {
    if binary.as_os_str().is_empty() {
        return None;
    }
    if binary.is_absolute() || binary.components().count() > 1 {
        return is_executable(binary).then(|| binary.to_path_buf());
    }

    let search_path = env::var_os("PATH")?;
    env::split_paths(&search_path)
        .map(|dir| dir.join(binary))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    std::fs::metadata(path)
        .map(|metadata| metadata.is_file() && metadata.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file() || path.with_extension(env::consts::EXE_EXTENSION).is_file()
}

/// Size of a file that exists and can be opened for reading.
async fn readable_size(path: &Path) -> Option<u64> {
    let file = fs::File::open(path).await.ok()?;
    let metadata = file.metadata().await.ok()?;
    metadata.is_file().then(|| metadata.len())
}
