//! PDF text extraction through the poppler `pdftotext` CLI

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::OnceCell;

use crate::error::{GovbriefError, Result};

const DEFAULT_BINARY: &str = "pdftotext";
const DEFAULT_TIMEOUT_MS: u64 = 60_000;
const STDERR_SNIPPET_CHARS: usize = 300;

/// Turns PDF bytes into plain text
#[async_trait]
pub trait PdfTextExtractor: Send + Sync {
    /// `scratch_dir` is a writable directory the extractor may use for temp files
    async fn extract(&self, pdf: &[u8], scratch_dir: &Path) -> Result<String>;
}

/// Shells out to `pdftotext`. Availability is probed once and remembered;
/// a missing binary is an extraction failure, not a crash.
#[derive(Debug)]
pub struct PdftotextExtractor {
    binary: PathBuf,
    timeout: Duration,
    available: OnceCell<bool>,
}

impl Default for PdftotextExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl PdftotextExtractor {
    /// Uses GOVBRIEF_PDFTOTEXT when set, otherwise `pdftotext` on PATH
    pub fn new() -> Self {
        let binary = std::env::var("GOVBRIEF_PDFTOTEXT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_BINARY));
        Self::with_binary(binary)
    }

    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            available: OnceCell::new(),
        }
    }

    pub async fn is_available(&self) -> bool {
        *self
            .available
            .get_or_init(|| async {
                let probe = Command::new(&self.binary)
                    .arg("-v")
                    .stdin(Stdio::null())
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .kill_on_drop(true)
                    .status()
                    .await;
                match probe {
                    Ok(_) => true,
                    Err(e) => {
                        tracing::warn!(
                            "PDF extraction disabled: {} not runnable ({})",
                            self.binary.display(),
                            e
                        );
                        false
                    }
                }
            })
            .await
    }
}

#[async_trait]
impl PdfTextExtractor for PdftotextExtractor {
    async fn extract(&self, pdf: &[u8], scratch_dir: &Path) -> Result<String> {
        if !self.is_available().await {
            return Err(GovbriefError::ExtractionFailed {
                message: format!("{} is not available", self.binary.display()),
            });
        }

        let input = scratch_dir.join(format!(".extract-{}.pdf", uuid::Uuid::new_v4()));
        tokio::fs::write(&input, pdf).await?;

        let mut cmd = Command::new(&self.binary);
        cmd.kill_on_drop(true)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .arg("-layout")
            .arg("-enc")
            .arg("UTF-8")
            .arg(&input)
            .arg("-");

        let outcome = tokio::time::timeout(self.timeout, cmd.output()).await;
        if let Err(e) = tokio::fs::remove_file(&input).await {
            tracing::debug!("Could not remove scratch file {}: {}", input.display(), e);
        }

        let output = match outcome {
            Err(_) => {
                return Err(GovbriefError::ExtractionFailed {
                    message: format!(
                        "pdftotext timed out after {}ms",
                        self.timeout.as_millis()
                    ),
                });
            }
            Ok(Err(e)) => {
                return Err(GovbriefError::ExtractionFailed {
                    message: format!("pdftotext failed to start: {e}"),
                });
            }
            Ok(Ok(output)) => output,
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let snippet: String = stderr.trim().chars().take(STDERR_SNIPPET_CHARS).collect();
            return Err(GovbriefError::ExtractionFailed {
                message: format!("pdftotext exited with {}: {}", output.status, snippet),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
