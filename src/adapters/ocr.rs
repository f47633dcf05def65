use crate::domain::ports::OcrEngine;
use crate::utils::error::{RenewError, Result};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

const CHAR_WHITELIST: &str = "0123456789xX*ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Runs the `tesseract` binary on a PNG piped through stdin.
#[derive(Debug, Clone)]
pub struct TesseractOcr {
    binary: String,
}

impl Default for TesseractOcr {
    fn default() -> Self {
        Self::new("tesseract")
    }
}

impl TesseractOcr {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn args() -> Vec<String> {
        vec![
            "stdin".to_string(),
            "stdout".to_string(),
            // single line of text
            "--psm".to_string(),
            "7".to_string(),
            "-c".to_string(),
            format!("tessedit_char_whitelist={}", CHAR_WHITELIST),
        ]
    }
}

#[async_trait]
impl OcrEngine for TesseractOcr {
    async fn recognize(&self, png: &[u8]) -> Result<String> {
        let mut child = Command::new(&self.binary)
            .args(Self::args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RenewError::OcrError {
                message: format!("failed to start {}: {}", self.binary, e),
            })?;

        let mut stdin = child.stdin.take().ok_or_else(|| RenewError::OcrError {
            message: "tesseract stdin unavailable".to_string(),
        })?;
        stdin.write_all(png).await?;
        drop(stdin);

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(RenewError::OcrError {
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}
