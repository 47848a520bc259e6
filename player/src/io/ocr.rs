//! Best-effort text extraction through the `tesseract` CLI.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, warn};

use crate::core::types::Region;
use crate::io::config::OcrConfig;
use crate::io::device::Frame;
use crate::io::process::run_with_timeout;

const OCR_OUTPUT_LIMIT: usize = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct Tesseract {
    exe: PathBuf,
    timeout: Duration,
}

impl Tesseract {
    pub fn new(exe: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            exe: exe.into(),
            timeout,
        }
    }

    pub fn from_config(cfg: &OcrConfig) -> Self {
        let exe = cfg
            .tesseract_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("tesseract"));
        Self::new(exe, Duration::from_secs(cfg.timeout_secs))
    }

    /// Text in `frame`, restricted to `region` when given.
    ///
    /// Any failure (missing binary, timeout, bad region) logs a warning and
    /// yields an empty string.
    pub fn extract_text(&self, frame: &Frame, region: Option<Region>, lang: &str) -> String {
        match self.try_extract(frame, region, lang) {
            Ok(text) => text,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "text extraction failed");
                String::new()
            }
        }
    }

    fn try_extract(&self, frame: &Frame, region: Option<Region>, lang: &str) -> Result<String> {
        let cropped;
        let source = match region {
            Some(r) => {
                cropped = frame
                    .crop(r)
                    .ok_or_else(|| anyhow!("region {r:?} lies outside the frame"))?;
                &cropped
            }
            None => frame,
        };

        let image = tempfile::Builder::new()
            .prefix("player-ocr-")
            .suffix(".png")
            .tempfile()
            .context("create temp image")?;
        source.save(image.path())?;

        let mut cmd = Command::new(&self.exe);
        cmd.arg(image.path()).arg("stdout").arg("-l").arg(lang);
        let out = run_with_timeout(cmd, self.timeout, OCR_OUTPUT_LIMIT)
            .with_context(|| format!("run {}", self.exe.display()))?;
        if out.timed_out {
            return Err(anyhow!("tesseract timed out after {:?}", self.timeout));
        }
        if !out.status.success() {
            return Err(anyhow!("tesseract failed ({}): {}", out.status, out.stderr_text()));
        }
        let text = out.stdout_text().trim().to_string();
        debug!(chars = text.chars().count(), "extracted text");
        Ok(text)
    }
}
