//! Template matching against captured frames, plus best-effort OCR.
//!
//! The matcher holds no per-call state. Templates are read from disk on every
//! call, so a template edited or deleted mid-run is picked up (or degrades to
//! "not found") on the next poll.

use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use image::RgbImage;
use tracing::{debug, instrument, warn};

use crate::core::matching::{self, Match, SearchStrategy};
use crate::core::types::Region;
use crate::io::device::Frame;
use crate::io::ocr::Tesseract;
use crate::stop::StopHandle;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct ImageMatcher {
    strategy: SearchStrategy,
    ocr: Option<Tesseract>,
}

impl Default for ImageMatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageMatcher {
    pub fn new() -> Self {
        Self {
            strategy: SearchStrategy::Auto,
            ocr: None,
        }
    }

    pub fn with_strategy(mut self, strategy: SearchStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_ocr(mut self, ocr: Tesseract) -> Self {
        self.ocr = Some(ocr);
        self
    }

    /// Read a template as 8-bit RGB whatever its stored channel layout.
    ///
    /// A missing or unreadable file is `None`, not an error.
    pub fn load_template(&self, path: &Path) -> Option<RgbImage> {
        if !path.is_file() {
            debug!(path = %path.display(), "template file absent");
            return None;
        }
        match Frame::open(path) {
            Ok(frame) => Some(frame.into_image()),
            Err(err) => {
                warn!(path = %path.display(), err = %format!("{err:#}"), "unreadable template");
                None
            }
        }
    }

    /// Best match of the template scoring at least `threshold`.
    pub fn find_best(&self, frame: &Frame, template_path: &Path, threshold: f64) -> Option<Match> {
        let template = self.load_template(template_path)?;
        let found = matching::find_best(frame.image(), &template, threshold, self.strategy);
        debug!(
            template = %template_path.display(),
            threshold,
            found = ?found.map(|m| (m.center, m.score)),
            "find_best"
        );
        found
    }

    /// Every non-overlapping match at or above `threshold`, strongest first.
    pub fn find_all(&self, frame: &Frame, template_path: &Path, threshold: f64) -> Vec<Match> {
        let Some(template) = self.load_template(template_path) else {
            return Vec::new();
        };
        let found = matching::find_all(frame.image(), &template, threshold, self.strategy);
        debug!(template = %template_path.display(), threshold, count = found.len(), "find_all");
        found
    }

    /// OCR text of `frame` (or of `region` within it). Empty when OCR is not
    /// configured or fails.
    pub fn extract_text(&self, frame: &Frame, region: Option<Region>, lang: &str) -> String {
        match &self.ocr {
            Some(ocr) => ocr.extract_text(frame, region, lang),
            None => {
                warn!("text extraction requested but OCR is not configured");
                String::new()
            }
        }
    }

    /// Poll until the template appears or `timeout` elapses.
    ///
    /// Each round captures once, matches once, and sleeps `interval`. A failed
    /// capture counts as a round without a match. When `stop` is given, a stop
    /// request ends the wait early with `None`.
    #[instrument(skip_all, fields(template = %template_path.display(), timeout_ms = timeout.as_millis() as u64, threshold))]
    pub fn wait_for<F>(
        &self,
        mut capture: F,
        template_path: &Path,
        timeout: Duration,
        interval: Duration,
        threshold: f64,
        stop: Option<&StopHandle>,
    ) -> Option<Match>
    where
        F: FnMut() -> Option<Frame>,
    {
        let start = Instant::now();
        let mut polls = 0u32;
        while start.elapsed() < timeout {
            if stop.is_some_and(StopHandle::is_requested) {
                debug!(polls, "wait cancelled by stop request");
                return None;
            }
            polls += 1;
            if let Some(frame) = capture()
                && let Some(found) = self.find_best(&frame, template_path, threshold)
            {
                debug!(polls, center = %found.center, score = found.score, "template appeared");
                return Some(found);
            }
            thread::sleep(interval);
        }
        debug!(polls, "template did not appear before timeout");
        None
    }
}
