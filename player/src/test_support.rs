//! Test-only helpers: synthetic images, a scripted device, on-disk template
//! fixtures, and log capture.

use std::collections::VecDeque;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use image::{Rgb, RgbImage};
use tempfile::TempDir;

use crate::core::sanitize::sanitize_filename;
use crate::core::types::Point;
use crate::interpreter::RunSettings;
use crate::io::device::{Device, DeviceError, Frame};
use crate::io::templates::TemplateStore;

fn mix(x: u32, y: u32, seed: u32, channel: u32) -> u8 {
    let mut h = u64::from(x)
        .wrapping_mul(0x9E37_79B9_7F4A_7C15)
        .wrapping_add(u64::from(y).wrapping_mul(0xC2B2_AE3D_27D4_EB4F))
        .wrapping_add(u64::from(seed).wrapping_mul(0x1656_67B1_9E37_79F9))
        .wrapping_add(u64::from(channel));
    h ^= h >> 33;
    h = h.wrapping_mul(0xFF51_AFD7_ED55_8CCD);
    h ^= h >> 33;
    (h >> 24) as u8
}

/// Deterministic per-pixel noise. The same seed yields the same pixel at the
/// same coordinate regardless of image size.
pub fn noise_pattern(width: u32, height: u32, seed: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        Rgb([mix(x, y, seed, 0), mix(x, y, seed, 1), mix(x, y, seed, 2)])
    })
}

/// Deterministic noise made of `block`-sized squares aligned to the origin.
pub fn blocky_pattern(width: u32, height: u32, seed: u32, block: u32) -> RgbImage {
    let block = block.max(1);
    RgbImage::from_fn(width, height, |x, y| {
        let (bx, by) = (x / block, y / block);
        Rgb([mix(bx, by, seed, 0), mix(bx, by, seed, 1), mix(bx, by, seed, 2)])
    })
}

pub fn blank_frame(width: u32, height: u32, rgb: [u8; 3]) -> RgbImage {
    RgbImage::from_pixel(width, height, Rgb(rgb))
}

/// Copy `src` into `dst` with its top-left corner at (`x`, `y`), clipped.
pub fn stamp(dst: &mut RgbImage, src: &RgbImage, x: u32, y: u32) {
    for (sx, sy, pixel) in src.enumerate_pixels() {
        let (dx, dy) = (x + sx, y + sy);
        if dx < dst.width() && dy < dst.height() {
            dst.put_pixel(dx, dy, *pixel);
        }
    }
}

/// An action received by a [`ScriptedDevice`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceAction {
    Tap(Point),
    Swipe {
        from: Point,
        to: Point,
        duration_ms: u64,
    },
    Text(String),
    Key(String),
}

#[derive(Debug, Default)]
struct Script {
    frames: VecDeque<Frame>,
    fallback: Option<Frame>,
    disconnected: bool,
    fail_taps: bool,
    captures: usize,
    actions: Vec<DeviceAction>,
}

/// In-memory device: serves queued frames (then a fixed fallback frame) and
/// records every action. Clones share state, so a test can keep one clone
/// while the interpreter owns another.
#[derive(Debug, Clone, Default)]
pub struct ScriptedDevice {
    script: Arc<Mutex<Script>>,
}

impl ScriptedDevice {
    /// Connected device with nothing to show; captures fail until a frame is set.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_frame(frame: Frame) -> Self {
        let device = Self::new();
        device.set_frame(frame);
        device
    }

    pub fn disconnected() -> Self {
        let device = Self::new();
        device.lock().disconnected = true;
        device
    }

    /// Serve `frame` once, before the fallback.
    pub fn push_frame(&self, frame: Frame) {
        self.lock().frames.push_back(frame);
    }

    /// Serve `frame` whenever the queue is empty.
    pub fn set_frame(&self, frame: Frame) {
        self.lock().fallback = Some(frame);
    }

    /// Make taps report failure (they are still recorded).
    pub fn fail_taps(&self) {
        self.lock().fail_taps = true;
    }

    pub fn actions(&self) -> Vec<DeviceAction> {
        self.lock().actions.clone()
    }

    pub fn taps(&self) -> Vec<Point> {
        self.lock()
            .actions
            .iter()
            .filter_map(|action| match action {
                DeviceAction::Tap(at) => Some(*at),
                _ => None,
            })
            .collect()
    }

    pub fn capture_count(&self) -> usize {
        self.lock().captures
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, action: DeviceAction) -> bool {
        let mut script = self.lock();
        if script.disconnected {
            return false;
        }
        let ok = !(script.fail_taps && matches!(action, DeviceAction::Tap(_)));
        script.actions.push(action);
        ok
    }
}

impl Device for ScriptedDevice {
    fn serial(&self) -> Option<String> {
        (!self.lock().disconnected).then(|| "scripted".to_string())
    }

    fn capture(&self) -> Result<Frame, DeviceError> {
        let mut script = self.lock();
        if script.disconnected {
            return Err(DeviceError::NotConnected);
        }
        script.captures += 1;
        if let Some(frame) = script.frames.pop_front() {
            return Ok(frame);
        }
        script
            .fallback
            .clone()
            .ok_or_else(|| DeviceError::Transport("no frame scripted".to_string()))
    }

    fn tap(&self, at: Point) -> bool {
        self.record(DeviceAction::Tap(at))
    }

    fn swipe(&self, from: Point, to: Point, duration_ms: u64) -> bool {
        self.record(DeviceAction::Swipe {
            from,
            to,
            duration_ms,
        })
    }

    fn input_text(&self, text: &str) -> bool {
        self.record(DeviceAction::Text(text.to_string()))
    }

    fn press_key(&self, key: &str) -> bool {
        self.record(DeviceAction::Key(key.to_string()))
    }

    fn screen_size(&self) -> Option<(u32, u32)> {
        let script = self.lock();
        script
            .fallback
            .as_ref()
            .map(|frame| (frame.width(), frame.height()))
    }
}

/// Temporary `templates/` and `screenshots/` directories.
pub struct TestAssets {
    pub dir: TempDir,
    pub templates: PathBuf,
    pub screenshots: PathBuf,
}

impl Default for TestAssets {
    fn default() -> Self {
        Self::new()
    }
}

impl TestAssets {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let templates = dir.path().join("templates");
        let screenshots = dir.path().join("screenshots");
        std::fs::create_dir_all(&templates).expect("templates dir");
        Self {
            dir,
            templates,
            screenshots,
        }
    }

    pub fn store(&self, game: &str) -> TemplateStore {
        TemplateStore::new(&self.templates, game)
    }

    /// Fast-polling settings rooted in the temporary directories.
    pub fn settings(&self) -> RunSettings {
        RunSettings {
            screenshots_dir: self.screenshots.clone(),
            poll_interval: Duration::from_millis(10),
            cancel_during_polls: true,
        }
    }

    /// Write `image` as a template: game-scoped when `game` is given, shared otherwise.
    pub fn write_template(&self, game: Option<&str>, name: &str, image: &RgbImage) -> PathBuf {
        let dir = match game {
            Some(game) => self.templates.join(sanitize_filename(game)),
            None => self.templates.clone(),
        };
        std::fs::create_dir_all(&dir).expect("template dir");
        let path = dir.join(name);
        image.save(&path).expect("save template");
        path
    }
}

#[derive(Clone, Default)]
struct LogSink(Arc<Mutex<Vec<u8>>>);

impl Write for LogSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Run `f` with a thread-local subscriber and return its result plus every
/// line logged (plain text, no ANSI) while it ran.
pub fn capture_logs<T>(f: impl FnOnce() -> T) -> (T, String) {
    let sink = LogSink::default();
    let writer = sink.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::TRACE)
        .finish();
    let result = tracing::subscriber::with_default(subscriber, f);
    let bytes = sink
        .0
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone();
    (result, String::from_utf8_lossy(&bytes).into_owned())
}
