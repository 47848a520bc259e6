//! Device abstraction: the action surface the interpreter drives.
//!
//! The [`Device`] trait decouples step execution from the transport (currently
//! adb). Tests use scripted devices that serve synthetic frames and record the
//! actions they receive.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use image::{DynamicImage, RgbImage};
use thiserror::Error;

use crate::core::types::{Point, Region};

/// Why a device operation could not produce a result.
///
/// The interpreter treats every variant as a single failed action; the
/// distinction exists for diagnostics.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("no device connected")]
    NotConnected,
    #[error("`{command}` timed out after {timeout_secs}s")]
    Timeout { command: String, timeout_secs: u64 },
    #[error("`{command}` failed ({status}): {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },
    #[error("unreadable frame: {0}")]
    MalformedFrame(String),
    #[error("transport error: {0}")]
    Transport(String),
}

impl DeviceError {
    /// True when the session has no bound endpoint, as opposed to a bound
    /// endpoint that failed to respond.
    pub fn is_not_connected(&self) -> bool {
        matches!(self, DeviceError::NotConnected)
    }
}

/// Operations available on a bound device.
///
/// Action methods report success as `bool` and never fail loudly: an unbound
/// session or transport failure logs and returns `false`.
pub trait Device: Send {
    /// Identifier of the bound endpoint, if any.
    fn serial(&self) -> Option<String>;

    fn capture(&self) -> Result<Frame, DeviceError>;

    fn tap(&self, at: Point) -> bool;

    fn swipe(&self, from: Point, to: Point, duration_ms: u64) -> bool;

    fn input_text(&self, text: &str) -> bool;

    /// `key` is an Android keycode, numeric (`"4"`) or symbolic (`"KEYCODE_BACK"`).
    fn press_key(&self, key: &str) -> bool;

    fn screen_size(&self) -> Option<(u32, u32)>;
}

/// A captured screen in canonical 8-bit RGB.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame(RgbImage);

impl Frame {
    pub fn new(image: RgbImage) -> Self {
        Self(image)
    }

    /// Grayscale, alpha, and 16-bit sources all normalize to 8-bit RGB.
    pub fn from_dynamic(image: DynamicImage) -> Self {
        Self(image.to_rgb8())
    }

    /// Decode an encoded image (PNG from `screencap -p`, or anything `image` sniffs).
    pub fn decode(bytes: &[u8]) -> Result<Self, DeviceError> {
        if bytes.is_empty() {
            return Err(DeviceError::MalformedFrame("empty payload".to_string()));
        }
        image::load_from_memory(bytes)
            .map(Self::from_dynamic)
            .map_err(|e| DeviceError::MalformedFrame(e.to_string()))
    }

    pub fn open(path: &Path) -> Result<Self> {
        let image =
            image::open(path).with_context(|| format!("open image {}", path.display()))?;
        Ok(Self::from_dynamic(image))
    }

    /// Write as an image file, creating parent directories. Format follows the extension.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("create dir {}", parent.display()))?;
        }
        self.0
            .save(path)
            .with_context(|| format!("write image {}", path.display()))
    }

    pub fn width(&self) -> u32 {
        self.0.width()
    }

    pub fn height(&self) -> u32 {
        self.0.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.0
    }

    pub fn into_image(self) -> RgbImage {
        self.0
    }

    /// Copy out `region`, clipped to the frame. `None` when nothing remains.
    pub fn crop(&self, region: Region) -> Option<Frame> {
        let r = region.clip(self.width(), self.height())?;
        let view = image::imageops::crop_imm(&self.0, r.x, r.y, r.width, r.height);
        Some(Frame(view.to_image()))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use image::{ImageFormat, LumaA};

    use super::*;

    #[test]
    fn decode_rejects_garbage_and_empty_payloads() {
        assert!(matches!(
            Frame::decode(b""),
            Err(DeviceError::MalformedFrame(_))
        ));
        assert!(matches!(
            Frame::decode(b"error: device offline"),
            Err(DeviceError::MalformedFrame(_))
        ));
    }

    #[test]
    fn decode_normalizes_gray_alpha_png_to_rgb() {
        let gray = image::ImageBuffer::from_pixel(3, 2, LumaA([90u8, 128]));
        let mut png = Cursor::new(Vec::new());
        DynamicImage::ImageLumaA8(gray)
            .write_to(&mut png, ImageFormat::Png)
            .expect("encode");

        let frame = Frame::decode(png.get_ref()).expect("decode");
        assert_eq!((frame.width(), frame.height()), (3, 2));
        assert_eq!(frame.image().get_pixel(2, 1).0, [90, 90, 90]);
    }

    #[test]
    fn crop_clips_to_frame() {
        let frame = Frame::new(RgbImage::from_fn(10, 8, |x, y| {
            image::Rgb([x as u8, y as u8, 0])
        }));
        let cropped = frame.crop(Region::new(8, 6, 5, 5)).expect("crop");
        assert_eq!((cropped.width(), cropped.height()), (2, 2));
        assert_eq!(cropped.image().get_pixel(0, 0).0, [8, 6, 0]);
        assert!(frame.crop(Region::new(10, 0, 1, 1)).is_none());
    }

    #[test]
    fn not_connected_is_distinguishable() {
        assert!(DeviceError::NotConnected.is_not_connected());
        let failed = DeviceError::CommandFailed {
            command: "screencap".to_string(),
            status: "exit status: 1".to_string(),
            stderr: "device offline".to_string(),
        };
        assert!(!failed.is_not_connected());
        assert_eq!(
            failed.to_string(),
            "`screencap` failed (exit status: 1): device offline"
        );
    }
}
