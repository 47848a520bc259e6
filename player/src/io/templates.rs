//! Two-tier template lookup and template capture.
//!
//! Templates live in `<templates>/<sanitized game>/<name>` (game-scoped) and
//! `<templates>/<name>` (shared). The scoped file always wins; the shared one
//! is used only when no scoped file exists.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::core::sanitize::sanitize_filename;
use crate::core::types::Region;
use crate::io::device::Frame;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template '{name}' not found (looked in {} and {})", scoped.display(), shared.display())]
    NotFound {
        name: String,
        scoped: PathBuf,
        shared: PathBuf,
    },
}

#[derive(Debug, Clone)]
pub struct TemplateStore {
    root: PathBuf,
    game_dir: String,
}

impl TemplateStore {
    pub fn new(root: impl Into<PathBuf>, game_name: &str) -> Self {
        Self {
            root: root.into(),
            game_dir: sanitize_filename(game_name),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding this game's own templates.
    pub fn scoped_dir(&self) -> PathBuf {
        self.root.join(&self.game_dir)
    }

    /// Path of the template named `name`, preferring the game-scoped copy.
    pub fn resolve(&self, name: &str) -> Result<PathBuf, TemplateError> {
        let scoped = self.scoped_dir().join(name);
        if scoped.is_file() {
            debug!(template = name, path = %scoped.display(), "resolved game template");
            return Ok(scoped);
        }
        let shared = self.root.join(name);
        if shared.is_file() {
            debug!(template = name, path = %shared.display(), "resolved shared template");
            return Ok(shared);
        }
        Err(TemplateError::NotFound {
            name: name.to_string(),
            scoped,
            shared,
        })
    }

    /// Crop `region` out of `frame` and store it as a game-scoped template.
    ///
    /// `name` gets a `.png` extension when it has none. Returns the written path.
    #[instrument(skip_all, fields(template = name, region = ?region))]
    pub fn save_template(&self, frame: &Frame, region: Region, name: &str) -> Result<PathBuf> {
        let file_name = template_file_name(name)?;
        let crop = frame.crop(region).ok_or_else(|| {
            anyhow!(
                "region {region:?} lies outside the {}x{} frame",
                frame.width(),
                frame.height()
            )
        })?;
        let path = self.scoped_dir().join(&file_name);
        crop.save(&path)?;
        info!(path = %path.display(), width = crop.width(), height = crop.height(), "saved template");
        Ok(path)
    }

    /// Copy an existing image into the game-scoped directory; returns the template name.
    pub fn import_template(&self, source: &Path) -> Result<String> {
        let file_name = source
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| anyhow!("template source has no file name: {}", source.display()))?
            .to_string();
        let dir = self.scoped_dir();
        fs::create_dir_all(&dir).with_context(|| format!("create dir {}", dir.display()))?;
        let target = dir.join(&file_name);
        if fs::canonicalize(source).ok() != fs::canonicalize(&target).ok() {
            fs::copy(source, &target).with_context(|| {
                format!("copy {} to {}", source.display(), target.display())
            })?;
        }
        Ok(file_name)
    }
}

fn template_file_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() || trimmed.contains(['/', '\\']) || trimmed.starts_with('.') {
        return Err(anyhow!("invalid template name '{name}'"));
    }
    if Path::new(trimmed).extension().is_some() {
        Ok(trimmed.to_string())
    } else {
        Ok(format!("{trimmed}.png"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::noise_pattern;

    #[test]
    fn scoped_template_wins_over_shared() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = TemplateStore::new(temp.path(), "Đế Chế 2 Việt");
        fs::create_dir_all(store.scoped_dir()).expect("mkdir");
        fs::write(temp.path().join("ok.png"), b"shared").expect("write");
        assert_eq!(store.resolve("ok.png").expect("shared"), temp.path().join("ok.png"));

        fs::write(store.scoped_dir().join("ok.png"), b"scoped").expect("write");
        let resolved = store.resolve("ok.png").expect("scoped");
        assert_eq!(resolved, temp.path().join("De_Che_2_Viet").join("ok.png"));
    }

    #[test]
    fn missing_template_reports_both_locations() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = TemplateStore::new(temp.path(), "demo");
        let TemplateError::NotFound { scoped, shared, .. } =
            store.resolve("gone.png").expect_err("missing");
        assert_eq!(scoped, temp.path().join("demo").join("gone.png"));
        assert_eq!(shared, temp.path().join("gone.png"));
    }

    #[test]
    fn save_template_writes_cropped_png() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = TemplateStore::new(temp.path(), "demo");
        let frame = Frame::new(noise_pattern(40, 30, 3));

        let path = store
            .save_template(&frame, Region::new(5, 6, 10, 8), "button")
            .expect("save");
        assert_eq!(path, temp.path().join("demo").join("button.png"));
        let saved = Frame::open(&path).expect("open");
        assert_eq!(Some(saved), frame.crop(Region::new(5, 6, 10, 8)));
    }

    #[test]
    fn rejects_bad_names_and_regions() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = TemplateStore::new(temp.path(), "demo");
        let frame = Frame::new(noise_pattern(10, 10, 1));
        assert!(store.save_template(&frame, Region::new(0, 0, 2, 2), "../x").is_err());
        assert!(store.save_template(&frame, Region::new(0, 0, 2, 2), " ").is_err());
        assert!(store.save_template(&frame, Region::new(20, 0, 2, 2), "x").is_err());
    }
}
