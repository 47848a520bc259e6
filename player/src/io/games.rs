//! Game document load/save with schema validation.
//!
//! Documents are TOML or JSON. Either way the raw value is checked against the
//! bundled JSON Schema before typed deserialization, and semantic problems are
//! logged as warnings.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use jsonschema::validator_for;
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::invariants::lint_game;
use crate::core::sanitize::sanitize_filename;
use crate::program::Game;

const GAME_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../schemas/game/v1.schema.json"
));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameFormat {
    Toml,
    Json,
}

impl GameFormat {
    /// `.json` is JSON; anything else is read as TOML.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => GameFormat::Json,
            _ => GameFormat::Toml,
        }
    }
}

/// Load, schema-check and deserialize a game document.
pub fn load_game(path: &Path) -> Result<Game> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read game {}", path.display()))?;
    let game = parse_game(&contents, GameFormat::from_path(path))
        .with_context(|| format!("load game {}", path.display()))?;
    for problem in lint_game(&game) {
        warn!(game = %game.name, "{problem}");
    }
    debug!(game = %game.name, tasks = game.tasks.len(), "loaded game");
    Ok(game)
}

/// Parse and schema-check a document without touching the filesystem.
pub fn parse_game(contents: &str, format: GameFormat) -> Result<Game> {
    let value: Value = match format {
        GameFormat::Toml => toml::from_str(contents).context("parse toml")?,
        GameFormat::Json => serde_json::from_str(contents).context("parse json")?,
    };
    validate_schema(&value)?;
    serde_json::from_value(value).context("deserialize game")
}

/// Write a game document; the format follows the extension.
pub fn write_game(path: &Path, game: &Game) -> Result<()> {
    let mut buf = match GameFormat::from_path(path) {
        GameFormat::Toml => toml::to_string_pretty(game).context("serialize game toml")?,
        GameFormat::Json => serde_json::to_string_pretty(game).context("serialize game json")?,
    };
    if !buf.ends_with('\n') {
        buf.push('\n');
    }
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).with_context(|| format!("create dir {}", parent.display()))?;
    }
    fs::write(path, buf).with_context(|| format!("write game {}", path.display()))
}

/// Resolve a game argument: an existing file path, or a name looked up in
/// `games_dir` as `<name>.toml` / `<name>.json` (raw, then sanitized).
pub fn find_game(games_dir: &Path, name_or_path: &str) -> Result<PathBuf> {
    let direct = PathBuf::from(name_or_path);
    if direct.is_file() {
        return Ok(direct);
    }
    let sanitized = sanitize_filename(name_or_path);
    let mut probed = Vec::new();
    for stem in [name_or_path, sanitized.as_str()] {
        if stem.is_empty() {
            continue;
        }
        for ext in ["toml", "json"] {
            let candidate = games_dir.join(format!("{stem}.{ext}"));
            if candidate.is_file() {
                return Ok(candidate);
            }
            probed.push(candidate.display().to_string());
        }
    }
    Err(anyhow!(
        "game '{name_or_path}' not found (looked for {})",
        probed.join(", ")
    ))
}

/// Game documents in `games_dir`, sorted by path. A missing directory is empty.
pub fn list_games(games_dir: &Path) -> Result<Vec<PathBuf>> {
    if !games_dir.exists() {
        return Ok(Vec::new());
    }
    let mut paths = Vec::new();
    for entry in
        fs::read_dir(games_dir).with_context(|| format!("read dir {}", games_dir.display()))?
    {
        let path = entry?.path();
        let is_doc = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("toml") || e.eq_ignore_ascii_case("json"));
        if path.is_file() && is_doc {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

fn validate_schema(value: &Value) -> Result<()> {
    let schema_value: Value = serde_json::from_str(GAME_SCHEMA).context("parse game schema")?;
    let compiled =
        validator_for(&schema_value).map_err(|err| anyhow!("invalid schema: {}", err))?;
    if !compiled.is_valid(value) {
        let messages = compiled
            .iter_errors(value)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(anyhow!(
            "game schema validation failed: {}",
            messages.join("; ")
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::Action;

    const SAMPLE: &str = r#"
name = "Demo"

[tasks.farm]
steps = [
  { type = "wait", duration = 0.5 },
  { type = "find_and_click", templates = ["a.png", "b.png"], goto_step_if_not_found = 1 },
  { type = "stop_task" },
]
"#;

    #[test]
    fn parses_valid_toml() {
        let game = parse_game(SAMPLE, GameFormat::Toml).expect("parse");
        let task = game.task("farm").expect("task");
        assert_eq!(task.len(), 3);
        assert_eq!(task.steps[2].action, Action::StopTask { message: None });
    }

    #[test]
    fn schema_rejects_unknown_step_type_and_missing_name() {
        let bad_type = r#"{"name": "x", "tasks": {"t": {"steps": [{"type": "dance"}]}}}"#;
        let err = parse_game(bad_type, GameFormat::Json).expect_err("invalid");
        assert!(format!("{err:#}").contains("schema validation failed"));

        let no_name = r#"{"tasks": {}}"#;
        assert!(parse_game(no_name, GameFormat::Json).is_err());

        let negative_goto =
            r#"{"name": "x", "tasks": {"t": {"steps": [{"type": "find_and_click", "template": "a", "goto_step_if_found": -1}]}}}"#;
        assert!(parse_game(negative_goto, GameFormat::Json).is_err());
    }

    #[test]
    fn write_then_find_and_load() {
        let temp = tempfile::tempdir().expect("tempdir");
        let game = parse_game(SAMPLE, GameFormat::Toml).expect("parse");
        let path = temp.path().join("Demo.json");
        write_game(&path, &game).expect("write");

        let found = find_game(temp.path(), "Demo").expect("find");
        assert_eq!(found, path);
        assert_eq!(load_game(&found).expect("load"), game);
        assert_eq!(list_games(temp.path()).expect("list"), vec![path]);
    }

    #[test]
    fn find_game_falls_back_to_sanitized_name() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("De_Che_2_Viet.toml"), "name = \"Đế Chế 2 Việt\"\n")
            .expect("write");
        let found = find_game(temp.path(), "Đế Chế 2 Việt").expect("find");
        assert_eq!(found, temp.path().join("De_Che_2_Viet.toml"));
        assert!(find_game(temp.path(), "missing").is_err());
    }
}
