//! CLI tests for commands that do not need a device.
//!
//! Spawns the player binary in a temporary working directory and checks exit
//! codes and stdout.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use player::exit_codes;
use player::test_support::{noise_pattern, stamp};

const DEMO: &str = r#"
name = "Demo Game"

[tasks.daily]
name = "Daily rewards"

[[tasks.daily.steps]]
type = "click"
x = 10
y = 20

[[tasks.daily.steps]]
type = "find_and_click"
templates = ["gift.png"]
continue_if_not_found = true
"#;

fn player(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_player"))
        .current_dir(dir)
        .env_remove("RUST_LOG")
        .args(args)
        .output()
        .expect("run player")
}

fn write_game(dir: &Path, file: &str, contents: &str) {
    let games = dir.join("config/games");
    fs::create_dir_all(&games).expect("games dir");
    fs::write(games.join(file), contents).expect("write game");
}

#[test]
fn init_then_validate_succeeds() {
    let temp = tempfile::tempdir().expect("tempdir");

    let init = player(temp.path(), &["init"]);
    assert_eq!(init.status.code(), Some(exit_codes::OK));
    assert!(temp.path().join("player.toml").is_file());
    assert!(temp.path().join("config/games/example.toml").is_file());
    assert!(temp.path().join("config/templates").is_dir());

    let validate = player(temp.path(), &["validate"]);
    assert_eq!(
        validate.status.code(),
        Some(exit_codes::OK),
        "stdout: {}",
        String::from_utf8_lossy(&validate.stdout)
    );
}

#[test]
fn tasks_lists_task_keys() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_game(temp.path(), "demo.toml", DEMO);

    let out = player(temp.path(), &["tasks", "--game", "demo"]);
    assert_eq!(out.status.code(), Some(exit_codes::OK));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("daily\tDaily rewards\t2 steps"), "{stdout}");
}

#[test]
fn validate_rejects_schema_errors_and_warns_on_lint_problems() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_game(
        temp.path(),
        "typed.toml",
        "name = \"Typed\"\n[[tasks.t.steps]]\ntype = \"click\"\nx = \"left\"\ny = 3\n",
    );
    write_game(
        temp.path(),
        "lint.toml",
        "name = \"Lint\"\n[[tasks.t.steps]]\ntype = \"click\"\nx = 4\n",
    );

    let typed = player(temp.path(), &["validate", "--game", "typed"]);
    assert_eq!(typed.status.code(), Some(exit_codes::INVALID));

    let lint = player(temp.path(), &["validate", "--game", "lint"]);
    assert_eq!(lint.status.code(), Some(exit_codes::OK));
    let stdout = String::from_utf8_lossy(&lint.stdout);
    assert!(stdout.starts_with("warning "), "{stdout}");
    assert!(stdout.contains("step 1"), "{stdout}");
}

#[test]
fn run_unknown_task_is_invalid_before_touching_adb() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_game(temp.path(), "demo.toml", DEMO);

    let out = player(temp.path(), &["run", "--game", "demo", "--task", "weekly"]);
    assert_eq!(out.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&out.stderr).contains("task 'weekly' not found"));
}

#[test]
fn find_locates_template_in_image_file() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_game(temp.path(), "demo.toml", DEMO);
    let template = noise_pattern(14, 10, 7);
    let scoped = temp.path().join("config/templates/Demo_Game");
    fs::create_dir_all(&scoped).expect("template dir");
    template.save(scoped.join("gift.png")).expect("save template");
    let mut screen = noise_pattern(120, 90, 8);
    stamp(&mut screen, &template, 60, 40);
    screen.save(temp.path().join("screen.png")).expect("save screen");

    let hit = player(
        temp.path(),
        &["find", "--game", "demo", "--template", "gift.png", "--from", "screen.png"],
    );
    assert_eq!(hit.status.code(), Some(exit_codes::OK));
    assert!(String::from_utf8_lossy(&hit.stdout).starts_with("(67, 45)"));

    let blank = noise_pattern(120, 90, 9);
    blank.save(temp.path().join("other.png")).expect("save other");
    let miss = player(
        temp.path(),
        &["find", "--game", "demo", "--template", "gift.png", "--from", "other.png"],
    );
    assert_eq!(miss.status.code(), Some(exit_codes::TASK_FAILED));
}
