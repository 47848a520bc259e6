use std::collections::BTreeMap;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, Parser, Subcommand};

use player::core::invariants::lint_game;
use player::core::types::{Point, Region};
use player::exit_codes;
use player::interpreter::{Interpreter, RunOutcome, RunReport, RunSettings};
use player::io::adb::{AdbSession, ConnectHint};
use player::io::config::{EmulatorKind, PlayerConfig, load_config, write_config};
use player::io::device::{Device, Frame};
use player::io::games::{GameFormat, find_game, list_games, load_game, parse_game, write_game};
use player::io::ocr::Tesseract;
use player::io::templates::TemplateStore;
use player::logging;
use player::looping::{LoopOutcome, LoopStop, RepeatMode, run_repeated};
use player::matcher::ImageMatcher;
use player::notify::notification_channel;
use player::operator;
use player::program::{Action, FindAndClick, Game, Program, Step};

#[derive(Parser)]
#[command(
    name = "player",
    version,
    about = "Scripted Android emulator automation over adb"
)]
struct Cli {
    /// Config file (missing file means defaults).
    #[arg(long, global = true, default_value = player::io::config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Raise log verbosity (-v debug, -vv trace). `RUST_LOG` overrides.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default config, asset directories, and an example game.
    Init {
        /// Overwrite existing files.
        #[arg(short, long)]
        force: bool,
    },
    /// Check the config and game files (schema and step lints).
    Validate {
        /// Game name or path; all games in the games directory when omitted.
        #[arg(long)]
        game: Option<String>,
    },
    /// List the tasks of a game.
    Tasks {
        #[arg(long)]
        game: String,
    },
    /// Run a task on the connected device.
    Run {
        #[arg(long)]
        game: String,
        #[arg(long)]
        task: String,
        /// Run the task N times.
        #[arg(long, conflicts_with = "forever")]
        repeat: Option<u32>,
        /// Repeat until stopped (type q and Enter while running).
        #[arg(long)]
        forever: bool,
        #[command(flatten)]
        device: DeviceArgs,
        /// Continue automatically at notification steps.
        #[arg(long)]
        yes: bool,
    },
    /// List connected adb endpoints.
    Devices,
    /// Save a screenshot of the device.
    Capture {
        #[arg(long)]
        out: PathBuf,
        #[command(flatten)]
        device: DeviceArgs,
    },
    /// Cut a region out of the screen and store it as a game template.
    Template {
        #[arg(long)]
        game: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        x: u32,
        #[arg(long)]
        y: u32,
        #[arg(long)]
        width: u32,
        #[arg(long)]
        height: u32,
        #[command(flatten)]
        source: SourceArgs,
    },
    /// Locate a template on the screen.
    Find {
        #[arg(long)]
        game: String,
        #[arg(long)]
        template: String,
        /// Report every non-overlapping match.
        #[arg(long)]
        all: bool,
        #[arg(long)]
        threshold: Option<f64>,
        #[command(flatten)]
        source: SourceArgs,
    },
    /// Extract text from the screen with tesseract.
    Ocr {
        /// Restrict to `x,y,width,height`.
        #[arg(long)]
        region: Option<Region>,
        #[arg(long)]
        lang: Option<String>,
        #[command(flatten)]
        source: SourceArgs,
    },
    /// Send a single input to the device.
    Input {
        #[command(subcommand)]
        action: InputAction,
        #[command(flatten)]
        device: DeviceArgs,
    },
}

#[derive(Args, Clone, Default)]
struct DeviceArgs {
    /// adb serial or host:port to bind.
    #[arg(long)]
    device: Option<String>,
    /// Emulator family to probe when no device is named.
    #[arg(long, value_enum)]
    emulator: Option<EmulatorKind>,
}

#[derive(Args)]
struct SourceArgs {
    /// Read the screen from an image file instead of the device.
    #[arg(long)]
    from: Option<PathBuf>,
    #[command(flatten)]
    device: DeviceArgs,
}

#[derive(Subcommand)]
enum InputAction {
    Tap {
        x: i32,
        y: i32,
    },
    Swipe {
        x1: i32,
        y1: i32,
        x2: i32,
        y2: i32,
        /// Gesture duration in milliseconds.
        #[arg(long, default_value_t = 300)]
        duration: u64,
    },
    Text {
        text: String,
    },
    Key {
        /// Android keycode, numeric or `KEYCODE_*`.
        key: String,
    },
    /// Print the screen size.
    Size,
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let config_path = cli.config;
    let load = || load_config(&config_path);
    match cli.command {
        Command::Init { force } => cmd_init(&config_path, force),
        Command::Validate { game } => cmd_validate(&load()?, game.as_deref()),
        Command::Tasks { game } => cmd_tasks(&load()?, &game),
        Command::Run {
            game,
            task,
            repeat,
            forever,
            device,
            yes,
        } => {
            let mode = match (forever, repeat) {
                (true, _) => RepeatMode::Forever,
                (false, Some(n)) => RepeatMode::Times(n),
                (false, None) => RepeatMode::Once,
            };
            cmd_run(&load()?, &game, &task, mode, &device, yes)
        }
        Command::Devices => cmd_devices(&load()?),
        Command::Capture { out, device } => {
            let cfg = load()?;
            let session = connect(&cfg, &device)?;
            let frame = capture(&session)?;
            frame.save(&out)?;
            println!("{}", out.display());
            Ok(exit_codes::OK)
        }
        Command::Template {
            game,
            name,
            x,
            y,
            width,
            height,
            source,
        } => {
            let cfg = load()?;
            let game = load_named_game(&cfg, &game)?;
            let frame = screen(&cfg, &source)?;
            let store = TemplateStore::new(&cfg.paths.templates_dir, &game.name);
            let path = store.save_template(&frame, Region::new(x, y, width, height), &name)?;
            println!("{}", path.display());
            Ok(exit_codes::OK)
        }
        Command::Find {
            game,
            template,
            all,
            threshold,
            source,
        } => {
            let cfg = load()?;
            let threshold = threshold.unwrap_or(cfg.matching.default_threshold);
            cmd_find(&cfg, &game, &template, all, threshold, &source)
        }
        Command::Ocr {
            region,
            lang,
            source,
        } => {
            let cfg = load()?;
            let frame = screen(&cfg, &source)?;
            let lang = lang.unwrap_or_else(|| cfg.ocr.lang.clone());
            let matcher = ImageMatcher::new().with_ocr(Tesseract::from_config(&cfg.ocr));
            println!("{}", matcher.extract_text(&frame, region, &lang));
            Ok(exit_codes::OK)
        }
        Command::Input { action, device } => cmd_input(&load()?, action, &device),
    }
}

fn cmd_init(config_path: &Path, force: bool) -> Result<i32> {
    let cfg = if !force && config_path.exists() {
        load_config(config_path)?
    } else {
        let cfg = PlayerConfig::default();
        write_config(config_path, &cfg)?;
        cfg
    };
    for dir in [
        &cfg.paths.games_dir,
        &cfg.paths.templates_dir,
        &cfg.paths.screenshots_dir,
    ] {
        std::fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    }
    let example = cfg.paths.games_dir.join("example.toml");
    if force || !example.exists() {
        write_game(&example, &example_game())?;
    }
    println!("{}", config_path.display());
    Ok(exit_codes::OK)
}

fn example_game() -> Game {
    let mut start = FindAndClick::new(["start_button.png"]);
    start.continue_if_not_found = true;
    let steps = vec![
        Step::named("Settle", Action::Wait { duration: 1.0 }),
        Step::named("Press start", Action::FindAndClick(start)),
        Step::named(
            "Confirm",
            Action::Notification {
                message: "Start pressed; continue?".to_string(),
            },
        ),
        Step::named("Record", Action::Screenshot { save_path: None }).optional(),
    ];
    let mut program = Program::new(steps);
    program.name = Some("Daily".to_string());
    Game {
        name: "Example".to_string(),
        description: "Starter game created by `player init`".to_string(),
        tasks: BTreeMap::from([("daily".to_string(), program)]),
    }
}

fn cmd_validate(cfg: &PlayerConfig, game: Option<&str>) -> Result<i32> {
    let paths = match game {
        Some(game) => vec![find_game(&cfg.paths.games_dir, game)?],
        None => list_games(&cfg.paths.games_dir)?,
    };
    let mut failures = 0usize;
    for path in &paths {
        let checked = std::fs::read_to_string(path)
            .with_context(|| format!("read {}", path.display()))
            .and_then(|contents| parse_game(&contents, GameFormat::from_path(path)));
        match checked {
            Ok(game) => {
                // Lint problems are warnings; only parse and schema errors fail.
                let problems = lint_game(&game);
                if problems.is_empty() {
                    println!("ok {}", path.display());
                } else {
                    println!("warning {}:\n- {}", path.display(), problems.join("\n- "));
                }
            }
            Err(err) => {
                failures += 1;
                println!("invalid {}: {:#}", path.display(), err);
            }
        }
    }
    Ok(if failures == 0 {
        exit_codes::OK
    } else {
        exit_codes::INVALID
    })
}

fn cmd_tasks(cfg: &PlayerConfig, game: &str) -> Result<i32> {
    let game = load_named_game(cfg, game)?;
    for (key, program) in &game.tasks {
        let title = program.name.as_deref().unwrap_or(key);
        println!("{key}\t{title}\t{} steps", program.len());
    }
    Ok(exit_codes::OK)
}

fn cmd_run(
    cfg: &PlayerConfig,
    game: &str,
    task: &str,
    mode: RepeatMode,
    device: &DeviceArgs,
    auto_continue: bool,
) -> Result<i32> {
    let game = load_named_game(cfg, game)?;
    if game.task(task).is_none() {
        let known: Vec<&str> = game.tasks.keys().map(String::as_str).collect();
        bail!(
            "task '{task}' not found in game '{}' (available: {})",
            game.name,
            known.join(", ")
        );
    }
    let session = connect(cfg, device)?;
    let templates = TemplateStore::new(&cfg.paths.templates_dir, &game.name);
    let (notifier, requests) = notification_channel(cfg.run.notification_timeout());
    let interpreter = Interpreter::new(session, game, templates, ImageMatcher::new())
        .with_settings(RunSettings::from_config(cfg))
        .with_notifier(notifier);

    let stop = interpreter.stop_handle();
    let delay = cfg.run.repeat_delay();
    let task = task.to_string();
    eprintln!("running '{task}'; type q and Enter to stop");
    let worker = thread::spawn(move || {
        run_repeated(&interpreter, &task, mode, delay, |iteration, report| {
            println!("iteration {iteration}: {}", describe(report));
        })
    });

    let (events, inbox) = mpsc::channel();
    operator::forward_requests(requests, events.clone());
    operator::spawn_line_reader(BufReader::new(std::io::stdin()), events);
    operator::serve(inbox, &stop, auto_continue, &mut std::io::stderr());

    let outcome = worker
        .join()
        .map_err(|_| anyhow!("run worker panicked"))?;
    Ok(loop_exit_code(&outcome))
}

fn describe(report: &RunReport) -> String {
    let secs = report.duration.as_secs_f64();
    match &report.outcome {
        RunOutcome::Completed => format!("completed in {secs:.1}s"),
        RunOutcome::Halted { step } => format!("halted at step {step} in {secs:.1}s"),
        RunOutcome::Cancelled { step } => format!("cancelled at step {step}"),
        RunOutcome::UserStopped { step } => format!("stopped by operator at step {step}"),
        RunOutcome::Failed { reason, .. } => format!("failed: {reason}"),
    }
}

fn loop_exit_code(outcome: &LoopOutcome) -> i32 {
    match outcome.stop {
        LoopStop::Cancelled | LoopStop::UserStopped { .. } => exit_codes::STOPPED,
        LoopStop::Finished | LoopStop::ForceStopped { .. } => {
            if outcome.all_succeeded() {
                exit_codes::OK
            } else {
                exit_codes::TASK_FAILED
            }
        }
    }
}

fn cmd_devices(cfg: &PlayerConfig) -> Result<i32> {
    let session = AdbSession::from_config(&cfg.adb);
    if !session.check_available() {
        bail!("adb not available at {}", session.adb_path().display());
    }
    for endpoint in session.list_endpoints() {
        println!("{endpoint}");
    }
    Ok(exit_codes::OK)
}

fn cmd_find(
    cfg: &PlayerConfig,
    game: &str,
    template: &str,
    all: bool,
    threshold: f64,
    source: &SourceArgs,
) -> Result<i32> {
    let game = load_named_game(cfg, game)?;
    let path = TemplateStore::new(&cfg.paths.templates_dir, &game.name).resolve(template)?;
    let frame = screen(cfg, source)?;
    let matcher = ImageMatcher::new();
    let found = if all {
        matcher.find_all(&frame, &path, threshold)
    } else {
        matcher.find_best(&frame, &path, threshold).into_iter().collect()
    };
    for m in &found {
        println!("{}\t{:.4}", m.center, m.score);
    }
    Ok(if found.is_empty() {
        exit_codes::TASK_FAILED
    } else {
        exit_codes::OK
    })
}

fn cmd_input(cfg: &PlayerConfig, action: InputAction, device: &DeviceArgs) -> Result<i32> {
    let session = connect(cfg, device)?;
    let ok = match action {
        InputAction::Tap { x, y } => session.tap(Point::new(x, y)),
        InputAction::Swipe {
            x1,
            y1,
            x2,
            y2,
            duration,
        } => session.swipe(Point::new(x1, y1), Point::new(x2, y2), duration),
        InputAction::Text { text } => session.input_text(&text),
        InputAction::Key { key } => session.press_key(&key),
        InputAction::Size => match session.screen_size() {
            Some((w, h)) => {
                println!("{w}x{h}");
                true
            }
            None => false,
        },
    };
    Ok(if ok {
        exit_codes::OK
    } else {
        exit_codes::TASK_FAILED
    })
}

fn load_named_game(cfg: &PlayerConfig, game: &str) -> Result<Game> {
    load_game(&find_game(&cfg.paths.games_dir, game)?)
}

fn connect(cfg: &PlayerConfig, args: &DeviceArgs) -> Result<AdbSession> {
    let mut session = AdbSession::from_config(&cfg.adb);
    let hint = match &args.device {
        Some(id) => ConnectHint::Device(id.clone()),
        None => ConnectHint::Emulator(args.emulator.unwrap_or(cfg.adb.emulator)),
    };
    if !session.connect(&hint) {
        bail!("could not connect to a device ({hint:?})");
    }
    Ok(session)
}

fn capture(session: &AdbSession) -> Result<Frame> {
    session.capture().context("capture screen")
}

/// The screen from `--from`, or a fresh device capture.
fn screen(cfg: &PlayerConfig, source: &SourceArgs) -> Result<Frame> {
    match &source.from {
        Some(path) => Frame::open(path),
        None => capture(&connect(cfg, &source.device)?),
    }
}
