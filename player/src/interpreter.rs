//! Step interpreter: runs one task program against a device.
//!
//! A run walks a 1-based cursor over the task's steps. Handlers report `true`
//! (step succeeded) or `false` (step failed); a failed required step ends the
//! run. Handlers may schedule a jump, which is taken only when it names an
//! existing step. Cursor and flags live in a per-run [`ExecutionState`].
//!
//! Handler `Err`s are unexpected faults: they are logged with context at the
//! run boundary and fail the run without unwinding further.

use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::{error, info, info_span, warn};

use crate::core::sanitize::sanitize_filename;
use crate::core::state::{Advance, ExecutionState};
use crate::core::types::Point;
use crate::io::config::PlayerConfig;
use crate::io::device::{Device, Frame};
use crate::io::templates::TemplateStore;
use crate::matcher::{DEFAULT_POLL_INTERVAL, ImageMatcher};
use crate::notify::Notifier;
use crate::program::{Action, FindAndClick, Game, Program, Step};
use crate::stop::StopHandle;

/// Longest uninterrupted sleep while stop checks are enabled.
const PAUSE_SLICE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct RunSettings {
    pub screenshots_dir: PathBuf,
    pub poll_interval: Duration,
    /// Observe stop requests inside waits and template polls, not only between steps.
    pub cancel_during_polls: bool,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            screenshots_dir: PathBuf::from("screenshots"),
            poll_interval: DEFAULT_POLL_INTERVAL,
            cancel_during_polls: true,
        }
    }
}

impl RunSettings {
    pub fn from_config(cfg: &PlayerConfig) -> Self {
        Self {
            screenshots_dir: cfg.paths.screenshots_dir.clone(),
            poll_interval: cfg.matching.poll_interval(),
            cancel_during_polls: cfg.run.cancel_during_polls,
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The cursor moved past the last step.
    Completed,
    /// A stop step ended the run deliberately.
    Halted { step: usize },
    /// An external stop request was observed.
    Cancelled { step: usize },
    /// The operator chose "stop" at a notification.
    UserStopped { step: usize },
    /// A required step failed, the task is unknown, or a handler faulted.
    Failed { step: Option<usize>, reason: String },
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub task: String,
    pub outcome: RunOutcome,
    /// Step indices in the order they were started.
    pub trace: Vec<usize>,
    pub force_stop: bool,
    pub user_requested_stop: bool,
    pub duration: Duration,
}

impl RunReport {
    /// Completed, or halted by a stop step.
    pub fn succeeded(&self) -> bool {
        matches!(
            self.outcome,
            RunOutcome::Completed | RunOutcome::Halted { .. }
        )
    }

    /// Outer repeat loops must not start another iteration.
    pub fn ends_repetition(&self) -> bool {
        self.force_stop
            || self.user_requested_stop
            || matches!(self.outcome, RunOutcome::Cancelled { .. })
    }
}

pub struct Interpreter<D: Device> {
    device: D,
    game: Game,
    templates: TemplateStore,
    matcher: ImageMatcher,
    settings: RunSettings,
    notifier: Option<Box<dyn Notifier>>,
    stop: StopHandle,
}

impl<D: Device> Interpreter<D> {
    pub fn new(device: D, game: Game, templates: TemplateStore, matcher: ImageMatcher) -> Self {
        Self {
            device,
            game,
            templates,
            matcher,
            settings: RunSettings::default(),
            notifier: None,
            stop: StopHandle::new(),
        }
    }

    pub fn with_settings(mut self, settings: RunSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_notifier(mut self, notifier: impl Notifier + 'static) -> Self {
        self.notifier = Some(Box::new(notifier));
        self
    }

    /// Share the stop flag with another thread.
    pub fn with_stop_handle(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Ask the current run to halt at the next step boundary.
    pub fn stop(&self) {
        info!("stop requested");
        self.stop.stop();
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn game(&self) -> &Game {
        &self.game
    }

    /// Run the task keyed `task`.
    ///
    /// A stop request made before the call is honored immediately; callers
    /// that want a fresh run clear the handle first.
    pub fn run_task(&self, task: &str) -> RunReport {
        let span = info_span!("run_task", game = %self.game.name, task);
        let _guard = span.enter();
        let started = Instant::now();
        let mut state = ExecutionState::new();
        let mut trace = Vec::new();

        let outcome = match self.game.task(task) {
            Some(program) => {
                info!(steps = program.len(), "starting task");
                self.run_program(task, program, &mut state, &mut trace)
            }
            None => {
                error!("task not found");
                RunOutcome::Failed {
                    step: None,
                    reason: format!("task '{task}' not found in game '{}'", self.game.name),
                }
            }
        };

        match &outcome {
            RunOutcome::Completed => info!("task completed"),
            RunOutcome::Halted { step } => info!(step, "task halted by stop step"),
            RunOutcome::Cancelled { step } => info!(step, "task cancelled"),
            RunOutcome::UserStopped { step } => info!(step, "task stopped at operator request"),
            RunOutcome::Failed { step, reason } => error!(step = ?step, "task failed: {reason}"),
        }

        RunReport {
            task: task.to_string(),
            outcome,
            trace,
            force_stop: state.force_stopped(),
            user_requested_stop: state.user_requested_stop(),
            duration: started.elapsed(),
        }
    }

    fn run_program(
        &self,
        task: &str,
        program: &Program,
        state: &mut ExecutionState,
        trace: &mut Vec<usize>,
    ) -> RunOutcome {
        let count = program.len();
        while !state.is_finished(count) {
            if self.stop.is_requested() {
                state.cancel();
            }
            if !state.is_running() {
                return RunOutcome::Cancelled {
                    step: state.cursor(),
                };
            }

            let index = state.begin_step();
            let Some(step) = program.step(index) else {
                break;
            };
            trace.push(index);
            let name = step.display_name();
            info!(step = index, name, kind = step.action.kind(), "running step");

            let ok = match self.execute_step(task, step, state) {
                Ok(ok) => ok,
                Err(err) => {
                    error!(step = index, name, err = %format!("{err:#}"), "step raised an unexpected error");
                    return RunOutcome::Failed {
                        step: Some(index),
                        reason: format!("step {index} ({name}): {err:#}"),
                    };
                }
            };

            if state.force_stopped() {
                return RunOutcome::Halted { step: index };
            }
            if state.user_requested_stop() {
                return RunOutcome::UserStopped { step: index };
            }
            if self.stop.is_requested() {
                state.cancel();
                return RunOutcome::Cancelled { step: index };
            }
            if !ok {
                if step.required {
                    warn!(step = index, name, "required step failed");
                    return RunOutcome::Failed {
                        step: Some(index),
                        reason: format!("required step {index} ({name}) failed"),
                    };
                }
                warn!(step = index, name, "optional step failed; continuing");
            }

            match state.advance(count) {
                Advance::Next(_) => {}
                Advance::Jumped(target) => info!(from = index, target, "jumping"),
                Advance::InvalidJump { target, next } => warn!(
                    from = index,
                    target,
                    next,
                    "jump target out of range; continuing with next step"
                ),
            }
        }
        RunOutcome::Completed
    }

    fn execute_step(&self, task: &str, step: &Step, state: &mut ExecutionState) -> Result<bool> {
        match &step.action {
            Action::Wait { duration } => {
                self.pause(*duration);
                Ok(true)
            }
            Action::Click { x, y, delay } => {
                let (Some(x), Some(y)) = (*x, *y) else {
                    error!("click step is missing x or y");
                    return Ok(false);
                };
                self.tap(Point::new(x, y));
                self.pause(*delay);
                Ok(true)
            }
            Action::Swipe {
                x1,
                y1,
                x2,
                y2,
                duration,
                delay,
            } => {
                let (Some(x1), Some(y1), Some(x2), Some(y2)) = (*x1, *y1, *x2, *y2) else {
                    error!("swipe step is missing a coordinate");
                    return Ok(false);
                };
                let (from, to) = (Point::new(x1, y1), Point::new(x2, y2));
                if !self.device.swipe(from, to, *duration) {
                    warn!(%from, %to, "swipe not acknowledged by device");
                }
                self.pause(*delay);
                Ok(true)
            }
            Action::WaitForTemplate {
                template,
                timeout,
                threshold,
            } => Ok(self.wait_template(template.as_deref(), *timeout, *threshold)),
            Action::FindAndClick(find) => Ok(self.find_and_click(find, state)),
            Action::Screenshot { save_path } => self.screenshot(task, save_path.as_deref()),
            Action::Notification { message } => Ok(self.notification(message, step, state)),
            Action::StopTask { message } => {
                match message {
                    Some(message) => info!("stop step: {message}"),
                    None => info!("stop step reached"),
                }
                state.force_stop();
                Ok(true)
            }
        }
    }

    fn wait_template(&self, template: Option<&str>, timeout: f64, threshold: f64) -> bool {
        let Some(name) = template.filter(|t| !t.trim().is_empty()) else {
            error!("wait_template step has no template");
            return false;
        };
        let path = match self.templates.resolve(name) {
            Ok(path) => path,
            Err(err) => {
                error!(%err, "template unavailable");
                return false;
            }
        };
        match self.wait_for(&path, secs(timeout), threshold) {
            Some(found) => {
                info!(template = name, center = %found, "template appeared");
                true
            }
            None => {
                warn!(template = name, timeout, "template did not appear");
                false
            }
        }
    }

    fn find_and_click(&self, find: &FindAndClick, state: &mut ExecutionState) -> bool {
        let mut candidates: Vec<(&str, PathBuf)> = Vec::new();
        for name in &find.templates {
            match self.templates.resolve(name) {
                Ok(path) => candidates.push((name.as_str(), path)),
                Err(err) => error!(%err, "template unavailable"),
            }
        }
        if candidates.is_empty() {
            if find.templates.is_empty() {
                error!("find_and_click step has no templates");
            }
            return self.not_found(find, state);
        }

        let hit = if find.click_all {
            let Some(frame) = self.capture() else {
                error!("find_and_click could not capture the screen");
                return false;
            };
            candidates.iter().find_map(|(name, path)| {
                let points: Vec<Point> = self
                    .matcher
                    .find_all(&frame, path, find.threshold)
                    .iter()
                    .map(|m| m.center)
                    .collect();
                (!points.is_empty()).then_some((*name, points))
            })
        } else {
            let per_candidate = secs(find.timeout / candidates.len() as f64);
            candidates.iter().find_map(|(name, path)| {
                if self.stop.is_requested() {
                    return None;
                }
                self.wait_for(path, per_candidate, find.threshold)
                    .map(|found| (*name, vec![found]))
            })
        };

        let Some((name, points)) = hit else {
            let names: Vec<&str> = candidates.iter().map(|(n, _)| *n).collect();
            warn!(templates = ?names, "no template found on screen");
            return self.not_found(find, state);
        };

        info!(template = name, count = points.len(), "template found");
        for (i, point) in points.iter().enumerate() {
            info!(template = name, at = %point, "clicking {}/{}", i + 1, points.len());
            self.tap(*point);
            self.pause(find.delay);
        }
        if let Some(target) = jump_target(find.goto_step_if_found) {
            state.schedule_jump(target);
        }
        true
    }

    /// Shared not-found branch: a jump target or `continue_if_not_found` turns
    /// the absence into a handled success.
    fn not_found(&self, find: &FindAndClick, state: &mut ExecutionState) -> bool {
        if let Some(target) = jump_target(find.goto_step_if_not_found) {
            info!(target, "not found; jump scheduled");
            state.schedule_jump(target);
            return true;
        }
        if find.continue_if_not_found {
            info!("not found; continuing");
            return true;
        }
        false
    }

    fn screenshot(&self, task: &str, save_path: Option<&Path>) -> Result<bool> {
        let path = match save_path {
            Some(path) => path.to_path_buf(),
            None => default_screenshot_path(&self.settings.screenshots_dir, &self.game.name, task),
        };
        let Some(frame) = self.capture() else {
            error!("screenshot step could not capture the screen");
            return Ok(false);
        };
        if let Err(err) = frame.save(&path) {
            error!(path = %path.display(), err = %format!("{err:#}"), "could not save screenshot");
            return Ok(false);
        }
        info!(path = %path.display(), "screenshot saved");
        Ok(true)
    }

    fn notification(&self, message: &str, step: &Step, state: &mut ExecutionState) -> bool {
        let step_name = step.name.as_deref().unwrap_or("Notification");
        let Some(notifier) = &self.notifier else {
            warn!(step = step_name, "notification: {message} (no handler attached; continuing)");
            return true;
        };
        info!(step = step_name, "notification: {message}");
        if notifier.notify(message, step_name) {
            info!(step = step_name, "operator chose to continue");
            true
        } else {
            info!(step = step_name, "operator chose to stop");
            state.user_stop();
            false
        }
    }

    fn wait_for(&self, path: &Path, timeout: Duration, threshold: f64) -> Option<Point> {
        let stop = self.settings.cancel_during_polls.then_some(&self.stop);
        self.matcher
            .wait_for(
                || self.capture(),
                path,
                timeout,
                self.settings.poll_interval,
                threshold,
                stop,
            )
            .map(|found| found.center)
    }

    fn capture(&self) -> Option<Frame> {
        match self.device.capture() {
            Ok(frame) => Some(frame),
            Err(err) => {
                warn!(%err, not_connected = err.is_not_connected(), "capture failed");
                None
            }
        }
    }

    fn tap(&self, at: Point) {
        if !self.device.tap(at) {
            warn!(%at, "tap not acknowledged by device");
        }
    }

    fn pause(&self, seconds: f64) {
        let total = secs(seconds);
        if !self.settings.cancel_during_polls {
            thread::sleep(total);
            return;
        }
        let deadline = Instant::now() + total;
        loop {
            if self.stop.is_requested() {
                return;
            }
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            thread::sleep((deadline - now).min(PAUSE_SLICE));
        }
    }
}

/// `<screenshots>/<game>/<task>/screenshot_<YYYYmmdd_HHMMSS>.png`, names sanitized.
pub fn default_screenshot_path(screenshots_dir: &Path, game: &str, task: &str) -> PathBuf {
    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let task = if task.trim().is_empty() { "unknown" } else { task };
    screenshots_dir
        .join(sanitize_filename(game))
        .join(sanitize_filename(task))
        .join(format!("screenshot_{timestamp}.png"))
}

/// Step numbers start at 1; a target of 0 is the same as no target.
fn jump_target(target: Option<usize>) -> Option<usize> {
    target.filter(|&t| t > 0)
}

/// Negative or non-finite seconds become zero.
fn secs(seconds: f64) -> Duration {
    Duration::try_from_secs_f64(seconds).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::AutoContinue;
    use crate::test_support::{DeviceAction, ScriptedDevice, TestAssets, blank_frame};

    fn game_with(steps: Vec<Step>) -> Game {
        let mut game = Game {
            name: "Đế Chế 2 Việt".to_string(),
            description: String::new(),
            tasks: Default::default(),
        };
        game.tasks.insert("Daily Run".to_string(), Program::new(steps));
        game
    }

    fn interpreter(device: ScriptedDevice, assets: &TestAssets, steps: Vec<Step>) -> Interpreter<ScriptedDevice> {
        let game = game_with(steps);
        let store = assets.store(&game.name);
        Interpreter::new(device, game, store, ImageMatcher::new()).with_settings(assets.settings())
    }

    #[test]
    fn click_without_coordinates_fails_required_step() {
        let assets = TestAssets::new();
        let device = ScriptedDevice::new();
        let run = interpreter(
            device.clone(),
            &assets,
            vec![
                Step::new(Action::Click {
                    x: Some(5),
                    y: None,
                    delay: 0.0,
                }),
                Step::new(Action::Wait { duration: 0.0 }),
            ],
        )
        .run_task("Daily Run");
        assert_eq!(
            run.outcome,
            RunOutcome::Failed {
                step: Some(1),
                reason: "required step 1 (click) failed".to_string()
            }
        );
        assert_eq!(run.trace, vec![1]);
        assert!(device.actions().is_empty());
    }

    #[test]
    fn optional_failure_continues() {
        let assets = TestAssets::new();
        let device = ScriptedDevice::new();
        let run = interpreter(
            device.clone(),
            &assets,
            vec![
                Step::new(Action::Swipe {
                    x1: None,
                    y1: Some(1),
                    x2: Some(2),
                    y2: Some(3),
                    duration: 300,
                    delay: 0.0,
                })
                .optional(),
                Step::new(Action::Click {
                    x: Some(10),
                    y: Some(20),
                    delay: 0.0,
                }),
            ],
        )
        .run_task("Daily Run");
        assert!(run.succeeded());
        assert_eq!(run.trace, vec![1, 2]);
        assert_eq!(device.actions(), vec![DeviceAction::Tap(Point::new(10, 20))]);
    }

    #[test]
    fn unacknowledged_tap_still_succeeds() {
        let assets = TestAssets::new();
        let device = ScriptedDevice::new();
        device.fail_taps();
        let run = interpreter(
            device,
            &assets,
            vec![Step::new(Action::Click {
                x: Some(1),
                y: Some(1),
                delay: 0.0,
            })],
        )
        .run_task("Daily Run");
        assert_eq!(run.outcome, RunOutcome::Completed);
    }

    #[test]
    fn unknown_task_fails_without_running_steps() {
        let assets = TestAssets::new();
        let run = interpreter(ScriptedDevice::new(), &assets, Vec::new()).run_task("missing");
        assert!(matches!(run.outcome, RunOutcome::Failed { step: None, .. }));
        assert!(run.trace.is_empty());
    }

    #[test]
    fn screenshot_defaults_to_sanitized_game_and_task_dirs() {
        let assets = TestAssets::new();
        let device = ScriptedDevice::with_frame(Frame::new(blank_frame(6, 4, [9, 9, 9])));
        let run = interpreter(
            device,
            &assets,
            vec![Step::new(Action::Screenshot { save_path: None })],
        )
        .run_task("Daily Run");
        assert!(run.succeeded());

        let dir = assets.screenshots.join("De_Che_2_Viet").join("Daily_Run");
        let files: Vec<_> = std::fs::read_dir(&dir)
            .expect("screenshot dir")
            .map(|e| e.expect("entry").file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(files.len(), 1);
        assert!(files[0].starts_with("screenshot_") && files[0].ends_with(".png"));
    }

    #[test]
    fn screenshot_fails_when_capture_fails() {
        let assets = TestAssets::new();
        let target = assets.screenshots.join("explicit.png");
        let run = interpreter(
            ScriptedDevice::disconnected(),
            &assets,
            vec![Step::new(Action::Screenshot {
                save_path: Some(target.clone()),
            })],
        )
        .run_task("Daily Run");
        assert!(!run.succeeded());
        assert!(!target.exists());
    }

    #[test]
    fn notification_without_handler_or_with_auto_continue_proceeds() {
        let assets = TestAssets::new();
        let steps = vec![Step::new(Action::Notification {
            message: "hi".to_string(),
        })];
        let bare = interpreter(ScriptedDevice::new(), &assets, steps.clone()).run_task("Daily Run");
        assert!(bare.succeeded());
        let auto = interpreter(ScriptedDevice::new(), &assets, steps)
            .with_notifier(AutoContinue)
            .run_task("Daily Run");
        assert!(auto.succeeded());
        assert!(!auto.user_requested_stop);
    }

    #[test]
    fn pending_stop_cancels_before_first_step() {
        let assets = TestAssets::new();
        let run = interpreter(
            ScriptedDevice::new(),
            &assets,
            vec![Step::new(Action::Wait { duration: 0.0 })],
        );
        run.stop();
        let report = run.run_task("Daily Run");
        assert_eq!(report.outcome, RunOutcome::Cancelled { step: 1 });
        assert!(!report.succeeded());
        assert!(report.ends_repetition());
        assert!(report.trace.is_empty());
    }

    #[test]
    fn secs_clamps_invalid_durations() {
        assert_eq!(secs(-1.0), Duration::ZERO);
        assert_eq!(secs(f64::NAN), Duration::ZERO);
        assert_eq!(secs(0.25), Duration::from_millis(250));
    }
}
