//! Repeated runs of one task for `player run --repeat/--forever`.

use std::thread;
use std::time::{Duration, Instant};

use tracing::info;

use crate::interpreter::{Interpreter, RunOutcome, RunReport};
use crate::io::device::Device;
use crate::stop::StopHandle;

const DELAY_SLICE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatMode {
    Once,
    Times(u32),
    Forever,
}

impl RepeatMode {
    fn allows(self, iteration: u32) -> bool {
        match self {
            RepeatMode::Once => iteration < 1,
            RepeatMode::Times(n) => iteration < n,
            RepeatMode::Forever => true,
        }
    }
}

/// Reason why `run_repeated` stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopStop {
    /// Every requested iteration ran.
    Finished,
    /// An external stop request ended the loop.
    Cancelled,
    /// A stop step ran in the given 1-based iteration.
    ForceStopped { iteration: u32 },
    /// The operator chose "stop" at a notification in the given iteration.
    UserStopped { iteration: u32 },
}

/// Summary of a repeat invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    pub iterations: u32,
    pub successes: u32,
    pub stop: LoopStop,
}

impl LoopOutcome {
    pub fn all_succeeded(&self) -> bool {
        self.iterations > 0 && self.successes == self.iterations
    }
}

/// Run `task` according to `mode`, calling `on_iteration` after each run.
///
/// The stop handle is cleared once up front. Failed iterations do not end the
/// loop; a stop step, an operator stop, or an external stop does.
pub fn run_repeated<D, F>(
    interpreter: &Interpreter<D>,
    task: &str,
    mode: RepeatMode,
    delay: Duration,
    mut on_iteration: F,
) -> LoopOutcome
where
    D: Device,
    F: FnMut(u32, &RunReport),
{
    let stop = interpreter.stop_handle();
    stop.clear();

    let mut iterations = 0u32;
    let mut successes = 0u32;
    while mode.allows(iterations) {
        if iterations > 0 {
            pause_unless_stopped(&stop, delay);
        }
        if stop.is_requested() {
            return LoopOutcome {
                iterations,
                successes,
                stop: LoopStop::Cancelled,
            };
        }

        iterations += 1;
        info!(iteration = iterations, task, "starting iteration");
        let report = interpreter.run_task(task);
        if report.succeeded() {
            successes += 1;
        }
        on_iteration(iterations, &report);

        let stopped = if report.force_stop {
            Some(LoopStop::ForceStopped {
                iteration: iterations,
            })
        } else if report.user_requested_stop {
            Some(LoopStop::UserStopped {
                iteration: iterations,
            })
        } else if matches!(report.outcome, RunOutcome::Cancelled { .. }) {
            Some(LoopStop::Cancelled)
        } else {
            None
        };
        if let Some(stop) = stopped {
            return LoopOutcome {
                iterations,
                successes,
                stop,
            };
        }
    }

    LoopOutcome {
        iterations,
        successes,
        stop: LoopStop::Finished,
    }
}

fn pause_unless_stopped(stop: &StopHandle, delay: Duration) {
    let deadline = Instant::now() + delay;
    while !stop.is_requested() {
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        thread::sleep((deadline - now).min(DELAY_SLICE));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::ImageMatcher;
    use crate::program::{Action, Game, Program, Step};
    use crate::test_support::{ScriptedDevice, TestAssets};

    fn interpreter(assets: &TestAssets, steps: Vec<Step>) -> Interpreter<ScriptedDevice> {
        let mut game = Game {
            name: "loop".to_string(),
            description: String::new(),
            tasks: Default::default(),
        };
        game.tasks.insert("t".to_string(), Program::new(steps));
        let store = assets.store(&game.name);
        Interpreter::new(ScriptedDevice::new(), game, store, ImageMatcher::new())
            .with_settings(assets.settings())
    }

    fn tap() -> Step {
        Step::new(Action::Click {
            x: Some(1),
            y: Some(2),
            delay: 0.0,
        })
    }

    #[test]
    fn times_runs_every_iteration_even_after_failures() {
        let assets = TestAssets::new();
        let failing = Step::new(Action::Click {
            x: None,
            y: None,
            delay: 0.0,
        });
        let interp = interpreter(&assets, vec![failing]);
        let mut seen = Vec::new();
        let outcome = run_repeated(&interp, "t", RepeatMode::Times(3), Duration::ZERO, |i, r| {
            seen.push((i, r.succeeded()));
        });
        assert_eq!(
            outcome,
            LoopOutcome {
                iterations: 3,
                successes: 0,
                stop: LoopStop::Finished
            }
        );
        assert_eq!(seen, vec![(1, false), (2, false), (3, false)]);
    }

    #[test]
    fn stop_step_ends_repetition() {
        let assets = TestAssets::new();
        let interp = interpreter(&assets, vec![tap(), Step::new(Action::StopTask { message: None })]);
        let outcome = run_repeated(&interp, "t", RepeatMode::Forever, Duration::ZERO, |_, _| {});
        assert_eq!(outcome.stop, LoopStop::ForceStopped { iteration: 1 });
        assert!(outcome.all_succeeded());
        assert_eq!(interp.device().taps().len(), 1);
    }

    #[test]
    fn stale_stop_request_is_cleared_before_first_iteration() {
        let assets = TestAssets::new();
        let interp = interpreter(&assets, vec![tap()]);
        interp.stop();
        let outcome = run_repeated(&interp, "t", RepeatMode::Once, Duration::ZERO, |_, _| {});
        assert_eq!(outcome.stop, LoopStop::Finished);
        assert_eq!(outcome.successes, 1);
    }

    #[test]
    fn stop_during_delay_cancels_loop() {
        let assets = TestAssets::new();
        let interp = interpreter(&assets, vec![tap()]);
        let stop = interp.stop_handle();
        let outcome = run_repeated(
            &interp,
            "t",
            RepeatMode::Forever,
            Duration::from_secs(30),
            |_, _| stop.stop(),
        );
        assert_eq!(
            outcome,
            LoopOutcome {
                iterations: 1,
                successes: 1,
                stop: LoopStop::Cancelled
            }
        );
    }
}
