//! Semantic checks on programs that a JSON Schema cannot express.

use crate::program::{Action, Game, Program};

/// Check one task program:
/// - jump targets lie within `[1, steps]`
/// - clicks and swipes carry all coordinates
/// - template steps name at least one template
/// - thresholds lie in `(0, 1]`
/// - durations and timeouts are non-negative
///
/// Problems are reported, not enforced: the interpreter tolerates every one of
/// them at run time (a bad jump is ignored, a click without coordinates fails).
pub fn lint_program(program: &Program) -> Vec<String> {
    let mut errors = Vec::new();
    let count = program.len();
    for (i, step) in program.steps.iter().enumerate() {
        let at = format!("step {} ({})", i + 1, step.display_name());
        match &step.action {
            Action::Wait { duration } => check_non_negative(&at, "duration", *duration, &mut errors),
            Action::Click { x, y, delay } => {
                if x.is_none() || y.is_none() {
                    errors.push(format!("{at}: click needs both x and y"));
                }
                check_non_negative(&at, "delay", *delay, &mut errors);
            }
            Action::Swipe {
                x1,
                y1,
                x2,
                y2,
                delay,
                ..
            } => {
                if [x1, y1, x2, y2].iter().any(|c| c.is_none()) {
                    errors.push(format!("{at}: swipe needs x1, y1, x2 and y2"));
                }
                check_non_negative(&at, "delay", *delay, &mut errors);
            }
            Action::WaitForTemplate {
                template,
                timeout,
                threshold,
            } => {
                if template.as_deref().is_none_or(|t| t.trim().is_empty()) {
                    errors.push(format!("{at}: wait_template needs a template"));
                }
                check_threshold(&at, *threshold, &mut errors);
                check_non_negative(&at, "timeout", *timeout, &mut errors);
            }
            Action::FindAndClick(find) => {
                if find.templates.is_empty() {
                    errors.push(format!("{at}: find_and_click needs at least one template"));
                }
                check_threshold(&at, find.threshold, &mut errors);
                check_non_negative(&at, "timeout", find.timeout, &mut errors);
                check_non_negative(&at, "delay", find.delay, &mut errors);
                for (field, target) in [
                    ("goto_step_if_found", find.goto_step_if_found),
                    ("goto_step_if_not_found", find.goto_step_if_not_found),
                ] {
                    if let Some(target) = target
                        && !(1..=count).contains(&target)
                    {
                        errors.push(format!(
                            "{at}: {field} {target} is outside 1..={count} and will be ignored"
                        ));
                    }
                }
            }
            Action::Screenshot { .. } | Action::Notification { .. } | Action::StopTask { .. } => {}
        }
    }
    errors
}

/// Lint every task of a game, prefixing each problem with its task key.
pub fn lint_game(game: &Game) -> Vec<String> {
    let mut errors = Vec::new();
    for (key, program) in &game.tasks {
        if program.is_empty() {
            errors.push(format!("task '{key}': has no steps"));
        }
        errors.extend(
            lint_program(program)
                .into_iter()
                .map(|e| format!("task '{key}': {e}")),
        );
    }
    errors
}

fn check_threshold(at: &str, threshold: f64, errors: &mut Vec<String>) {
    if threshold.is_nan() || threshold <= 0.0 || threshold > 1.0 {
        errors.push(format!("{at}: threshold {threshold} is outside (0, 1]"));
    }
}

fn check_non_negative(at: &str, field: &str, value: f64, errors: &mut Vec<String>) {
    if value.is_nan() || value < 0.0 {
        errors.push(format!("{at}: {field} must be >= 0 (got {value})"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::{FindAndClick, Step};

    #[test]
    fn clean_program_has_no_problems() {
        let mut find = FindAndClick::new(["a.png"]);
        find.goto_step_if_not_found = Some(1);
        let program = Program::new(vec![
            Step::new(Action::Click {
                x: Some(1),
                y: Some(2),
                delay: 0.0,
            }),
            Step::new(Action::FindAndClick(find)),
        ]);
        assert!(lint_program(&program).is_empty());
    }

    #[test]
    fn reports_out_of_range_jumps_and_missing_fields() {
        let mut find = FindAndClick::new(Vec::<String>::new());
        find.goto_step_if_found = Some(0);
        find.goto_step_if_not_found = Some(3);
        find.threshold = 1.5;
        let program = Program::new(vec![
            Step::named(
                "tap",
                Action::Click {
                    x: Some(1),
                    y: None,
                    delay: 0.5,
                },
            ),
            Step::new(Action::FindAndClick(find)),
        ]);

        let errors = lint_program(&program);
        assert_eq!(errors.len(), 5, "{errors:#?}");
        assert!(errors[0].starts_with("step 1 (tap): click needs"));
        assert!(errors.iter().any(|e| e.contains("goto_step_if_found 0")));
        assert!(errors.iter().any(|e| e.contains("goto_step_if_not_found 3")));
        assert!(errors.iter().any(|e| e.contains("threshold 1.5")));
        assert!(errors.iter().any(|e| e.contains("at least one template")));
    }

    #[test]
    fn game_lint_prefixes_task_key() {
        let mut game = Game {
            name: "demo".to_string(),
            description: String::new(),
            tasks: Default::default(),
        };
        game.tasks.insert("empty".to_string(), Program::default());
        let errors = lint_game(&game);
        assert_eq!(errors, vec!["task 'empty': has no steps".to_string()]);
    }
}
