//! Per-run cursor and control flags for the step interpreter.
//!
//! One `ExecutionState` is created per task run and owned by it; nothing here
//! is shared between runs.

/// How the cursor moved after a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// Plain advance by one.
    Next(usize),
    /// A scheduled jump inside `[1, step_count]` was taken.
    Jumped(usize),
    /// A scheduled jump was out of range and discarded; the cursor advanced by one.
    InvalidJump { target: usize, next: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionState {
    running: bool,
    cursor: usize,
    pending_jump: Option<usize>,
    force_stop: bool,
    user_requested_stop: bool,
}

impl Default for ExecutionState {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionState {
    pub fn new() -> Self {
        Self {
            running: true,
            cursor: 1,
            pending_jump: None,
            force_stop: false,
            user_requested_stop: false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// 1-based index of the step about to run.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn pending_jump(&self) -> Option<usize> {
        self.pending_jump
    }

    pub fn force_stopped(&self) -> bool {
        self.force_stop
    }

    pub fn user_requested_stop(&self) -> bool {
        self.user_requested_stop
    }

    /// True once the cursor has moved past the last step.
    pub fn is_finished(&self, step_count: usize) -> bool {
        self.cursor > step_count
    }

    /// Start the step at the cursor: any jump left over from a previous step is dropped.
    pub fn begin_step(&mut self) -> usize {
        self.pending_jump = None;
        self.cursor
    }

    /// Request that the next step be `target` (1-based). Validated on [`advance`](Self::advance).
    pub fn schedule_jump(&mut self, target: usize) {
        self.pending_jump = Some(target);
    }

    /// Stop the run at the next step boundary.
    pub fn cancel(&mut self) {
        self.running = false;
    }

    /// Deliberate halt from a stop step; outer repeat loops must end too.
    pub fn force_stop(&mut self) {
        self.force_stop = true;
        self.running = false;
    }

    /// The operator declined to continue at a notification.
    pub fn user_stop(&mut self) {
        self.user_requested_stop = true;
        self.running = false;
    }

    /// Move the cursor after a step that did not abort the run.
    pub fn advance(&mut self, step_count: usize) -> Advance {
        let next = self.cursor + 1;
        match self.pending_jump.take() {
            Some(target) if (1..=step_count).contains(&target) => {
                self.cursor = target;
                Advance::Jumped(target)
            }
            Some(target) => {
                self.cursor = next;
                Advance::InvalidJump { target, next }
            }
            None => {
                self.cursor = next;
                Advance::Next(next)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_state_starts_running_at_step_one() {
        let state = ExecutionState::new();
        assert!(state.is_running());
        assert_eq!(state.cursor(), 1);
        assert!(!state.force_stopped());
        assert!(!state.user_requested_stop());
    }

    #[test]
    fn in_range_jump_moves_cursor() {
        let mut state = ExecutionState::new();
        state.begin_step();
        state.schedule_jump(3);
        assert_eq!(state.advance(3), Advance::Jumped(3));
        assert_eq!(state.cursor(), 3);
        assert_eq!(state.pending_jump(), None);
    }

    #[test]
    fn out_of_range_jumps_behave_like_plain_advance() {
        for target in [0, 4, 100] {
            let mut jumped = ExecutionState::new();
            jumped.begin_step();
            jumped.schedule_jump(target);
            let outcome = jumped.advance(3);

            let mut plain = ExecutionState::new();
            plain.begin_step();
            plain.advance(3);

            assert_eq!(outcome, Advance::InvalidJump { target, next: 2 });
            assert_eq!(jumped, plain);
        }
    }

    #[test]
    fn begin_step_clears_stale_jump() {
        let mut state = ExecutionState::new();
        state.schedule_jump(2);
        state.begin_step();
        assert_eq!(state.advance(5), Advance::Next(2));
    }

    #[test]
    fn stops_are_distinguishable() {
        let mut forced = ExecutionState::new();
        forced.force_stop();
        assert!(!forced.is_running());
        assert!(forced.force_stopped());
        assert!(!forced.user_requested_stop());

        let mut user = ExecutionState::new();
        user.user_stop();
        assert!(!user.is_running());
        assert!(user.user_requested_stop());
        assert!(!user.force_stopped());

        let mut cancelled = ExecutionState::new();
        cancelled.cancel();
        assert!(!cancelled.is_running());
        assert!(!cancelled.force_stopped() && !cancelled.user_requested_stop());
    }

    #[test]
    fn finishes_past_last_step() {
        let mut state = ExecutionState::new();
        assert!(!state.is_finished(1));
        state.begin_step();
        state.advance(1);
        assert!(state.is_finished(1));
        assert!(ExecutionState::new().is_finished(0));
    }
}
