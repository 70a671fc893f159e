//! Retryable-task state machine
//!
//! [`RetryableTask`] wraps any exchange expressed as three steps (see
//! [`Retryable`]) and decides when to run each of them. It enforces the four
//! bounds of a [`RetryBudget`]: attempt count, total time, time per attempt
//! and the minimum spacing between attempts.
//!
//! # State transitions
//!
//! ```text
//! NotStarted -> InProgress -> Failure | AttemptTimeOut -> InProgress (retry) -> ...
//!                          -> Complete | TimeOut | FullyAttempted | Fatal
//! ```
//!
//! Every [`RetryableTask::work`] call runs at most one step and never waits.

use crate::status::TaskStatus;
use rtubus_core::{Clock, RetryBudget};
use std::time::Duration;

/// Steps of a retryable exchange
pub trait Retryable {
    /// Start the first attempt
    fn begin(&mut self) -> TaskStatus;

    /// Look for the outcome of the current attempt without blocking
    fn check(&mut self) -> TaskStatus;

    /// Start another attempt
    fn retry(&mut self) -> TaskStatus;

    /// Called when the machine decides on `TimeOut`, `AttemptTimeOut` or
    /// `FullyAttempted` by itself
    ///
    /// Returning a different status overrides the decision. A non-terminal
    /// override keeps the task running past its nominal budget.
    fn on_auto_status_change(&mut self, status: TaskStatus) -> TaskStatus {
        status
    }

    /// Called once when the task first reaches a terminal status
    fn disposed(&mut self) {}
}

/// Driver for a [`Retryable`] under a [`RetryBudget`]
#[derive(Debug)]
pub struct RetryableTask<R, C> {
    steps: R,
    clock: C,
    budget: RetryBudget,
    status: TaskStatus,
    attempts: u32,
    started_at: Duration,
    attempt_started_at: Duration,
}

impl<R: Retryable, C: Clock> RetryableTask<R, C> {
    pub fn new(steps: R, clock: C, budget: RetryBudget) -> Self {
        Self {
            steps,
            clock,
            budget,
            status: TaskStatus::NotStarted,
            attempts: 0,
            started_at: Duration::ZERO,
            attempt_started_at: Duration::ZERO,
        }
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    /// Attempts started so far (`begin` plus every `retry`)
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn budget(&self) -> &RetryBudget {
        &self.budget
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn steps(&self) -> &R {
        &self.steps
    }

    pub fn steps_mut(&mut self) -> &mut R {
        &mut self.steps
    }

    pub fn into_steps(self) -> R {
        self.steps
    }

    /// Time since `begin`, zero before the task starts
    pub fn elapsed(&self) -> Duration {
        if self.status == TaskStatus::NotStarted {
            Duration::ZERO
        } else {
            self.clock.since(self.started_at)
        }
    }

    /// Return to `NotStarted` so the task can run again
    pub fn reset(&mut self) {
        self.status = TaskStatus::NotStarted;
        self.attempts = 0;
        self.started_at = Duration::ZERO;
        self.attempt_started_at = Duration::ZERO;
    }

    /// Advance the task by at most one step
    ///
    /// # Returns
    /// `true` once the task is terminal
    pub fn work(&mut self) -> bool {
        let previously_terminal = self.status.is_terminal();
        if previously_terminal {
            return true;
        }

        self.advance();

        if self.status.is_terminal() {
            match self.status {
                TaskStatus::Complete => log::debug!("Task complete after {} attempt(s)", self.attempts),
                status => log::warn!("Task ended: {} after {} attempt(s)", status, self.attempts),
            }
            self.steps.disposed();
            return true;
        }
        false
    }

    fn advance(&mut self) {
        loop {
            match self.status {
                TaskStatus::NotStarted => {
                    let now = self.clock.now();
                    self.started_at = now;
                    self.attempt_started_at = now;
                    self.attempts = 1;
                    self.status = self.steps.begin();
                    return;
                }
                TaskStatus::InProgress => {
                    // A vetoed timeout falls through to the next test
                    if self.total_time_exceeded() {
                        let decided = self.steps.on_auto_status_change(TaskStatus::TimeOut);
                        if decided != TaskStatus::InProgress {
                            self.status = decided;
                            continue;
                        }
                    }
                    if self.attempt_time_exceeded() {
                        let decided = self.steps.on_auto_status_change(TaskStatus::AttemptTimeOut);
                        if decided != TaskStatus::InProgress {
                            self.status = decided;
                            continue;
                        }
                    }
                    self.status = self.steps.check();
                    return;
                }
                TaskStatus::Failure | TaskStatus::AttemptTimeOut => {
                    self.after_failed_attempt();
                    return;
                }
                _ => return,
            }
        }
    }

    fn after_failed_attempt(&mut self) {
        if self.tries_exhausted() {
            // A late answer to the last attempt still counts
            let checked = self.steps.check();
            if checked.is_terminal() {
                self.status = checked;
                return;
            }
            if self.overruled(TaskStatus::FullyAttempted) {
                return;
            }
        }

        if self.total_time_exceeded() && self.overruled(TaskStatus::TimeOut) {
            return;
        }

        if self.clock.since(self.attempt_started_at) >= self.budget.min_attempt_time {
            self.attempts += 1;
            self.attempt_started_at = self.clock.now();
            log::debug!("Retrying, attempt {} after {}", self.attempts, self.status);
            self.status = self.steps.retry();
        }
    }

    /// Pass an automatic decision through the hook after a failed attempt
    ///
    /// Returns `true` when the decision stands. A hook answer of `InProgress`
    /// leaves the failed status in place so the retry rule still applies.
    fn overruled(&mut self, auto: TaskStatus) -> bool {
        match self.steps.on_auto_status_change(auto) {
            TaskStatus::InProgress => false,
            decided if decided.is_retryable() => {
                self.status = decided;
                false
            }
            decided => {
                self.status = decided;
                true
            }
        }
    }

    fn tries_exhausted(&self) -> bool {
        self.budget.max_tries != 0 && self.attempts >= self.budget.max_tries
    }

    fn total_time_exceeded(&self) -> bool {
        !self.budget.max_time.is_zero() && self.clock.since(self.started_at) >= self.budget.max_time
    }

    fn attempt_time_exceeded(&self) -> bool {
        !self.budget.max_attempt_time.is_zero()
            && self.clock.since(self.attempt_started_at) >= self.budget.max_attempt_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtubus_core::ManualClock;
    use std::collections::VecDeque;

    /// Steps that replay scripted results and count calls
    #[derive(Default)]
    struct Script {
        begin_result: Option<TaskStatus>,
        checks: VecDeque<TaskStatus>,
        default_check: Option<TaskStatus>,
        retry_result: Option<TaskStatus>,
        veto: Option<TaskStatus>,
        spared: Option<TaskStatus>,
        begins: u32,
        check_calls: u32,
        retries: u32,
        disposals: u32,
        auto_seen: Vec<TaskStatus>,
    }

    impl Script {
        fn new(checks: &[TaskStatus], default_check: TaskStatus) -> Self {
            Self {
                checks: checks.iter().copied().collect(),
                default_check: Some(default_check),
                ..Self::default()
            }
        }
    }

    impl Retryable for Script {
        fn begin(&mut self) -> TaskStatus {
            self.begins += 1;
            self.begin_result.unwrap_or(TaskStatus::InProgress)
        }

        fn check(&mut self) -> TaskStatus {
            self.check_calls += 1;
            self.checks
                .pop_front()
                .or(self.default_check)
                .unwrap_or(TaskStatus::InProgress)
        }

        fn retry(&mut self) -> TaskStatus {
            self.retries += 1;
            self.retry_result.unwrap_or(TaskStatus::InProgress)
        }

        fn on_auto_status_change(&mut self, status: TaskStatus) -> TaskStatus {
            self.auto_seen.push(status);
            if self.spared == Some(status) {
                return TaskStatus::InProgress;
            }
            self.veto.unwrap_or(status)
        }

        fn disposed(&mut self) {
            self.disposals += 1;
        }
    }

    fn run(task: &mut RetryableTask<Script, ManualClock>, limit: usize) -> usize {
        for calls in 1..=limit {
            if task.work() {
                return calls;
            }
        }
        limit
    }

    #[test]
    fn test_complete_after_four_checks() {
        let steps = Script::new(
            &[TaskStatus::InProgress, TaskStatus::InProgress, TaskStatus::InProgress],
            TaskStatus::Complete,
        );
        let mut task = RetryableTask::new(steps, ManualClock::new(), RetryBudget::UNBOUNDED);
        assert_eq!(task.status(), TaskStatus::NotStarted);
        assert_eq!(run(&mut task, 100), 5);
        assert_eq!(task.status(), TaskStatus::Complete);
        assert_eq!(task.steps().begins, 1);
        assert_eq!(task.steps().check_calls, 4);
        assert_eq!(task.steps().retries, 0);
    }

    #[test]
    fn test_max_tries_bounds_attempts() {
        for max_tries in 1..=5 {
            let steps = Script::new(&[], TaskStatus::Failure);
            let budget = RetryBudget::new(max_tries, Duration::ZERO);
            let mut task = RetryableTask::new(steps, ManualClock::new(), budget);
            run(&mut task, 100);
            let steps = task.steps();
            assert_eq!(task.status(), TaskStatus::FullyAttempted);
            assert_eq!(steps.begins + steps.retries, max_tries);
            assert_eq!(task.attempts(), max_tries);
        }
    }

    #[test]
    fn test_late_success_on_last_attempt() {
        // Last attempt reports failure, the final check finds the answer
        let steps = Script::new(&[TaskStatus::Failure, TaskStatus::Failure], TaskStatus::Complete);
        let mut task = RetryableTask::new(steps, ManualClock::new(), RetryBudget::new(2, Duration::ZERO));
        run(&mut task, 100);
        assert_eq!(task.status(), TaskStatus::Complete);
        assert_eq!(task.steps().retries, 1);
        assert!(task.steps().auto_seen.is_empty());
    }

    #[test]
    fn test_disposed_fires_once() {
        let steps = Script::new(&[], TaskStatus::Complete);
        let mut task = RetryableTask::new(steps, ManualClock::new(), RetryBudget::UNBOUNDED);
        for _ in 0..10 {
            task.work();
        }
        assert_eq!(task.steps().disposals, 1);
        assert_eq!(task.steps().check_calls, 1);

        task.reset();
        assert_eq!(task.status(), TaskStatus::NotStarted);
        run(&mut task, 10);
        task.work();
        assert_eq!(task.steps().disposals, 2);
        assert_eq!(task.steps().begins, 2);
    }

    #[test]
    fn test_fatal_begin_is_terminal() {
        let mut steps = Script::new(&[], TaskStatus::Complete);
        steps.begin_result = Some(TaskStatus::Fatal);
        let mut task = RetryableTask::new(steps, ManualClock::new(), RetryBudget::UNBOUNDED);
        assert!(task.work());
        assert_eq!(task.status(), TaskStatus::Fatal);
        assert_eq!(task.steps().check_calls, 0);
        assert_eq!(task.steps().disposals, 1);
    }

    #[test]
    fn test_attempt_timeout_triggers_retry() {
        let clock = ManualClock::new();
        let steps = Script::new(&[], TaskStatus::InProgress);
        let budget = RetryBudget::new(3, Duration::from_millis(10));
        let mut task = RetryableTask::new(steps, clock.clone(), budget);

        task.work();
        task.work();
        assert_eq!(task.steps().check_calls, 1);
        clock.advance(Duration::from_millis(10));
        task.work();
        assert_eq!(task.status(), TaskStatus::InProgress);
        assert_eq!(task.steps().retries, 1);
        assert_eq!(task.steps().auto_seen, vec![TaskStatus::AttemptTimeOut]);

        // Attempt timer restarted with the retry
        task.work();
        assert_eq!(task.status(), TaskStatus::InProgress);
        assert_eq!(task.steps().retries, 1);
    }

    #[test]
    fn test_total_timeout() {
        let clock = ManualClock::new();
        let steps = Script::new(&[], TaskStatus::InProgress);
        let budget = RetryBudget::UNBOUNDED.with_max_time(Duration::from_millis(50));
        let mut task = RetryableTask::new(steps, clock.clone(), budget);

        task.work();
        clock.advance(Duration::from_millis(49));
        assert!(!task.work());
        clock.advance(Duration::from_millis(1));
        assert!(task.work());
        assert_eq!(task.status(), TaskStatus::TimeOut);
        assert_eq!(task.steps().disposals, 1);
        assert_eq!(task.elapsed(), Duration::from_millis(50));
    }

    #[test]
    fn test_min_attempt_time_spaces_retries() {
        let clock = ManualClock::new();
        let steps = Script::new(&[], TaskStatus::Failure);
        let budget = RetryBudget::UNBOUNDED.with_min_attempt_time(Duration::from_millis(20));
        let mut task = RetryableTask::new(steps, clock.clone(), budget);

        task.work();
        task.work();
        assert_eq!(task.status(), TaskStatus::Failure);
        for _ in 0..5 {
            task.work();
        }
        assert_eq!(task.steps().retries, 0);
        clock.advance(Duration::from_millis(20));
        task.work();
        assert_eq!(task.steps().retries, 1);
        assert_eq!(task.attempts(), 2);
    }

    #[test]
    fn test_veto_keeps_task_running() {
        let clock = ManualClock::new();
        let mut steps = Script::new(&[], TaskStatus::Failure);
        steps.veto = Some(TaskStatus::Failure);
        let budget = RetryBudget::new(2, Duration::ZERO);
        let mut task = RetryableTask::new(steps, clock, budget);

        for _ in 0..20 {
            assert!(!task.work());
        }
        assert!(task.steps().begins + task.steps().retries > 2);
        assert!(task.steps().auto_seen.contains(&TaskStatus::FullyAttempted));
        assert_eq!(task.steps().disposals, 0);

        // Lifting the veto ends the task on the next exhausted attempt
        task.steps_mut().veto = None;
        run(&mut task, 10);
        assert_eq!(task.status(), TaskStatus::FullyAttempted);
        assert_eq!(task.steps().disposals, 1);
    }

    #[test]
    fn test_veto_of_timeout_keeps_checking() {
        let clock = ManualClock::new();
        let mut steps = Script::new(&[TaskStatus::InProgress], TaskStatus::Complete);
        steps.veto = Some(TaskStatus::InProgress);
        let budget = RetryBudget::UNBOUNDED.with_max_time(Duration::from_millis(5));
        let mut task = RetryableTask::new(steps, clock.clone(), budget);

        task.work();
        clock.advance(Duration::from_millis(10));
        assert!(!task.work());
        assert_eq!(task.steps().auto_seen, vec![TaskStatus::TimeOut]);
        assert!(task.work());
        assert_eq!(task.status(), TaskStatus::Complete);
    }

    #[test]
    fn test_vetoed_timeout_still_checks_attempt_time() {
        let clock = ManualClock::new();
        let mut steps = Script::new(&[], TaskStatus::InProgress);
        steps.spared = Some(TaskStatus::TimeOut);
        let budget = RetryBudget::new(3, Duration::from_millis(8)).with_max_time(Duration::from_millis(5));
        let mut task = RetryableTask::new(steps, clock.clone(), budget);

        task.work();
        clock.advance(Duration::from_millis(10));
        assert!(!task.work());
        assert_eq!(
            task.steps().auto_seen,
            vec![TaskStatus::TimeOut, TaskStatus::AttemptTimeOut, TaskStatus::TimeOut]
        );
        assert_eq!(task.steps().check_calls, 0);
        assert_eq!(task.steps().retries, 1);
        assert_eq!(task.attempts(), 2);
        assert_eq!(task.status(), TaskStatus::InProgress);
    }
}
