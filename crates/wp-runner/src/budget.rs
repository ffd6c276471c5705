//! Step and time budget of one run.

use crate::RunnerError;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
pub struct StepBudget {
    max_steps: u32,
    steps: u32,
    run_timeout: Option<Duration>,
    deadline: Option<Instant>,
}

impl StepBudget {
    /// The deadline clock starts now. A timeout too far out to express as an
    /// instant leaves the run without a deadline.
    pub fn new(max_steps: u32, run_timeout: Option<Duration>) -> Self {
        Self {
            max_steps,
            steps: 0,
            run_timeout,
            deadline: run_timeout.and_then(|t| Instant::now().checked_add(t)),
        }
    }

    /// Count the next step; fails once the run would exceed `max_steps`.
    pub fn begin_step(&mut self) -> Result<u32, RunnerError> {
        if self.steps >= self.max_steps {
            return Err(RunnerError::StepLimitExceeded(self.max_steps));
        }
        self.steps += 1;
        Ok(self.steps)
    }

    pub fn steps(&self) -> u32 {
        self.steps
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout
    }
}
