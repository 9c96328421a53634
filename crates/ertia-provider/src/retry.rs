//! Bounded exponential backoff for not-ready nodes
//!
//! Freshly created servers take a while before they accept SSH logins. The
//! orchestrator waits between passes with exponential backoff and jitter,
//! and gives up after a maximum number of attempts or once the deadline
//! would be exceeded.

use std::time::Duration;

use rand::Rng;

/// How long and how often to wait for nodes to become reachable
#[derive(Clone, Debug, PartialEq)]
pub struct ConvergencePolicy {
    /// Maximum number of passes that may end in not-ready
    pub max_attempts: u32,
    /// Delay after the first not-ready pass
    pub initial_delay: Duration,
    /// Upper bound for a single delay
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Randomize each delay between 0.5x and 1.5x
    pub jitter: bool,
    /// Give up once converging would take longer than this
    pub deadline: Duration,
}

impl Default for ConvergencePolicy {
    fn default() -> Self {
        Self {
            max_attempts: 200,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
            deadline: Duration::from_secs(30 * 60),
        }
    }
}

impl ConvergencePolicy {
    /// Default policy with a different attempt budget
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts,
            ..Default::default()
        }
    }

    /// Disable jitter so delays are deterministic
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Override the deadline
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }
}

/// Delay sequence for one convergence run
#[derive(Debug)]
pub struct Backoff {
    delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    jitter: bool,
}

impl Backoff {
    /// Start a sequence at the policy's initial delay
    pub fn new(policy: &ConvergencePolicy) -> Self {
        Self {
            delay: policy.initial_delay,
            max_delay: policy.max_delay,
            multiplier: policy.backoff_multiplier,
            jitter: policy.jitter,
        }
    }

    /// The next delay to sleep, advancing the sequence
    pub fn next_delay(&mut self) -> Duration {
        let current = self.delay;
        // Exponential backoff, capped at max_delay
        self.delay = Duration::from_secs_f64(
            (self.delay.as_secs_f64() * self.multiplier).min(self.max_delay.as_secs_f64()),
        );

        if self.jitter {
            // Add jitter: 0.5x to 1.5x of the delay
            let factor = rand::thread_rng().gen_range(0.5..1.5);
            Duration::from_secs_f64(current.as_secs_f64() * factor)
        } else {
            current
        }
    }
}
