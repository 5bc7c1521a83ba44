use std::future::Future;
use std::time::Duration;

use tracing::debug;

/// How often and how many times to probe in [`poll_until`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollPolicy {
    /// Budget for confirming that a VM stopped: 30 probes, one second apart.
    pub const STOP_CONFIRMATION: PollPolicy = PollPolicy {
        interval: Duration::from_secs(1),
        max_attempts: 30,
    };

    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::STOP_CONFIRMATION
    }
}

/// Result of [`poll_until`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T, E> {
    /// A probe returned a value satisfying the condition.
    Reached(T),
    /// Every attempt returned a value that did not satisfy the condition.
    TimedOut { attempts: u32 },
    /// A probe failed; polling stopped there.
    Failed(E),
}

/// Call `probe` until `done` accepts its value, sleeping `policy.interval` between attempts.
///
/// At most `policy.max_attempts` probes are made. There is no sleep after the last one.
pub async fn poll_until<T, E, F, Fut, P>(
    policy: PollPolicy,
    mut probe: F,
    mut done: P,
) -> PollOutcome<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: FnMut(&T) -> bool,
{
    for attempt in 1..=policy.max_attempts {
        match probe().await {
            Ok(value) if done(&value) => return PollOutcome::Reached(value),
            Ok(_) => debug!(attempt, max = policy.max_attempts, "condition not reached"),
            Err(e) => return PollOutcome::Failed(e),
        }
        if attempt < policy.max_attempts {
            tokio::time::sleep(policy.interval).await;
        }
    }
    PollOutcome::TimedOut {
        attempts: policy.max_attempts,
    }
}
