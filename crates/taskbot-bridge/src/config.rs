use std::time::Duration;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// What happens to a work item whose caller stopped waiting.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TimeoutPolicy {
    /// Drop the work item at its next suspension point.
    #[default]
    Cancel,
    /// Let the work item run to completion; its result is discarded.
    Detach,
}

#[derive(Clone, Debug)]
pub struct BridgeConfig {
    /// Bound used by [`crate::ExecutionBridge::submit_and_wait`].
    pub timeout: Duration,
    pub timeout_policy: TimeoutPolicy,
    /// Worker thread name prefix; the context id is appended.
    pub thread_name: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            timeout_policy: TimeoutPolicy::default(),
            thread_name: "taskbot-bridge".to_string(),
        }
    }
}

impl BridgeConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_policy(mut self, policy: TimeoutPolicy) -> Self {
        self.timeout_policy = policy;
        self
    }
}
