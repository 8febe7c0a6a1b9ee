use std::time::Duration;
use tracing::{debug, info, warn};

use crate::{
    client::CozeApi,
    config::CozeConfig,
    extract::{PollReading, read_poll_response},
    state::GenerationToken,
    types::{ExecutionHandle, ExtractedPrompt},
};

/// Retry budget of one polling run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollState {
    pub attempts: u32,
    pub max_attempts: u32,
    pub interval: Duration,
}

impl PollState {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            attempts: 0,
            max_attempts,
            interval,
        }
    }

    pub fn exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// Query errors are retried while a further attempt remains.
    fn can_retry_error(&self) -> bool {
        self.attempts + 1 < self.max_attempts
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollFailure {
    /// Upstream reported `status: "failed"`.
    Upstream(Option<String>),
    /// Upstream reported success without usable text.
    EmptyOutput,
    /// A status the poller does not know how to wait on.
    Unrecognized(Option<String>),
    /// The last permitted query failed.
    Transport(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Success(ExtractedPrompt),
    Failed(PollFailure),
    TimedOut,
    /// The owner went away; the result must not be applied.
    Cancelled,
}

/// Queries the status endpoint until a terminal outcome.
#[derive(Debug, Clone, Copy)]
pub struct Poller {
    interval: Duration,
    max_attempts: u32,
}

impl Poller {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }

    pub fn from_config(config: &CozeConfig) -> Self {
        Self::new(config.poll_interval, config.max_attempts)
    }

    /// Poll `handle` until success, explicit failure, budget exhaustion or
    /// cancellation. Returns exactly one outcome.
    pub async fn run(
        &self,
        api: &dyn CozeApi,
        handle: &ExecutionHandle,
        token: &GenerationToken,
    ) -> PollOutcome {
        let mut state = PollState::new(self.max_attempts, self.interval);
        let execute_id = handle.execute_id.as_str();

        loop {
            if token.is_stale() {
                debug!(execute_id, "Poll owner gone before query");
                return PollOutcome::Cancelled;
            }
            if state.exhausted() {
                warn!(execute_id, attempts = state.attempts, "Polling budget exhausted");
                return PollOutcome::TimedOut;
            }

            let response = api.get_result(execute_id).await;

            if token.is_stale() {
                debug!(execute_id, "Dropping poll result for stale owner");
                return PollOutcome::Cancelled;
            }

            match response {
                Ok(result) => match read_poll_response(&result.data) {
                    PollReading::Prompt(prompt) => {
                        info!(execute_id, attempts = state.attempts + 1, "Workflow produced a prompt");
                        return PollOutcome::Success(prompt);
                    }
                    PollReading::EmptySuccess => {
                        warn!(execute_id, response = %result.data, "Workflow succeeded without a prompt");
                        return PollOutcome::Failed(PollFailure::EmptyOutput);
                    }
                    PollReading::Failed(message) => {
                        warn!(execute_id, error_message = ?message, "Workflow reported failure");
                        return PollOutcome::Failed(PollFailure::Upstream(message));
                    }
                    PollReading::Unrecognized(message) => {
                        warn!(execute_id, response = %result.data, "Unknown poll result");
                        return PollOutcome::Failed(PollFailure::Unrecognized(message));
                    }
                    PollReading::Running => {
                        debug!(execute_id, attempt = state.attempts + 1, "Workflow still running");
                    }
                },
                Err(e) => {
                    if !state.can_retry_error() {
                        warn!(execute_id, error = %e, "Poll query failed on the last attempt");
                        return PollOutcome::Failed(PollFailure::Transport(e.to_string()));
                    }
                    warn!(execute_id, attempt = state.attempts + 1, error = %e, "Poll query failed, retrying");
                }
            }

            state.attempts += 1;
            tokio::time::sleep(state.interval).await;
        }
    }
}
