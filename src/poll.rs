//! Caller-side polling for availability checks that are still running.
//!
//! [`CalilClient`] never polls on its own. This is one way to drive the
//! continue loop; callers with other needs can call
//! [`CalilClient::continue_check`] directly.

use std::time::Duration;

use crate::{
    calil_client::{AvailabilityResult, CalilClient, Endpoint},
    error::{CalilError, CalilResult, MalformedReason},
};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Wait before each continuation request.
    pub interval: Duration,
    /// None polls until the service reports completion.
    pub max_attempts: Option<u32>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        PollPolicy {
            interval: DEFAULT_POLL_INTERVAL,
            max_attempts: None,
        }
    }
}

impl PollPolicy {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

/// Keep calling `continue_check` until `result` is complete.
///
/// A complete `result` is returned as is. Errors from any continuation are
/// returned immediately; nothing is retried.
#[tracing::instrument(level = "debug", skip(client, result), fields(session = %result.session))]
pub async fn wait_for_completion(
    client: &CalilClient,
    mut result: AvailabilityResult,
    policy: &PollPolicy,
) -> CalilResult<AvailabilityResult> {
    let mut attempts = 0u32;
    while result.in_progress {
        if result.session.is_empty() {
            return Err(CalilError::malformed(
                Endpoint::Check,
                MalformedReason::MissingSession,
            ));
        }
        if policy.max_attempts.is_some_and(|max| attempts >= max) {
            return Err(CalilError::PollingExhausted {
                session: result.session,
                attempts,
            });
        }
        tokio::time::sleep(policy.interval).await;
        attempts += 1;
        tracing::debug!(attempts, "polling session");
        result = client.continue_check(&result.session).await?;
    }
    tracing::debug!(attempts, "availability check complete");
    Ok(result)
}
