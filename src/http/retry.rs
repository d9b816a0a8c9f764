//! Single-retry policy for backend requests.

// crates.io
use serde::{Deserialize, Serialize};
// self
use crate::_prelude::*;

/// Default per-attempt timeout.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);
/// Timeout granted to the retry after a transient failure.
pub const DEFAULT_EXTENDED_TIMEOUT: Duration = Duration::from_secs(60);
/// Fixed wait after a rate-limit response.
pub const DEFAULT_RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(2);

/// Retry configuration for backend calls.
///
/// At most one retry is ever performed per request, whichever failure triggered it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
	/// Timeout applied to the first attempt.
	pub attempt_timeout: Duration,
	/// Timeout applied to the retry that follows a timeout or connection failure.
	pub extended_timeout: Duration,
	/// Delay before retrying a rate-limited request.
	pub rate_limit_backoff: Duration,
}
impl RetryPolicy {
	/// Validate invariants for retry configuration.
	pub fn validate(&self) -> Result<()> {
		if self.attempt_timeout < Duration::from_millis(100) {
			return Err(Error::Validation {
				field: "retry.attempt_timeout",
				reason: "Must be at least 100 ms.".into(),
			});
		}
		if self.extended_timeout < self.attempt_timeout {
			return Err(Error::Validation {
				field: "retry.extended_timeout",
				reason: "Must be greater than or equal to attempt_timeout.".into(),
			});
		}

		Ok(())
	}
}
impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
			extended_timeout: DEFAULT_EXTENDED_TIMEOUT,
			rate_limit_backoff: DEFAULT_RATE_LIMIT_BACKOFF,
		}
	}
}

/// What to do after a failed attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
	/// Wait `delay`, then send once more with `timeout`.
	Retry {
		/// Pause before the retry.
		delay: Duration,
		/// Timeout for the retry.
		timeout: Duration,
	},
	/// Surface the error to the caller.
	GiveUp,
}

/// Tracks the retry budget for one logical request.
#[derive(Debug)]
pub struct RetryExecutor<'a> {
	policy: &'a RetryPolicy,
	retried: bool,
}
impl<'a> RetryExecutor<'a> {
	/// Create a new executor respecting the supplied retry policy.
	pub fn new(policy: &'a RetryPolicy) -> Self {
		Self { policy, retried: false }
	}

	/// Timeout for the first attempt.
	pub fn initial_timeout(&self) -> Duration {
		self.policy.attempt_timeout
	}

	/// Whether the single retry has already been spent.
	pub fn has_retried(&self) -> bool {
		self.retried
	}

	/// Classify `error` and consume the retry if it qualifies.
	pub fn on_failure(&mut self, error: &Error) -> RetryDecision {
		if self.retried {
			tracing::debug!(error = %error, "retry already spent");

			return RetryDecision::GiveUp;
		}

		let decision = if error.is_transient() {
			RetryDecision::Retry { delay: Duration::ZERO, timeout: self.policy.extended_timeout }
		} else if error.is_rate_limited() {
			RetryDecision::Retry {
				delay: self.policy.rate_limit_backoff,
				timeout: self.policy.attempt_timeout,
			}
		} else {
			RetryDecision::GiveUp
		};

		if let RetryDecision::Retry { delay, timeout } = decision {
			self.retried = true;

			tracing::debug!(?delay, ?timeout, error = %error, "retrying request once");
		}

		decision
	}
}
