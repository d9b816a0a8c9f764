//! Crate-wide error types and `Result` alias.

// std
use std::sync::Arc;

/// Library-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the dashboard cache crate.
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	Reqwest(#[from] reqwest::Error),
	#[error(transparent)]
	Serde(#[from] serde_json::Error),
	#[error(transparent)]
	Url(#[from] url::ParseError),

	/// One upstream failure fanned out to every single-flight waiter.
	#[error(transparent)]
	Shared(Arc<Error>),

	#[error("Request to {url} timed out after {timeout:?}.")]
	Timeout { url: url::Url, timeout: std::time::Duration },
	#[error("Connection to {url} failed: {reason}")]
	Connect { url: url::Url, reason: String },
	#[error("Rate limited by upstream at {url}.")]
	RateLimited { url: url::Url },
	#[error("Upstream HTTP status {status} from {url}: {message:?}")]
	HttpStatus { status: http::StatusCode, url: url::Url, message: Option<String> },
	#[error("Metrics error: {0}")]
	Metrics(String),
	#[error("Storage error: {0}")]
	Storage(String),
	#[error("Validation failed for {field}: {reason}")]
	Validation { field: &'static str, reason: String },
}
impl Error {
	/// Unwrap any single-flight sharing layers and return the originating error.
	pub fn root(&self) -> &Error {
		match self {
			Error::Shared(inner) => inner.root(),
			other => other,
		}
	}

	/// Whether the failure is a transient network condition (timeout or connection failure).
	pub fn is_transient(&self) -> bool {
		matches!(self.root(), Error::Timeout { .. } | Error::Connect { .. })
	}

	/// Whether the upstream rejected the call with a rate-limit response.
	pub fn is_rate_limited(&self) -> bool {
		matches!(self.root(), Error::RateLimited { .. })
	}
}
