//! HTTP transport for the dashboard REST backend.

// crates.io
use http::{Method, StatusCode};
use reqwest::Client;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tokio::time;
use url::Url;
// self
use crate::{
	_prelude::*,
	http::retry::{RetryDecision, RetryExecutor, RetryPolicy},
};

/// Query parameters as sent on the wire.
pub type Query = Vec<(String, String)>;

/// Thin JSON client bound to one backend base URL.
///
/// Each call gets at most one retry (see [`RetryPolicy`]); anything else is surfaced as a
/// typed [`Error`].
#[derive(Clone, Debug)]
pub struct ApiClient {
	client: Client,
	base_url: Arc<Url>,
	retry: Arc<RetryPolicy>,
}
impl ApiClient {
	/// Build a client with the default reqwest configuration.
	pub fn new(base_url: Url, retry: RetryPolicy) -> Result<Self> {
		let client = Client::builder()
			.user_agent(format!("dynacache/{}", env!("CARGO_PKG_VERSION")))
			.connect_timeout(Duration::from_secs(5))
			.build()?;

		Ok(Self::with_client(base_url, retry, client))
	}

	/// Build a client around a caller-supplied reqwest client (primarily for tests).
	pub fn with_client(base_url: Url, retry: RetryPolicy, client: Client) -> Self {
		Self { client, base_url: Arc::new(with_trailing_slash(base_url)), retry: Arc::new(retry) }
	}

	/// Base URL every endpoint is resolved against.
	pub fn base_url(&self) -> &Url {
		&self.base_url
	}

	/// Resolve `endpoint` (e.g. `/hosts`) under the base URL.
	pub fn endpoint_url(&self, endpoint: &str) -> Result<Url> {
		Ok(self.base_url.join(endpoint.trim_start_matches('/'))?)
	}

	/// `GET endpoint?query` decoded into `T`.
	pub async fn get_json<T>(&self, endpoint: &str, query: &Query) -> Result<T>
	where
		T: DeserializeOwned,
	{
		let value = self.execute(Method::GET, endpoint, query, None).await?;

		Ok(serde_json::from_value(value)?)
	}

	/// `POST endpoint` with a JSON body, decoded into `T`.
	pub async fn post_json<B, T>(&self, endpoint: &str, body: &B) -> Result<T>
	where
		B: Serialize + ?Sized,
		T: DeserializeOwned,
	{
		let body = serde_json::to_value(body)?;
		let value = self.execute(Method::POST, endpoint, &Query::new(), Some(body)).await?;

		Ok(serde_json::from_value(value)?)
	}

	async fn execute(
		&self,
		method: Method,
		endpoint: &str,
		query: &Query,
		body: Option<Value>,
	) -> Result<Value> {
		let url = self.endpoint_url(endpoint)?;
		let mut executor = RetryExecutor::new(&self.retry);
		let mut timeout = executor.initial_timeout();

		loop {
			match self.send_once(&method, &url, query, body.as_ref(), timeout).await {
				Ok(value) => return Ok(value),
				Err(err) => match executor.on_failure(&err) {
					RetryDecision::Retry { delay, timeout: next } => {
						if !delay.is_zero() {
							time::sleep(delay).await;
						}

						timeout = next;
					},
					RetryDecision::GiveUp => return Err(err),
				},
			}
		}
	}

	async fn send_once(
		&self,
		method: &Method,
		url: &Url,
		query: &Query,
		body: Option<&Value>,
		timeout: Duration,
	) -> Result<Value> {
		let mut builder = self.client.request(method.clone(), url.clone()).timeout(timeout);

		if !query.is_empty() {
			builder = builder.query(query);
		}
		if let Some(body) = body {
			builder = builder.json(body);
		}

		let start = Instant::now();
		let response = builder.send().await.map_err(|err| classify(err, url, timeout))?;
		let status = response.status();

		if status == StatusCode::TOO_MANY_REQUESTS {
			return Err(Error::RateLimited { url: url.clone() });
		}
		if !status.is_success() {
			let body = response.text().await.ok();

			return Err(Error::HttpStatus {
				status,
				url: url.clone(),
				message: body.as_deref().and_then(error_message),
			});
		}

		let bytes = response.bytes().await.map_err(|err| classify(err, url, timeout))?;

		tracing::debug!(
			method = %method,
			url = %url,
			status = %status,
			elapsed = ?start.elapsed(),
			"backend request complete"
		);

		if bytes.is_empty() {
			return Ok(Value::Null);
		}

		Ok(serde_json::from_slice(&bytes)?)
	}
}

fn classify(err: reqwest::Error, url: &Url, timeout: Duration) -> Error {
	if err.is_timeout() {
		Error::Timeout { url: url.clone(), timeout }
	} else if err.is_connect() {
		Error::Connect { url: url.clone(), reason: err.to_string() }
	} else {
		Error::Reqwest(err)
	}
}

/// Pull a human-readable message out of an error body.
///
/// Structured bodies (`{"error": ".."}`, `{"message": ".."}`, `{"detail": ".."}`) yield the
/// field; other non-empty bodies are returned trimmed.
fn error_message(body: &str) -> Option<String> {
	let trimmed = body.trim();

	if trimmed.is_empty() {
		return None;
	}

	if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(trimmed) {
		for field in ["error", "message", "detail"] {
			if let Some(Value::String(message)) = map.get(field) {
				return Some(message.clone());
			}
		}
	}

	Some(trimmed.to_owned())
}

fn with_trailing_slash(mut url: Url) -> Url {
	if !url.path().ends_with('/') {
		let path = format!("{}/", url.path());

		url.set_path(&path);
	}

	url
}
