//! Cache entry and cache key definitions.

// std
use std::{
	collections::BTreeMap,
	fmt::{Display, Formatter, Result as FmtResult},
};
// crates.io
use serde::{Deserialize, Serialize};
use serde_json::Value;
// self
use crate::_prelude::*;

/// A cached payload together with its expiry metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
	/// Opaque payload.
	pub value: T,
	/// Wall-clock time the entry was written.
	pub created_at: DateTime<Utc>,
	/// `created_at + ttl`; the entry is valid up to and including this instant.
	pub expires_at: DateTime<Utc>,
}
impl<T> CacheEntry<T> {
	/// Build an entry that lives for `ttl` starting at `now`.
	pub fn new(value: T, ttl: Duration, now: DateTime<Utc>) -> Self {
		let ttl = TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX);
		let expires_at = now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC);

		Self { value, created_at: now, expires_at }
	}

	/// Whether the entry may still be served at `now`.
	pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
		now <= self.expires_at
	}

	/// Age of the entry at `now`, saturating at zero for clock skew.
	pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
		(now - self.created_at).to_std().unwrap_or_default()
	}
}

/// Composite `{verb}:{endpoint}:{paramsFingerprint}` key.
///
/// Identical request parameters always produce the same fingerprint because parameters are
/// serialised as a JSON object with sorted keys.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);
impl CacheKey {
	/// Build a key for `verb` against `endpoint` with the supplied query parameters.
	pub fn new<K, V>(verb: &str, endpoint: &str, params: impl IntoIterator<Item = (K, V)>) -> Self
	where
		K: Into<String>,
		V: Into<String>,
	{
		let mut fields = BTreeMap::<String, Vec<String>>::new();

		for (k, v) in params {
			fields.entry(k.into()).or_default().push(v.into());
		}

		// Repeated keys keep every value, in request order.
		let fingerprint = Value::Object(
			fields
				.into_iter()
				.map(|(k, mut values)| {
					let value = if values.len() == 1 {
						Value::String(values.remove(0))
					} else {
						Value::from(values)
					};

					(k, value)
				})
				.collect(),
		)
		.to_string();

		Self(format!("{}:{}:{fingerprint}", verb.to_ascii_lowercase(), normalize_endpoint(endpoint)))
	}

	/// Shorthand for a `get` key.
	pub fn get<K, V>(endpoint: &str, params: impl IntoIterator<Item = (K, V)>) -> Self
	where
		K: Into<String>,
		V: Into<String>,
	{
		Self::new("get", endpoint, params)
	}

	/// Wrap an already-encoded key verbatim.
	pub fn from_raw(raw: impl Into<String>) -> Self {
		Self(raw.into())
	}

	/// Full key text.
	pub fn as_str(&self) -> &str {
		&self.0
	}

	/// First segment of the key (the verb).
	pub fn verb(&self) -> &str {
		self.0.split(':').next().unwrap_or_default()
	}

	/// Second segment of the key (the endpoint), if present.
	pub fn endpoint(&self) -> Option<&str> {
		self.0.splitn(3, ':').nth(1)
	}

	/// `verb:endpoint` prefix used for per-resource invalidation.
	pub fn resource_prefix(&self) -> String {
		match self.endpoint() {
			Some(endpoint) => format!("{}:{endpoint}", self.verb()),
			None => self.verb().to_owned(),
		}
	}

	/// Whether this key falls under the category `prefix`.
	pub fn in_category(&self, prefix: &str) -> bool {
		self.0.strip_prefix(prefix).is_some_and(|rest| rest.starts_with(':'))
	}
}
impl Display for CacheKey {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.write_str(&self.0)
	}
}
impl From<&str> for CacheKey {
	fn from(value: &str) -> Self {
		Self::from_raw(value)
	}
}
impl From<String> for CacheKey {
	fn from(value: String) -> Self {
		Self(value)
	}
}

/// Strip surrounding slashes so `/hosts` and `hosts` share one key space.
pub fn normalize_endpoint(endpoint: &str) -> &str {
	endpoint.trim_matches('/')
}
