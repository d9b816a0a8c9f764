//! Expiring key-value store shared by every other component.

// std
use std::path::Path;
// crates.io
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
// self
use crate::{
	_prelude::*,
	cache::{
		backend::{CacheBackend, FileBackend, MemoryBackend},
		entry::{CacheEntry, CacheKey},
	},
};

/// TTL cache over a pluggable [`CacheBackend`].
///
/// Expiry is lazy: an entry past its deadline is treated as absent and purged by the read
/// that notices it. There is no background sweeper.
#[derive(Clone, Debug)]
pub struct TtlCache {
	backend: Arc<dyn CacheBackend>,
}
impl TtlCache {
	/// Session-scoped in-memory cache.
	pub fn in_memory() -> Self {
		Self::with_backend(Arc::new(MemoryBackend::new()))
	}

	/// Durable cache persisted at `path`.
	pub fn durable(path: impl AsRef<Path>) -> Result<Self> {
		Ok(Self::with_backend(Arc::new(FileBackend::open(path)?)))
	}

	/// Wrap a caller-supplied backend.
	pub fn with_backend(backend: Arc<dyn CacheBackend>) -> Self {
		Self { backend }
	}

	/// Store `value` under `key` for `ttl`, overwriting any previous entry.
	pub fn set(&self, key: &CacheKey, value: Value, ttl: Duration) {
		self.set_at(key, value, ttl, Utc::now());
	}

	/// [`set`](Self::set) with an explicit write time.
	pub fn set_at(&self, key: &CacheKey, value: Value, ttl: Duration, now: DateTime<Utc>) {
		self.backend.write(key.as_str(), CacheEntry::new(value, ttl, now));
	}

	/// Serialise and store a typed value.
	pub fn set_json<T>(&self, key: &CacheKey, value: &T, ttl: Duration) -> Result<()>
	where
		T: Serialize,
	{
		self.set(key, serde_json::to_value(value)?, ttl);

		Ok(())
	}

	/// Fresh value for `key`, if any.
	pub fn get(&self, key: &CacheKey) -> Option<Value> {
		self.get_at(key, Utc::now())
	}

	/// [`get`](Self::get) evaluated at `now`.
	pub fn get_at(&self, key: &CacheKey, now: DateTime<Utc>) -> Option<Value> {
		self.entry_at(key, now).map(|entry| entry.value)
	}

	/// Fresh entry (value plus timestamps) for `key` evaluated at `now`.
	pub fn entry_at(&self, key: &CacheKey, now: DateTime<Utc>) -> Option<CacheEntry<Value>> {
		let entry = self.backend.read(key.as_str())?;

		if entry.is_valid_at(now) {
			return Some(entry);
		}

		// Only purge if nobody overwrote the entry with a fresh one in the meantime.
		if self.backend.remove_if(key.as_str(), &|stored: &CacheEntry<Value>| !stored.is_valid_at(now))
		{
			tracing::debug!(key = %key, "purged expired cache entry");
		}

		None
	}

	/// Fresh value for `key` deserialised into `T`.
	///
	/// A payload that no longer matches `T` is dropped and reported as a miss.
	pub fn get_json<T>(&self, key: &CacheKey) -> Option<T>
	where
		T: DeserializeOwned,
	{
		let value = self.get(key)?;

		match serde_json::from_value(value) {
			Ok(typed) => Some(typed),
			Err(err) => {
				tracing::warn!(key = %key, error = %err, "dropping cache entry with unexpected shape");

				self.delete(key);

				None
			},
		}
	}

	/// Whether a fresh entry exists for `key`.
	pub fn has(&self, key: &CacheKey) -> bool {
		self.has_at(key, Utc::now())
	}

	/// [`has`](Self::has) evaluated at `now`.
	pub fn has_at(&self, key: &CacheKey, now: DateTime<Utc>) -> bool {
		self.entry_at(key, now).is_some()
	}

	/// Remove `key`; no-op when absent.
	pub fn delete(&self, key: &CacheKey) {
		self.backend.remove_if(key.as_str(), &|_: &CacheEntry<Value>| true);
	}

	/// Remove every entry whose key starts with `prefix:`; returns the number removed.
	pub fn invalidate_category(&self, prefix: &str) -> usize {
		let removed = self.backend.retain(&|key: &str, _: &CacheEntry<Value>| {
			!CacheKey::from_raw(key).in_category(prefix)
		});

		tracing::debug!(prefix, removed, "invalidated cache category");

		removed
	}

	/// Remove everything.
	pub fn clear(&self) {
		self.backend.retain(&|_: &str, _: &CacheEntry<Value>| false);
	}

	/// Stored entry count, including expired entries not yet touched.
	pub fn len(&self) -> usize {
		self.backend.len()
	}

	/// Whether the backend holds no entries.
	pub fn is_empty(&self) -> bool {
		self.backend.is_empty()
	}
}
