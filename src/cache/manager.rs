//! Request cache: TTL lookups, single-flight de-duplication, and write invalidation.

// std
use std::{
	collections::HashMap,
	fmt::{Debug, Formatter, Result as FmtResult},
	future::Future,
	sync::atomic::{AtomicU64, Ordering},
};
// crates.io
use futures::{
	FutureExt,
	future::{BoxFuture, Shared},
};
use parking_lot::Mutex;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
// self
use crate::{
	_prelude::*,
	cache::{entry::CacheKey, store::TtlCache},
	http::client::{ApiClient, Query},
	metrics::{self, CacheMetrics},
};

type FlightOutput = std::result::Result<Value, Arc<Error>>;
type Flight = Shared<BoxFuture<'static, FlightOutput>>;

/// Coordinates cache lookups and upstream fetches for every logical read.
///
/// At most one fetch is in flight per [`CacheKey`]: callers arriving while it runs share its
/// outcome, success or failure. Failures are never cached. Invalidating a category detaches its
/// in-flight fetches: later reads start over and the detached result is never cached.
#[derive(Clone, Debug)]
pub struct CacheManager {
	client: ApiClient,
	cache: TtlCache,
	pending: Arc<PendingTable>,
	metrics: Arc<CacheMetrics>,
}
impl CacheManager {
	/// Build a manager over `cache` issuing requests through `client`.
	pub fn new(client: ApiClient, cache: TtlCache) -> Self {
		Self::with_metrics(client, cache, CacheMetrics::new())
	}

	/// Build a manager sharing an existing metrics accumulator.
	pub fn with_metrics(client: ApiClient, cache: TtlCache, metrics: Arc<CacheMetrics>) -> Self {
		Self { client, cache, pending: Arc::new(PendingTable::default()), metrics }
	}

	/// Transport used for uncached calls.
	pub fn client(&self) -> &ApiClient {
		&self.client
	}

	/// Underlying TTL store.
	pub fn cache(&self) -> &TtlCache {
		&self.cache
	}

	/// Per-session metrics accumulator.
	pub fn metrics(&self) -> Arc<CacheMetrics> {
		self.metrics.clone()
	}

	/// Number of fetches currently in flight.
	pub fn pending_len(&self) -> usize {
		self.pending.flights.lock().len()
	}

	/// Resolve `key`, serving from cache when allowed and otherwise running `fetcher` once.
	///
	/// 1. With `use_cache`, a fresh cached value is returned without any network call.
	/// 2. A fetch already in flight for `key` is joined, even when `use_cache` is false.
	/// 3. Otherwise `fetcher` starts; its success is cached for `ttl`.
	///
	/// The fetch runs on its own task, so the pending entry is cleared when it settles even
	/// if every caller stops awaiting.
	pub async fn read<T, F, Fut>(
		&self,
		key: &CacheKey,
		ttl: Duration,
		fetcher: F,
		use_cache: bool,
	) -> Result<T>
	where
		T: Serialize + DeserializeOwned + Send + 'static,
		F: FnOnce() -> Fut,
		Fut: Future<Output = Result<T>> + Send + 'static,
	{
		let category = key.resource_prefix();
		let flight = {
			let mut flights = self.pending.flights.lock();

			if use_cache && let Some(value) = self.cache.get(key) {
				drop(flights);

				tracing::debug!(key = %key, "cache hit");
				self.observe_hit(&category);

				return Ok(serde_json::from_value(value)?);
			}

			if let Some(existing) = flights.get(key) {
				tracing::debug!(key = %key, "joining in-flight request");
				self.observe_coalesced(&category);

				existing.flight.clone()
			} else {
				tracing::debug!(key = %key, use_cache, "cache miss; fetching");
				self.observe_miss(&category);

				let id = self.pending.next_id.fetch_add(1, Ordering::Relaxed);
				let flight = self.flight(key.clone(), id, ttl, fetcher()).shared();

				flights.insert(key.clone(), Pending { id, flight: flight.clone() });
				tokio::spawn(flight.clone());

				flight
			}
		};

		match flight.await {
			Ok(value) => Ok(serde_json::from_value(value)?),
			Err(err) => Err(Error::Shared(err)),
		}
	}

	/// `GET endpoint` through [`read`](Self::read), keyed on `key`.
	pub async fn fetch_json<T>(
		&self,
		key: &CacheKey,
		ttl: Duration,
		endpoint: &str,
		query: Query,
		use_cache: bool,
	) -> Result<T>
	where
		T: Serialize + DeserializeOwned + Send + 'static,
	{
		let client = self.client.clone();
		let endpoint = endpoint.to_owned();

		self.read(key, ttl, move || async move { client.get_json(&endpoint, &query).await }, use_cache)
			.await
	}

	/// `POST endpoint` unconditionally; on success drop every category in `invalidate`.
	#[tracing::instrument(skip(self, body, invalidate))]
	pub async fn write<B, T>(&self, endpoint: &str, body: &B, invalidate: &[&str]) -> Result<T>
	where
		B: Serialize + ?Sized,
		T: DeserializeOwned,
	{
		let response = self.client.post_json(endpoint, body).await?;

		for prefix in invalidate {
			self.invalidate_category(prefix);
		}

		Ok(response)
	}

	/// Drop every cached entry under `prefix` and detach its in-flight fetches.
	///
	/// Returns the number of cached entries removed.
	pub fn invalidate_category(&self, prefix: &str) -> usize {
		let mut flights = self.pending.flights.lock();
		let before = flights.len();

		flights.retain(|key, _| !key.in_category(prefix));

		if flights.len() != before {
			tracing::debug!(prefix, detached = before - flights.len(), "detached in-flight requests");
		}

		self.cache.invalidate_category(prefix)
	}

	fn flight<T, Fut>(
		&self,
		key: CacheKey,
		id: u64,
		ttl: Duration,
		fetch: Fut,
	) -> BoxFuture<'static, FlightOutput>
	where
		T: Serialize + Send + 'static,
		Fut: Future<Output = Result<T>> + Send + 'static,
	{
		let cache = self.cache.clone();
		let pending = self.pending.clone();
		let counters = self.metrics.clone();

		async move {
			let outcome = fetch
				.await
				.and_then(|value| serde_json::to_value(value).map_err(Error::from))
				.map_err(Arc::new);
			// Populate and unregister under the table lock so a concurrent reader sees either
			// the pending flight or the cached value, never neither.
			let mut flights = pending.flights.lock();
			let attached = flights.get(&key).is_some_and(|pending| pending.id == id);

			match &outcome {
				Ok(value) if attached => cache.set(&key, value.clone(), ttl),
				Ok(_) => tracing::debug!(key = %key, "detached request settled; not caching"),
				Err(err) => {
					tracing::debug!(key = %key, error = %err, "fetch failed; not caching");

					metrics::record_fetch_error(&key.resource_prefix());
					counters.record_fetch_error();
				},
			}

			if attached {
				flights.remove(&key);
			}

			outcome
		}
		.boxed()
	}

	fn observe_hit(&self, category: &str) {
		metrics::record_cache_hit(category);

		self.metrics.record_hit();
	}

	fn observe_miss(&self, category: &str) {
		metrics::record_cache_miss(category);

		self.metrics.record_miss();
	}

	fn observe_coalesced(&self, category: &str) {
		metrics::record_coalesced(category);

		self.metrics.record_coalesced();
	}
}

#[derive(Default)]
struct PendingTable {
	flights: Mutex<HashMap<CacheKey, Pending>>,
	next_id: AtomicU64,
}
impl Debug for PendingTable {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.debug_struct("PendingTable").field("in_flight", &self.flights.lock().len()).finish()
	}
}

struct Pending {
	id: u64,
	flight: Flight,
}
