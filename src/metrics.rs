//! Metrics helpers and per-session telemetry bookkeeping.

// std
use std::sync::atomic::{AtomicU64, Ordering};
#[cfg(feature = "prometheus")] use std::sync::OnceLock;
// crates.io
use metrics::Label;
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use smallvec::SmallVec;
// self
use crate::_prelude::*;

type LabelSet = SmallVec<[Label; 2]>;

const METRIC_REQUESTS_TOTAL: &str = "dynacache_requests_total";
const METRIC_HITS_TOTAL: &str = "dynacache_hits_total";
const METRIC_MISSES_TOTAL: &str = "dynacache_misses_total";
const METRIC_COALESCED_TOTAL: &str = "dynacache_coalesced_total";
const METRIC_FETCH_ERRORS: &str = "dynacache_fetch_errors_total";
const METRIC_REFRESH_TOTAL: &str = "dynacache_refresh_total";
const METRIC_REFRESH_DURATION: &str = "dynacache_refresh_duration_seconds";

#[cfg(feature = "prometheus")]
static EXPORTER: OnceLock<PrometheusHandle> = OnceLock::new();

/// Thread-safe metrics accumulator for one dashboard session.
#[derive(Debug, Default)]
pub struct CacheMetrics {
	total_requests: AtomicU64,
	cache_hits: AtomicU64,
	coalesced: AtomicU64,
	fetch_errors: AtomicU64,
	refresh_runs: AtomicU64,
	refresh_skips: AtomicU64,
	refresh_timeouts: AtomicU64,
	last_refresh_micros: AtomicU64,
}
impl CacheMetrics {
	/// Create a new metrics accumulator.
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Record a read served from cache.
	pub fn record_hit(&self) {
		self.total_requests.fetch_add(1, Ordering::Relaxed);
		self.cache_hits.fetch_add(1, Ordering::Relaxed);
	}

	/// Record a read that started an upstream fetch.
	pub fn record_miss(&self) {
		self.total_requests.fetch_add(1, Ordering::Relaxed);
	}

	/// Record a read that joined an in-flight fetch.
	pub fn record_coalesced(&self) {
		self.total_requests.fetch_add(1, Ordering::Relaxed);
		self.coalesced.fetch_add(1, Ordering::Relaxed);
	}

	/// Record a failed upstream fetch.
	pub fn record_fetch_error(&self) {
		self.fetch_errors.fetch_add(1, Ordering::Relaxed);
	}

	/// Record a completed refresh cycle and its latency.
	pub fn record_refresh_run(&self, duration: Duration) {
		self.refresh_runs.fetch_add(1, Ordering::Relaxed);
		self.last_refresh_micros.store(duration.as_micros() as u64, Ordering::Relaxed);
	}

	/// Record a suppressed refresh trigger.
	pub fn record_refresh_skip(&self) {
		self.refresh_skips.fetch_add(1, Ordering::Relaxed);
	}

	/// Record a refresh cycle cleared by the safety timeout.
	pub fn record_refresh_timeout(&self) {
		self.refresh_timeouts.fetch_add(1, Ordering::Relaxed);
	}

	/// Take a point-in-time snapshot for status reporting.
	pub fn snapshot(&self) -> CacheMetricsSnapshot {
		CacheMetricsSnapshot {
			total_requests: self.total_requests.load(Ordering::Relaxed),
			cache_hits: self.cache_hits.load(Ordering::Relaxed),
			coalesced: self.coalesced.load(Ordering::Relaxed),
			fetch_errors: self.fetch_errors.load(Ordering::Relaxed),
			refresh_runs: self.refresh_runs.load(Ordering::Relaxed),
			refresh_skips: self.refresh_skips.load(Ordering::Relaxed),
			refresh_timeouts: self.refresh_timeouts.load(Ordering::Relaxed),
			last_refresh_micros: match self.last_refresh_micros.load(Ordering::Relaxed) {
				0 => None,
				value => Some(value),
			},
		}
	}
}

/// Read-only snapshot of session telemetry counters.
#[derive(Clone, Debug, PartialEq)]
pub struct CacheMetricsSnapshot {
	/// Total number of reads observed.
	pub total_requests: u64,
	/// Reads served from the cache.
	pub cache_hits: u64,
	/// Reads that joined an in-flight fetch instead of issuing their own.
	pub coalesced: u64,
	/// Upstream fetches that failed.
	pub fetch_errors: u64,
	/// Refresh cycles that ran to completion or timed out.
	pub refresh_runs: u64,
	/// Refresh triggers suppressed by single-flight, interval, or view-state rules.
	pub refresh_skips: u64,
	/// Refresh cycles cleared by the safety timeout.
	pub refresh_timeouts: u64,
	/// Microsecond latency of the most recent refresh cycle.
	pub last_refresh_micros: Option<u64>,
}
impl CacheMetricsSnapshot {
	/// Share of reads answered without a network call of their own.
	pub fn hit_rate(&self) -> f64 {
		if self.total_requests == 0 {
			0.0
		} else {
			(self.cache_hits + self.coalesced) as f64 / self.total_requests as f64
		}
	}
}

/// Install a process-wide Prometheus recorder for the `dynacache_*` series.
///
/// Returns the existing handle when one is already installed; render it to serve a scrape.
#[cfg(feature = "prometheus")]
pub fn install_default_exporter() -> Result<&'static PrometheusHandle> {
	if let Some(handle) = EXPORTER.get() {
		return Ok(handle);
	}

	let handle = PrometheusBuilder::new()
		.install_recorder()
		.map_err(|err| Error::Metrics(format!("prometheus recorder: {err}")))?;

	Ok(EXPORTER.get_or_init(|| handle))
}

/// Record a read served from cache for `category` (a `verb:endpoint` prefix).
pub fn record_cache_hit(category: &str) {
	let labels = category_labels(category);

	metrics::counter!(METRIC_REQUESTS_TOTAL, labels.iter()).increment(1);
	metrics::counter!(METRIC_HITS_TOTAL, labels.iter()).increment(1);
}

/// Record a read that required an upstream fetch.
pub fn record_cache_miss(category: &str) {
	let labels = category_labels(category);

	metrics::counter!(METRIC_REQUESTS_TOTAL, labels.iter()).increment(1);
	metrics::counter!(METRIC_MISSES_TOTAL, labels.iter()).increment(1);
}

/// Record a read that joined an in-flight fetch.
pub fn record_coalesced(category: &str) {
	let labels = category_labels(category);

	metrics::counter!(METRIC_REQUESTS_TOTAL, labels.iter()).increment(1);
	metrics::counter!(METRIC_COALESCED_TOTAL, labels.iter()).increment(1);
}

/// Record a failed upstream fetch.
pub fn record_fetch_error(category: &str) {
	metrics::counter!(METRIC_FETCH_ERRORS, category_labels(category).iter()).increment(1);
}

/// Record the outcome of a refresh trigger.
pub fn record_refresh(trigger: &'static str, outcome: &'static str) {
	let labels = [Label::new("trigger", trigger), Label::new("outcome", outcome)];

	metrics::counter!(METRIC_REFRESH_TOTAL, labels.iter()).increment(1);
}

/// Record how long a refresh cycle took.
pub fn record_refresh_duration(trigger: &'static str, duration: Duration) {
	metrics::histogram!(METRIC_REFRESH_DURATION, [Label::new("trigger", trigger)].iter())
		.record(duration.as_secs_f64());
}

fn category_labels(category: &str) -> LabelSet {
	let mut labels = LabelSet::new();

	labels.push(Label::new("category", category.to_owned()));

	labels
}
