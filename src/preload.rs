//! Zone-status preloading: a per-category `zone -> {count, status}` index kept warm in durable
//! storage so zone lists render health indicators without waiting on the backend.

// std
use std::{
	collections::BTreeMap,
	fmt::{Debug, Formatter, Result as FmtResult},
	path::PathBuf,
};
// crates.io
use futures::{
	FutureExt,
	future::{self, BoxFuture, Shared},
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::{
	task::JoinHandle,
	time::{self, MissedTickBehavior},
};
// self
use crate::{
	_prelude::*,
	cache::{entry::CacheKey, store::TtlCache},
	gateway::{DashboardGateway, FieldError},
	model::{DashboardCategory, ManagementZone, Problem, ZoneHealth},
};

/// Persisted maps older than this are ignored.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(30 * 60);
/// Period of the background re-warm.
pub const DEFAULT_PRELOAD_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Zone name to status, per category.
pub type ZoneStatusMap = BTreeMap<String, ZoneStatus>;

type Run = Shared<BoxFuture<'static, PreloadReport>>;

/// Preloader configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreloadPolicy {
	/// Age after which a persisted map is treated as absent.
	pub max_age: Duration,
	/// Period of [`ZoneStatusPreloader::spawn_periodic`].
	pub interval: Duration,
	/// File backing the index; in-memory when unset.
	pub storage_path: Option<PathBuf>,
}
impl PreloadPolicy {
	/// Validate invariants for preload configuration.
	pub fn validate(&self) -> Result<()> {
		if self.max_age.is_zero() {
			return Err(Error::Validation {
				field: "preload.max_age",
				reason: "Must be greater than zero.".into(),
			});
		}
		if self.interval.is_zero() {
			return Err(Error::Validation {
				field: "preload.interval",
				reason: "Must be greater than zero.".into(),
			});
		}

		Ok(())
	}
}
impl Default for PreloadPolicy {
	fn default() -> Self {
		Self { max_age: DEFAULT_MAX_AGE, interval: DEFAULT_PRELOAD_INTERVAL, storage_path: None }
	}
}

/// Health of one zone.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneStatus {
	/// Open problems attributed to the zone.
	pub problem_count: u32,
	/// Derived indicator.
	pub status: ZoneHealth,
}
impl ZoneStatus {
	/// Status for `problem_count` open problems.
	pub fn from_count(problem_count: u32) -> Self {
		Self { problem_count, status: ZoneHealth::from_count(problem_count) }
	}
}

/// Outcome of one [`ZoneStatusPreloader::preload`] run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PreloadReport {
	/// Categories whose map was rebuilt and persisted, with their zone count.
	pub refreshed: BTreeMap<DashboardCategory, usize>,
	/// Categories that failed; their previous map is left in place.
	pub errors: Vec<FieldError>,
}

/// Builds, persists, and applies the zone-status index.
#[derive(Clone)]
pub struct ZoneStatusPreloader {
	gateway: DashboardGateway,
	store: TtlCache,
	policy: Arc<PreloadPolicy>,
	running: Arc<Mutex<Option<Run>>>,
}
impl ZoneStatusPreloader {
	/// Build a preloader persisting into `store`.
	pub fn new(gateway: DashboardGateway, store: TtlCache, policy: PreloadPolicy) -> Self {
		Self { gateway, store, policy: Arc::new(policy), running: Arc::new(Mutex::new(None)) }
	}

	/// Store holding the persisted maps.
	pub fn store(&self) -> &TtlCache {
		&self.store
	}

	/// Rebuild every category map from the backend.
	///
	/// Categories are read concurrently; `force` bypasses the request cache. A call arriving
	/// while a run is active joins it.
	pub async fn preload(&self, force: bool) -> PreloadReport {
		let run = {
			let mut running = self.running.lock();

			if let Some(run) = running.as_ref() {
				tracing::debug!("joining running preload");

				run.clone()
			} else {
				let run = self.run(force).shared();

				*running = Some(run.clone());
				tokio::spawn(run.clone());

				run
			}
		};

		run.await
	}

	/// Persisted map for `category`, unless missing, undecodable, or older than `max_age`.
	pub fn load_persisted(&self, category: DashboardCategory) -> Option<ZoneStatusMap> {
		let now = Utc::now();
		let entry = self.store.entry_at(&storage_key(category), now)?;

		if entry.age_at(now) > self.policy.max_age {
			tracing::debug!(%category, "persisted zone status is stale");

			return None;
		}

		match serde_json::from_value(entry.value) {
			Ok(map) => Some(map),
			Err(err) => {
				tracing::warn!(%category, error = %err, "discarding unreadable zone status");

				None
			},
		}
	}

	/// Annotate `zones` with problem counts and health from the index.
	///
	/// Matching is best effort: exact name, then case-insensitive substring either way, then
	/// the vfg and vfe maps for categories without their own history. A zone missing from an
	/// existing index is healthy; without any index the zone is returned untouched.
	pub fn apply_preloaded(
		&self,
		zones: Vec<ManagementZone>,
		category: DashboardCategory,
	) -> Vec<ManagementZone> {
		let primary = self.load_persisted(category);
		let fallbacks: Vec<ZoneStatusMap> = if category.has_dedicated_history() {
			Vec::new()
		} else {
			[DashboardCategory::Vfg, DashboardCategory::Vfe]
				.into_iter()
				.filter_map(|fallback| self.load_persisted(fallback))
				.collect()
		};

		annotate(zones, primary.as_ref(), &fallbacks)
	}

	/// Spawn the re-warm timer; it preloads immediately and then every `interval`.
	///
	/// Abort the handle to stop it.
	pub fn spawn_periodic(&self) -> JoinHandle<()> {
		let preloader = self.clone();
		let period = self.policy.interval;

		tokio::spawn(async move {
			let mut ticker = time::interval(period);

			ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

			loop {
				ticker.tick().await;

				let report = preloader.preload(false).await;

				if !report.errors.is_empty() {
					tracing::warn!(errors = ?report.errors, "zone status preload partially failed");
				}
			}
		})
	}

	fn run(&self, force: bool) -> BoxFuture<'static, PreloadReport> {
		let gateway = self.gateway.clone();
		let store = self.store.clone();
		let max_age = self.policy.max_age;
		let running = self.running.clone();

		async move {
			let reads = DashboardCategory::ALL.map(|category| {
				let gateway = gateway.clone();

				async move { (category, gateway.get_category_problems(category, force).await) }
			});
			let mut report = PreloadReport::default();

			for (category, result) in future::join_all(reads).await {
				let persisted = result.and_then(|problems| {
					let map = fold_problems(&problems);

					store.set_json(&storage_key(category), &map, max_age)?;

					Ok(map.len())
				});

				match persisted {
					Ok(zones) => {
						report.refreshed.insert(category, zones);
					},
					Err(err) => {
						tracing::warn!(%category, error = %err, "zone status preload failed");

						report.errors.push(FieldError {
							field: category.as_str().into(),
							message: err.root().to_string(),
						});
					},
				}
			}

			*running.lock() = None;

			tracing::debug!(
				refreshed = report.refreshed.len(),
				failed = report.errors.len(),
				"preload finished"
			);

			report
		}
		.boxed()
	}
}
impl Debug for ZoneStatusPreloader {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.debug_struct("ZoneStatusPreloader")
			.field("policy", &self.policy)
			.field("running", &self.running.lock().is_some())
			.finish()
	}
}

/// Count open problems per zone name.
pub fn fold_problems(problems: &[Problem]) -> ZoneStatusMap {
	let mut counts = BTreeMap::<String, u32>::new();

	for problem in problems.iter().filter(|problem| !problem.status.eq_ignore_ascii_case("CLOSED")) {
		for zone in &problem.management_zones {
			if !zone.name.is_empty() {
				*counts.entry(zone.name.clone()).or_default() += 1;
			}
		}
	}

	counts.into_iter().map(|(name, count)| (name, ZoneStatus::from_count(count))).collect()
}

fn annotate(
	zones: Vec<ManagementZone>,
	primary: Option<&ZoneStatusMap>,
	fallbacks: &[ZoneStatusMap],
) -> Vec<ManagementZone> {
	zones
		.into_iter()
		.map(|mut zone| {
			let found = primary
				.and_then(|map| lookup(map, &zone.name))
				.or_else(|| fallbacks.iter().find_map(|map| lookup(map, &zone.name)))
				.or_else(|| primary.map(|_| ZoneStatus::from_count(0)));

			if let Some(status) = found {
				zone.problem_count = Some(status.problem_count);
				zone.status = Some(status.status);
			}

			zone
		})
		.collect()
}

fn lookup(map: &ZoneStatusMap, name: &str) -> Option<ZoneStatus> {
	if name.is_empty() {
		return None;
	}
	if let Some(status) = map.get(name) {
		return Some(*status);
	}

	let needle = name.to_lowercase();

	map.iter()
		.find(|(candidate, _)| {
			let candidate = candidate.to_lowercase();

			candidate.contains(&needle) || needle.contains(&candidate)
		})
		.map(|(_, status)| *status)
}

fn storage_key(category: DashboardCategory) -> CacheKey {
	CacheKey::from_raw(format!("zone_status:{category}"))
}
