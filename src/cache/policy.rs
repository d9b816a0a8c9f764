//! Category TTL policy table.

// crates.io
use serde::{Deserialize, Serialize};
// self
use crate::_prelude::*;

/// Active problems change quickly.
pub const PROBLEMS_TTL: Duration = Duration::from_secs(60);
/// 72-hour problem history.
pub const PROBLEMS_72H_TTL: Duration = Duration::from_secs(5 * 60);
/// Environment summary.
pub const SUMMARY_TTL: Duration = Duration::from_secs(5 * 60);
/// Management zone lists and the current selection.
pub const MANAGEMENT_ZONES_TTL: Duration = Duration::from_secs(10 * 60);
/// Host and service inventories.
pub const ENTITIES_TTL: Duration = Duration::from_secs(15 * 60);
/// Process group inventory.
pub const PROCESSES_TTL: Duration = Duration::from_secs(30 * 60);
/// Per-category zone counts.
pub const COUNTS_TTL: Duration = Duration::from_secs(60 * 60);
/// Anything not listed above.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// Resource categories that carry their own TTL.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TtlCategory {
	/// `/problems`.
	Problems,
	/// `/problems-72h`.
	#[serde(rename = "problems-72h")]
	Problems72h,
	/// `/summary`.
	Summary,
	/// `/management-zones` and `/current-management-zone`.
	ManagementZones,
	/// `/hosts`.
	Hosts,
	/// `/services`.
	Services,
	/// `/processes`.
	Processes,
	/// Dashboard category zone lists (`/*-mzs`).
	Counts,
	/// Fallback.
	Default,
}
impl TtlCategory {
	/// Map an endpoint path (with or without slashes) onto its TTL category.
	pub fn for_endpoint(endpoint: &str) -> Self {
		match endpoint.trim_matches('/') {
			"problems" => Self::Problems,
			"problems-72h" => Self::Problems72h,
			"summary" => Self::Summary,
			"management-zones" | "current-management-zone" => Self::ManagementZones,
			"hosts" => Self::Hosts,
			"services" => Self::Services,
			"processes" => Self::Processes,
			other if other.ends_with("-mzs") => Self::Counts,
			_ => Self::Default,
		}
	}
}

/// Static category → TTL mapping; every window is configurable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TtlPolicy {
	/// TTL for [`TtlCategory::Problems`].
	pub problems: Duration,
	/// TTL for [`TtlCategory::Problems72h`].
	pub problems_72h: Duration,
	/// TTL for [`TtlCategory::Summary`].
	pub summary: Duration,
	/// TTL for [`TtlCategory::ManagementZones`].
	pub management_zones: Duration,
	/// TTL for [`TtlCategory::Hosts`].
	pub hosts: Duration,
	/// TTL for [`TtlCategory::Services`].
	pub services: Duration,
	/// TTL for [`TtlCategory::Processes`].
	pub processes: Duration,
	/// TTL for [`TtlCategory::Counts`].
	pub counts: Duration,
	/// TTL for everything else.
	pub default: Duration,
}
impl TtlPolicy {
	/// TTL configured for `category`.
	pub fn ttl(&self, category: TtlCategory) -> Duration {
		match category {
			TtlCategory::Problems => self.problems,
			TtlCategory::Problems72h => self.problems_72h,
			TtlCategory::Summary => self.summary,
			TtlCategory::ManagementZones => self.management_zones,
			TtlCategory::Hosts => self.hosts,
			TtlCategory::Services => self.services,
			TtlCategory::Processes => self.processes,
			TtlCategory::Counts => self.counts,
			TtlCategory::Default => self.default,
		}
	}

	/// TTL for the category owning `endpoint`.
	pub fn ttl_for_endpoint(&self, endpoint: &str) -> Duration {
		self.ttl(TtlCategory::for_endpoint(endpoint))
	}

	/// Reject zero windows, which would make every read a miss.
	pub fn validate(&self) -> Result<()> {
		let windows = [
			("ttl.problems", self.problems),
			("ttl.problems_72h", self.problems_72h),
			("ttl.summary", self.summary),
			("ttl.management_zones", self.management_zones),
			("ttl.hosts", self.hosts),
			("ttl.services", self.services),
			("ttl.processes", self.processes),
			("ttl.counts", self.counts),
			("ttl.default", self.default),
		];

		for (field, ttl) in windows {
			if ttl.is_zero() {
				return Err(Error::Validation { field, reason: "Must be greater than zero.".into() });
			}
		}

		Ok(())
	}
}
impl Default for TtlPolicy {
	fn default() -> Self {
		Self {
			problems: PROBLEMS_TTL,
			problems_72h: PROBLEMS_72H_TTL,
			summary: SUMMARY_TTL,
			management_zones: MANAGEMENT_ZONES_TTL,
			hosts: ENTITIES_TTL,
			services: ENTITIES_TTL,
			processes: PROCESSES_TTL,
			counts: COUNTS_TTL,
			default: DEFAULT_TTL,
		}
	}
}
