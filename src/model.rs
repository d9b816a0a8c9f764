//! Typed views of backend payloads.
//!
//! The backend proxies Dynatrace and its JSON is loosely shaped, so decoding is lenient about
//! missing fields but strict about types: every payload is validated once, here, and the rest
//! of the crate only sees these structs.

// std
use std::fmt::{Display, Formatter, Result as FmtResult};
// crates.io
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Dashboard category with its own management-zone list and problem filter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DashboardCategory {
	/// Vital for group.
	Vfg,
	/// Vital for enterprise.
	Vfe,
	/// Detection controls.
	Detection,
	/// Security and encryption.
	Security,
}
impl DashboardCategory {
	/// Every category, in preload order.
	pub const ALL: [DashboardCategory; 4] = [Self::Vfg, Self::Vfe, Self::Detection, Self::Security];

	/// Value sent as the `type` query parameter.
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Vfg => "vfg",
			Self::Vfe => "vfe",
			Self::Detection => "detection",
			Self::Security => "security",
		}
	}

	/// Endpoint listing this category's management zones.
	pub fn zones_endpoint(self) -> &'static str {
		match self {
			Self::Vfg => "/vital-for-group-mzs",
			Self::Vfe => "/vital-for-entreprise-mzs",
			Self::Detection => "/detection-ctl-mzs",
			Self::Security => "/security-encryption-mzs",
		}
	}

	/// Whether the backend keeps problem history for this category.
	///
	/// Categories without it borrow the vfg/vfe index when annotating zones.
	pub fn has_dedicated_history(self) -> bool {
		matches!(self, Self::Vfg | Self::Vfe)
	}
}
impl Display for DashboardCategory {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Reference to a management zone embedded in other entities.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoneRef {
	/// Dynatrace zone id.
	#[serde(deserialize_with = "string_or_number")]
	pub id: String,
	/// Display name.
	pub name: String,
}

/// Problem as reported by `/problems` and `/problems-72h`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Problem {
	/// Internal problem id.
	pub problem_id: String,
	/// Human-facing id (`P-1234`).
	pub display_id: String,
	/// Title.
	pub title: String,
	/// `OPEN` or `CLOSED`.
	pub status: String,
	/// Severity (`AVAILABILITY`, `ERROR`, ...).
	pub severity_level: String,
	/// Impact (`SERVICES`, `INFRASTRUCTURE`, ...).
	pub impact_level: String,
	/// Start time in epoch milliseconds.
	pub start_time: i64,
	/// End time in epoch milliseconds; `-1` while open.
	pub end_time: i64,
	/// Zones the problem belongs to.
	pub management_zones: Vec<ZoneRef>,
}
impl Problem {
	/// Whether the problem is still open.
	pub fn is_open(&self) -> bool {
		self.status.eq_ignore_ascii_case("OPEN")
	}
}

/// Host entity.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Host {
	/// Entity id.
	pub entity_id: String,
	/// Display name.
	pub display_name: String,
	/// Remaining entity properties, kept verbatim.
	#[serde(flatten)]
	pub properties: serde_json::Map<String, Value>,
}

/// Service entity.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Service {
	/// Entity id.
	pub entity_id: String,
	/// Display name.
	pub display_name: String,
	/// Remaining entity properties, kept verbatim.
	#[serde(flatten)]
	pub properties: serde_json::Map<String, Value>,
}

/// Process group entity.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProcessGroup {
	/// Entity id.
	pub entity_id: String,
	/// Display name.
	pub display_name: String,
	/// Remaining entity properties, kept verbatim.
	#[serde(flatten)]
	pub properties: serde_json::Map<String, Value>,
}

/// Health indicator for a management zone.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoneHealth {
	/// No open problems.
	#[default]
	Healthy,
	/// At least one open problem.
	Warning,
}
impl ZoneHealth {
	/// Health implied by an open-problem count.
	pub fn from_count(problem_count: u32) -> Self {
		if problem_count == 0 { Self::Healthy } else { Self::Warning }
	}
}

/// Management zone as listed by `/management-zones` and the category endpoints.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ManagementZone {
	/// Dynatrace zone id.
	#[serde(deserialize_with = "string_or_number")]
	pub id: String,
	/// Display name.
	pub name: String,
	/// Open problem count, when known.
	pub problem_count: Option<u32>,
	/// Health indicator, when known.
	pub status: Option<ZoneHealth>,
}
impl ManagementZone {
	/// Zone with just a name.
	pub fn named(name: impl Into<String>) -> Self {
		Self { name: name.into(), ..Self::default() }
	}
}

/// Aggregate counters from `/summary`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Summary {
	/// Host count.
	pub hosts: u64,
	/// Service count.
	pub services: u64,
	/// Process group count.
	pub processes: u64,
	/// Open problem count.
	pub problems: u64,
	/// Remaining summary fields, kept verbatim.
	#[serde(flatten)]
	pub extra: serde_json::Map<String, Value>,
}

/// Backend reachability report from `/status`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendStatus {
	/// Free-form status string (`ok`, `degraded`, ...).
	pub status: String,
	/// Remaining status fields, kept verbatim.
	#[serde(flatten)]
	pub extra: serde_json::Map<String, Value>,
}

/// Current server-side zone selection from `/current-management-zone`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CurrentZone {
	/// Selected zone name; `None` when unfiltered.
	#[serde(alias = "managementZone", alias = "current")]
	pub name: Option<String>,
}

/// List response accepted either bare or wrapped in an envelope object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Listing<T> {
	/// `[ ... ]`
	Bare(Vec<T>),
	/// `{ "data": [ ... ] }` or one of the resource-named aliases.
	Wrapped {
		/// Wrapped items.
		#[serde(
			alias = "items",
			alias = "problems",
			alias = "hosts",
			alias = "services",
			alias = "processes",
			alias = "managementZones",
			alias = "zones"
		)]
		data: Vec<T>,
	},
}
impl<T> Listing<T> {
	/// Unwrap into the item list.
	pub fn into_vec(self) -> Vec<T> {
		match self {
			Self::Bare(items) | Self::Wrapped { data: items } => items,
		}
	}
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
	D: Deserializer<'de>,
{
	Ok(match Value::deserialize(deserializer)? {
		Value::String(s) => s,
		Value::Number(n) => n.to_string(),
		Value::Null => String::new(),
		other => other.to_string(),
	})
}
