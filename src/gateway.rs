//! Typed, cached reads against the dashboard backend.

// crates.io
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
// self
use crate::{
	_prelude::*,
	cache::{entry::CacheKey, manager::CacheManager, policy::TtlPolicy},
	http::client::Query,
	model::{
		BackendStatus, CurrentZone, DashboardCategory, Host, Listing, ManagementZone,
		ProcessGroup, Problem, Service, Summary,
	},
};

/// Categories dropped when the server-side zone selection changes.
pub const ZONE_SCOPED_CATEGORIES: [&str; 7] = [
	"get:hosts",
	"get:services",
	"get:processes",
	"get:summary",
	"get:problems",
	"get:problems-72h",
	"get:current-management-zone",
];

/// Problem status used for the live incident view.
pub const OPEN_STATUS: &str = "OPEN";

/// Named read operations over the request cache.
///
/// Each read picks its TTL from [`TtlPolicy`] by endpoint and keys the cache on the endpoint
/// plus its canonical parameters. Forced reads skip the cache lookup, still populate the cache,
/// and ask the backend to bypass its own cache with `debug=true`.
#[derive(Clone, Debug)]
pub struct DashboardGateway {
	manager: CacheManager,
	ttl: Arc<TtlPolicy>,
}
impl DashboardGateway {
	/// Build a gateway over `manager` using `ttl` windows.
	pub fn new(manager: CacheManager, ttl: TtlPolicy) -> Self {
		Self { manager, ttl: Arc::new(ttl) }
	}

	/// Request cache this gateway reads through.
	pub fn manager(&self) -> &CacheManager {
		&self.manager
	}

	/// TTL windows in use.
	pub fn ttl_policy(&self) -> &TtlPolicy {
		&self.ttl
	}

	/// Backend reachability; never cached.
	pub async fn check_status(&self) -> Result<BackendStatus> {
		self.manager.client().get_json("/status", &Query::new()).await
	}

	/// Problems filtered by `status` (`OPEN`, `CLOSED`, or all when `None`).
	pub async fn get_problems(
		&self,
		status: Option<&str>,
		force_refresh: bool,
	) -> Result<Vec<Problem>> {
		let params = status.map(|status| vec![param("status", status)]).unwrap_or_default();

		self.read_list("/problems", params, force_refresh).await
	}

	/// Problems raised during the last 72 hours.
	pub async fn get_problems_72h(&self, force_refresh: bool) -> Result<Vec<Problem>> {
		self.read_list("/problems-72h", Query::new(), force_refresh).await
	}

	/// Open problems scoped to a dashboard category.
	pub async fn get_category_problems(
		&self,
		category: DashboardCategory,
		force_refresh: bool,
	) -> Result<Vec<Problem>> {
		let params = vec![param("status", OPEN_STATUS), param("type", category.as_str())];

		self.read_list("/problems", params, force_refresh).await
	}

	/// Host entities.
	pub async fn get_hosts(&self, force_refresh: bool) -> Result<Vec<Host>> {
		self.read_list("/hosts", Query::new(), force_refresh).await
	}

	/// Service entities.
	pub async fn get_services(&self, force_refresh: bool) -> Result<Vec<Service>> {
		self.read_list("/services", Query::new(), force_refresh).await
	}

	/// Process group entities.
	pub async fn get_processes(&self, force_refresh: bool) -> Result<Vec<ProcessGroup>> {
		self.read_list("/processes", Query::new(), force_refresh).await
	}

	/// Every management zone visible to the backend.
	pub async fn get_management_zones(&self, force_refresh: bool) -> Result<Vec<ManagementZone>> {
		self.read_list("/management-zones", Query::new(), force_refresh).await
	}

	/// Management zones belonging to a dashboard category.
	pub async fn get_category_zones(
		&self,
		category: DashboardCategory,
		force_refresh: bool,
	) -> Result<Vec<ManagementZone>> {
		self.read_list(category.zones_endpoint(), Query::new(), force_refresh).await
	}

	/// Aggregate counters.
	pub async fn get_summary(&self, force_refresh: bool) -> Result<Summary> {
		self.read_one("/summary", Query::new(), force_refresh).await
	}

	/// Zone currently selected on the server.
	pub async fn get_current_management_zone(&self) -> Result<CurrentZone> {
		self.read_one("/current-management-zone", Query::new(), false).await
	}

	/// Select `zone` on the server (`None` clears the filter).
	///
	/// Every zone-scoped category is invalidated on success so the next read refetches.
	#[tracing::instrument(skip(self))]
	pub async fn set_management_zone(&self, zone: Option<&str>) -> Result<Value> {
		self.manager
			.write("/set-management-zone", &json!({ "name": zone }), &ZONE_SCOPED_CATEGORIES)
			.await
	}

	/// Ask the backend to rebuild its own cache for `cache_type` (`problems`, `hosts`, ...).
	///
	/// The matching local category is dropped on success.
	#[tracing::instrument(skip(self))]
	pub async fn trigger_server_refresh(&self, cache_type: &str) -> Result<Value> {
		let cache_type = cache_type.trim_matches('/');
		let endpoint = format!("/refresh/{cache_type}");
		let category = format!("get:{cache_type}");

		self.manager.write(&endpoint, &json!({}), &[category.as_str()]).await
	}

	/// Select `management_zone`, then load every dashboard resource concurrently.
	///
	/// Only a failed zone selection fails the whole call; each read afterwards succeeds or
	/// fails on its own and is reported per field.
	#[tracing::instrument(skip(self))]
	pub async fn load_dashboard_data(
		&self,
		management_zone: Option<&str>,
		force_refresh: bool,
	) -> Result<DashboardData> {
		if let Some(zone) = management_zone {
			self.set_management_zone(Some(zone)).await?;
		}

		let (summary, problems, problems_72h, hosts, services, processes) = tokio::join!(
			self.get_summary(force_refresh),
			self.get_problems(Some(OPEN_STATUS), force_refresh),
			self.get_problems_72h(force_refresh),
			self.get_hosts(force_refresh),
			self.get_services(force_refresh),
			self.get_processes(force_refresh),
		);
		let data = DashboardData {
			management_zone: management_zone.map(ToOwned::to_owned),
			summary,
			problems,
			problems_72h,
			hosts,
			services,
			processes,
		};

		if !data.errors().is_empty() {
			tracing::warn!(failed = ?data.errors(), "dashboard load partially failed");
		}

		Ok(data)
	}

	async fn read_one<T>(&self, endpoint: &str, params: Query, force_refresh: bool) -> Result<T>
	where
		T: Serialize + DeserializeOwned + Send + 'static,
	{
		let (key, query) = request_parts(endpoint, params, force_refresh);

		self.manager
			.fetch_json(&key, self.ttl.ttl_for_endpoint(endpoint), endpoint, query, !force_refresh)
			.await
	}

	async fn read_list<T>(
		&self,
		endpoint: &str,
		params: Query,
		force_refresh: bool,
	) -> Result<Vec<T>>
	where
		T: Serialize + DeserializeOwned + Send + 'static,
	{
		let (key, query) = request_parts(endpoint, params, force_refresh);
		let client = self.manager.client().clone();
		let path = endpoint.to_owned();

		self.manager
			.read(
				&key,
				self.ttl.ttl_for_endpoint(endpoint),
				move || async move {
					client.get_json::<Listing<T>>(&path, &query).await.map(Listing::into_vec)
				},
				!force_refresh,
			)
			.await
	}
}

/// One field of [`DashboardData`] that failed to load.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
	/// Field name (`summary`, `problems`, ...).
	pub field: String,
	/// Human-readable failure.
	pub message: String,
}

/// Result of [`DashboardGateway::load_dashboard_data`], isolated per field.
#[derive(Debug)]
pub struct DashboardData {
	/// Zone selected before the reads, if any.
	pub management_zone: Option<String>,
	/// `/summary`.
	pub summary: Result<Summary>,
	/// `/problems?status=OPEN`.
	pub problems: Result<Vec<Problem>>,
	/// `/problems-72h`.
	pub problems_72h: Result<Vec<Problem>>,
	/// `/hosts`.
	pub hosts: Result<Vec<Host>>,
	/// `/services`.
	pub services: Result<Vec<Service>>,
	/// `/processes`.
	pub processes: Result<Vec<ProcessGroup>>,
}
impl DashboardData {
	/// Failures, in field order.
	pub fn errors(&self) -> Vec<FieldError> {
		let fields: [(&str, Option<&Error>); 6] = [
			("summary", self.summary.as_ref().err()),
			("problems", self.problems.as_ref().err()),
			("problems_72h", self.problems_72h.as_ref().err()),
			("hosts", self.hosts.as_ref().err()),
			("services", self.services.as_ref().err()),
			("processes", self.processes.as_ref().err()),
		];

		fields
			.into_iter()
			.filter_map(|(field, err)| {
				err.map(|err| FieldError { field: field.into(), message: err.root().to_string() })
			})
			.collect()
	}

	/// Whether every read failed.
	pub fn is_complete_failure(&self) -> bool {
		self.errors().len() == 6
	}
}

fn param(key: &str, value: &str) -> (String, String) {
	(key.to_owned(), value.to_owned())
}

/// Cache key and wire query for a read; `debug` never enters the key.
fn request_parts(endpoint: &str, params: Query, force_refresh: bool) -> (CacheKey, Query) {
	let key = CacheKey::get(endpoint, params.iter().cloned());
	let mut query = params;

	if force_refresh {
		query.push(param("debug", "true"));
	}

	(key, query)
}
