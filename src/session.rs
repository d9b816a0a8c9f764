//! Session configuration and wiring.
//!
//! A [`DashboardSession`] owns one instance of every component for the lifetime of a dashboard
//! session; nothing in the crate is global apart from the optional metrics exporter.

// std
use std::{fs, path::Path};
// crates.io
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use url::Url;
// self
use crate::{
	_prelude::*,
	cache::{manager::CacheManager, policy::TtlPolicy, store::TtlCache},
	gateway::DashboardGateway,
	http::{client::ApiClient, retry::RetryPolicy},
	metrics::{CacheMetrics, CacheMetricsSnapshot},
	preload::{PreloadPolicy, ZoneStatusPreloader},
	refresh::{RefreshCoordinator, RefreshPolicy},
};

/// Complete session configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardConfig {
	/// Backend base URL, e.g. `https://dashboard.example.com/api`.
	pub base_url: Url,
	/// Transport retry behaviour.
	#[serde(default)]
	pub retry: RetryPolicy,
	/// Request cache windows.
	#[serde(default)]
	pub ttl: TtlPolicy,
	/// Refresh coordinator windows.
	#[serde(default)]
	pub refresh: RefreshPolicy,
	/// Zone-status preloader settings.
	#[serde(default)]
	pub preload: PreloadPolicy,
}
impl DashboardConfig {
	/// Defaults for everything but the base URL.
	pub fn new(base_url: Url) -> Self {
		Self {
			base_url,
			retry: RetryPolicy::default(),
			ttl: TtlPolicy::default(),
			refresh: RefreshPolicy::default(),
			preload: PreloadPolicy::default(),
		}
	}

	/// Load and validate a JSON configuration file.
	pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
		let config: Self = serde_json::from_slice(&fs::read(path)?)?;

		config.validate()?;

		Ok(config)
	}

	/// Validate the configuration against the documented constraints.
	pub fn validate(&self) -> Result<()> {
		if !matches!(self.base_url.scheme(), "http" | "https") {
			return Err(Error::Validation {
				field: "base_url",
				reason: "Scheme must be http or https.".into(),
			});
		}
		if self.base_url.host_str().is_none() {
			return Err(Error::Validation {
				field: "base_url",
				reason: "Must include a host component.".into(),
			});
		}

		self.retry.validate()?;
		self.ttl.validate()?;
		self.refresh.validate()?;
		self.preload.validate()?;

		Ok(())
	}
}

/// Builder for [`DashboardSession`].
#[derive(Debug)]
pub struct SessionBuilder {
	config: DashboardConfig,
	http_client: Option<reqwest::Client>,
}
impl SessionBuilder {
	/// Start from defaults against `base_url`.
	pub fn new(base_url: Url) -> Self {
		Self::from_config(DashboardConfig::new(base_url))
	}

	/// Start from a loaded configuration.
	pub fn from_config(config: DashboardConfig) -> Self {
		Self { config, http_client: None }
	}

	/// Override the transport retry policy.
	pub fn retry(mut self, retry: RetryPolicy) -> Self {
		self.config.retry = retry;

		self
	}

	/// Override the request cache windows.
	pub fn ttl(mut self, ttl: TtlPolicy) -> Self {
		self.config.ttl = ttl;

		self
	}

	/// Override the refresh coordinator windows.
	pub fn refresh(mut self, refresh: RefreshPolicy) -> Self {
		self.config.refresh = refresh;

		self
	}

	/// Override the preloader settings.
	pub fn preload(mut self, preload: PreloadPolicy) -> Self {
		self.config.preload = preload;

		self
	}

	/// Persist the zone-status index at `path`.
	pub fn storage_path(mut self, path: impl AsRef<Path>) -> Self {
		self.config.preload.storage_path = Some(path.as_ref().to_path_buf());

		self
	}

	/// Use a preconfigured reqwest client (proxies, custom TLS roots).
	pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
		self.http_client = Some(client);

		self
	}

	/// Validate the configuration and wire every component.
	pub fn build(self) -> Result<DashboardSession> {
		let config = self.config;

		config.validate()?;

		let client = match self.http_client {
			Some(client) => ApiClient::with_client(config.base_url.clone(), config.retry.clone(), client),
			None => ApiClient::new(config.base_url.clone(), config.retry.clone())?,
		};
		let metrics = CacheMetrics::new();
		let manager = CacheManager::with_metrics(client, TtlCache::in_memory(), metrics.clone());
		let gateway = DashboardGateway::new(manager, config.ttl.clone());
		let coordinator = RefreshCoordinator::new(gateway.clone(), config.refresh.clone());
		let preload_store = match &config.preload.storage_path {
			Some(path) => TtlCache::durable(path)?,
			None => TtlCache::in_memory(),
		};
		let preloader = ZoneStatusPreloader::new(gateway.clone(), preload_store, config.preload.clone());

		tracing::info!(base_url = %config.base_url, "dashboard session ready");

		Ok(DashboardSession { config: Arc::new(config), gateway, coordinator, preloader, metrics })
	}
}

/// One dashboard session: request cache, gateway, coordinator, and preloader.
#[derive(Clone, Debug)]
pub struct DashboardSession {
	config: Arc<DashboardConfig>,
	gateway: DashboardGateway,
	coordinator: RefreshCoordinator,
	preloader: ZoneStatusPreloader,
	metrics: Arc<CacheMetrics>,
}
impl DashboardSession {
	/// Create a [`SessionBuilder`] against `base_url`.
	pub fn builder(base_url: Url) -> SessionBuilder {
		SessionBuilder::new(base_url)
	}

	/// Effective configuration.
	pub fn config(&self) -> &DashboardConfig {
		&self.config
	}

	/// Typed backend reads.
	pub fn gateway(&self) -> &DashboardGateway {
		&self.gateway
	}

	/// Refresh coordinator.
	pub fn coordinator(&self) -> &RefreshCoordinator {
		&self.coordinator
	}

	/// Zone-status preloader.
	pub fn preloader(&self) -> &ZoneStatusPreloader {
		&self.preloader
	}

	/// Snapshot of request-cache and refresh counters.
	pub fn metrics(&self) -> CacheMetricsSnapshot {
		self.metrics.snapshot()
	}

	/// Start the scheduled refresh timer and the periodic preload.
	pub fn spawn_background(&self) -> BackgroundTasks {
		BackgroundTasks {
			scheduled_refresh: self.coordinator.spawn_scheduled(),
			periodic_preload: self.preloader.spawn_periodic(),
		}
	}
}

/// Handles of the session's timer tasks; dropping it stops them.
#[derive(Debug)]
pub struct BackgroundTasks {
	scheduled_refresh: JoinHandle<()>,
	periodic_preload: JoinHandle<()>,
}
impl BackgroundTasks {
	/// Stop both timers.
	pub fn shutdown(self) {
		drop(self);
	}
}
impl Drop for BackgroundTasks {
	fn drop(&mut self) {
		self.scheduled_refresh.abort();
		self.periodic_preload.abort();
	}
}
