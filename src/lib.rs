//! Async request cache, single-flight client, refresh coordination, and zone-status preloading
//! for Dynatrace monitoring dashboards.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod cache;
pub mod gateway;
pub mod http;
pub mod metrics;
pub mod model;
pub mod preload;
pub mod refresh;

mod error;
mod session;
mod _prelude {
	pub use std::{sync::Arc, time::Duration};

	pub use chrono::{DateTime, TimeDelta, Utc};
	pub use tokio::time::Instant;

	pub use crate::{Error, Result};
}

#[cfg(feature = "prometheus")] pub use crate::metrics::install_default_exporter;
pub use crate::{
	cache::{CacheKey, CacheManager, TtlCache, TtlPolicy},
	error::{Error, Result},
	gateway::{DashboardData, DashboardGateway, FieldError},
	http::{client::ApiClient, retry::RetryPolicy},
	metrics::{CacheMetrics, CacheMetricsSnapshot},
	model::DashboardCategory,
	preload::{PreloadPolicy, PreloadReport, ZoneStatus, ZoneStatusMap, ZoneStatusPreloader},
	refresh::{
		DashboardView, RefreshCoordinator, RefreshOutcome, RefreshPolicy, RefreshReport,
		RefreshTrigger, SkipReason,
	},
	session::{BackgroundTasks, DashboardConfig, DashboardSession, SessionBuilder},
};
