//! Refresh coordination: one dashboard reload at a time, whatever asked for it.

// std
use std::{
	collections::HashMap,
	fmt::{Debug, Formatter, Result as FmtResult},
};
// crates.io
use futures::{
	FutureExt,
	future::{BoxFuture, Shared},
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::{
	sync::watch,
	task::JoinHandle,
	time::{self, MissedTickBehavior},
};
// self
use crate::{
	_prelude::*,
	gateway::{DashboardData, DashboardGateway, FieldError},
	metrics::{self, CacheMetrics},
	model::{Host, ProcessGroup, Problem, Service, Summary},
};

/// Minimum gap between opportunistic background refreshes.
pub const DEFAULT_BACKGROUND_INTERVAL: Duration = Duration::from_secs(60);
/// Period of the scheduled refresh timer, also its minimum gap.
pub const DEFAULT_SCHEDULED_INTERVAL: Duration = Duration::from_secs(10 * 60);
/// Upper bound on a single refresh cycle.
pub const DEFAULT_SAFETY_TIMEOUT: Duration = Duration::from_secs(60);
/// How long a visited route's view state counts as fresh.
pub const DEFAULT_VIEW_STATE_TTL: Duration = Duration::from_secs(5 * 60);

type Cycle = Shared<BoxFuture<'static, RefreshReport>>;

/// Timing windows for the coordinator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshPolicy {
	/// Floor for [`RefreshTrigger::Background`].
	pub background_interval: Duration,
	/// Timer period and floor for [`RefreshTrigger::Scheduled`].
	pub scheduled_interval: Duration,
	/// A cycle still running after this long is abandoned.
	pub safety_timeout: Duration,
	/// Window during which navigating back to a route skips the reload.
	pub view_state_ttl: Duration,
}
impl RefreshPolicy {
	/// Minimum time since the last success before `trigger` may run, if it has one.
	pub fn floor(&self, trigger: RefreshTrigger) -> Option<Duration> {
		match trigger {
			RefreshTrigger::Background => Some(self.background_interval),
			RefreshTrigger::Scheduled => Some(self.scheduled_interval),
			_ => None,
		}
	}

	/// Validate invariants for refresh configuration.
	pub fn validate(&self) -> Result<()> {
		let windows = [
			("refresh.background_interval", self.background_interval),
			("refresh.scheduled_interval", self.scheduled_interval),
			("refresh.safety_timeout", self.safety_timeout),
		];

		for (field, window) in windows {
			if window.is_zero() {
				return Err(Error::Validation { field, reason: "Must be greater than zero.".into() });
			}
		}

		Ok(())
	}
}
impl Default for RefreshPolicy {
	fn default() -> Self {
		Self {
			background_interval: DEFAULT_BACKGROUND_INTERVAL,
			scheduled_interval: DEFAULT_SCHEDULED_INTERVAL,
			safety_timeout: DEFAULT_SAFETY_TIMEOUT,
			view_state_ttl: DEFAULT_VIEW_STATE_TTL,
		}
	}
}

/// What asked for a refresh.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshTrigger {
	/// First load of the session.
	Initial,
	/// User pressed refresh.
	Manual,
	/// User picked a management zone.
	ZoneSelection,
	/// User navigated to a route.
	Navigation,
	/// Opportunistic, e.g. the window regained focus.
	Background,
	/// Periodic timer.
	Scheduled,
}
impl RefreshTrigger {
	/// Label used in logs and metrics.
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Initial => "initial",
			Self::Manual => "manual",
			Self::ZoneSelection => "zone_selection",
			Self::Navigation => "navigation",
			Self::Background => "background",
			Self::Scheduled => "scheduled",
		}
	}

	/// Whether the trigger is silent (never toggles `loading`).
	pub fn is_automatic(self) -> bool {
		matches!(self, Self::Background | Self::Scheduled)
	}

	/// Whether reads bypass the request cache.
	pub fn forces_refresh(self) -> bool {
		matches!(self, Self::Manual)
	}
}

/// Why a trigger did not start a cycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SkipReason {
	/// Another cycle is running and the trigger is automatic.
	InProgress,
	/// The trigger's floor has not elapsed since the last success.
	TooSoon {
		/// Time left until the floor is met.
		remaining: Duration,
	},
	/// The destination route was loaded recently.
	FreshViewState,
}

/// Summary of one finished cycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefreshReport {
	/// Trigger that started the cycle.
	pub trigger: RefreshTrigger,
	/// At least one read succeeded and the zone selection (if any) went through.
	pub succeeded: bool,
	/// The cycle hit the safety timeout.
	pub timed_out: bool,
	/// Per-field failures.
	pub errors: Vec<FieldError>,
	/// Wall time of the cycle.
	pub elapsed: Duration,
}

/// Result of a trigger.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RefreshOutcome {
	/// The trigger started a cycle and awaited it.
	Ran(RefreshReport),
	/// The trigger joined a cycle another trigger had started.
	Joined(RefreshReport),
	/// Nothing ran.
	Skipped(SkipReason),
}
impl RefreshOutcome {
	/// Report of the cycle this trigger ran or joined.
	pub fn report(&self) -> Option<&RefreshReport> {
		match self {
			Self::Ran(report) | Self::Joined(report) => Some(report),
			Self::Skipped(_) => None,
		}
	}

	/// Whether a cycle ran (or was joined) and succeeded.
	pub fn succeeded(&self) -> bool {
		self.report().is_some_and(|report| report.succeeded)
	}
}

/// UI-facing dashboard state published after every cycle.
///
/// Fields keep their last good value when a later read fails.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct DashboardView {
	/// Zone the data is filtered by.
	pub management_zone: Option<String>,
	/// Aggregate counters.
	pub summary: Option<Summary>,
	/// Open problems.
	pub problems: Option<Vec<Problem>>,
	/// Problems from the last 72 hours.
	pub problems_72h: Option<Vec<Problem>>,
	/// Hosts.
	pub hosts: Option<Vec<Host>>,
	/// Services.
	pub services: Option<Vec<Service>>,
	/// Process groups.
	pub processes: Option<Vec<ProcessGroup>>,
	/// A user-visible reload is running.
	pub loading: bool,
	/// Failures from the latest cycle.
	pub errors: Vec<FieldError>,
	/// The status check failed; the UI should block with a retry action.
	pub backend_unreachable: bool,
	/// Time of the latest cycle that delivered any data.
	pub last_updated: Option<DateTime<Utc>>,
}
impl DashboardView {
	/// Fold `data` in, keeping previous values for failed fields.
	pub fn merge(&mut self, data: DashboardData, now: DateTime<Utc>) {
		let errors = data.errors();
		let delivered = errors.len() < 6;

		keep_ok(&mut self.summary, data.summary);
		keep_ok(&mut self.problems, data.problems);
		keep_ok(&mut self.problems_72h, data.problems_72h);
		keep_ok(&mut self.hosts, data.hosts);
		keep_ok(&mut self.services, data.services);
		keep_ok(&mut self.processes, data.processes);

		if data.management_zone.is_some() {
			self.management_zone = data.management_zone;
		}

		self.errors = errors;
		self.backend_unreachable = false;

		if delivered {
			self.last_updated = Some(now);
		}
	}
}

/// Serialises refresh triggers into at most one running cycle.
///
/// Manual refreshes arriving mid-cycle await the running cycle; zone selections wait for it and
/// then start their own; automatic triggers are dropped. Background and scheduled triggers are
/// additionally held back until their floor has passed since the last successful cycle.
#[derive(Clone)]
pub struct RefreshCoordinator {
	inner: Arc<Inner>,
}
impl RefreshCoordinator {
	/// Build a coordinator driving `gateway`.
	pub fn new(gateway: DashboardGateway, policy: RefreshPolicy) -> Self {
		let metrics = gateway.manager().metrics();
		let (view, _) = watch::channel(DashboardView::default());

		Self {
			inner: Arc::new(Inner {
				gateway,
				policy,
				state: Mutex::new(RefreshState::default()),
				view,
				metrics,
			}),
		}
	}

	/// Subscribe to view updates.
	pub fn subscribe(&self) -> watch::Receiver<DashboardView> {
		self.inner.view.subscribe()
	}

	/// Current view.
	pub fn view(&self) -> DashboardView {
		self.inner.view.borrow().clone()
	}

	/// Whether a cycle is running.
	pub fn is_refreshing(&self) -> bool {
		self.inner.state.lock().in_flight.is_some()
	}

	/// Start instant of the latest successful cycle.
	pub fn last_success_at(&self) -> Option<Instant> {
		self.inner.state.lock().last_success_at
	}

	/// Zone subsequent cycles select.
	pub fn management_zone(&self) -> Option<String> {
		self.inner.state.lock().management_zone.clone()
	}

	/// First load; checks backend reachability before reading.
	pub async fn initial_load(&self) -> RefreshOutcome {
		self.trigger(RefreshTrigger::Initial).await
	}

	/// User-initiated reload bypassing the request cache.
	pub async fn manual_refresh(&self) -> RefreshOutcome {
		self.trigger(RefreshTrigger::Manual).await
	}

	/// Opportunistic reload, subject to the background floor.
	pub async fn background_refresh(&self) -> RefreshOutcome {
		self.trigger(RefreshTrigger::Background).await
	}

	/// Switch the dashboard to `zone` and reload.
	///
	/// The zone becomes current only once the backend accepts it; a rejected selection leaves
	/// the previous zone and its data in place.
	pub async fn select_zone(&self, zone: Option<String>) -> RefreshOutcome {
		self.trigger_at(RefreshTrigger::ZoneSelection, Instant::now(), Some(zone)).await
	}

	/// Reload for `route` unless it was loaded within the view-state window.
	pub async fn navigate(&self, route: &str) -> RefreshOutcome {
		let fresh = {
			let state = self.inner.state.lock();

			state.views.get(route).is_some_and(|visited| {
				Instant::now().saturating_duration_since(*visited) < self.inner.policy.view_state_ttl
			})
		};

		if fresh {
			tracing::debug!(route, "view state is fresh; skipping reload");

			return self.skip(RefreshTrigger::Navigation, SkipReason::FreshViewState);
		}

		let outcome = self.trigger(RefreshTrigger::Navigation).await;

		if outcome.succeeded() {
			self.inner.state.lock().views.insert(route.to_owned(), Instant::now());
		}

		outcome
	}

	/// Run `trigger` through the single-flight and floor rules.
	#[tracing::instrument(skip(self))]
	pub async fn trigger(&self, trigger: RefreshTrigger) -> RefreshOutcome {
		self.trigger_at(trigger, Instant::now(), None).await
	}

	/// Like [`trigger`](Self::trigger), with floors measured at `requested_at`.
	///
	/// A successful cycle records `requested_at` as its success instant, so a timer passing its
	/// tick deadline is held back only by other triggers, never by its own previous tick.
	///
	/// `zone` is the selection a [`RefreshTrigger::ZoneSelection`] applies; without one it
	/// re-applies the current zone.
	async fn trigger_at(
		&self,
		trigger: RefreshTrigger,
		requested_at: Instant,
		zone: Option<Option<String>>,
	) -> RefreshOutcome {
		loop {
			match self.claim(trigger, requested_at, zone.clone()) {
				Claim::Start(cycle) => return RefreshOutcome::Ran(cycle.await),
				Claim::Join(cycle) => return RefreshOutcome::Joined(cycle.await),
				Claim::Wait(cycle) => {
					cycle.await;
				},
				Claim::Skip(reason) => return self.skip(trigger, reason),
			}
		}
	}

	/// Spawn the periodic [`RefreshTrigger::Scheduled`] timer.
	///
	/// The first tick fires one period from now. Abort the handle to stop it.
	pub fn spawn_scheduled(&self) -> JoinHandle<()> {
		let coordinator = self.clone();
		let period = self.inner.policy.scheduled_interval;

		tokio::spawn(async move {
			let mut ticker = time::interval_at(Instant::now() + period, period);

			ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

			loop {
				let deadline = ticker.tick().await;

				coordinator.trigger_at(RefreshTrigger::Scheduled, deadline, None).await;
			}
		})
	}

	fn claim(
		&self,
		trigger: RefreshTrigger,
		requested_at: Instant,
		zone: Option<Option<String>>,
	) -> Claim {
		let now = Instant::now();
		let mut state = self.inner.state.lock();

		if let Some(in_flight) = &state.in_flight {
			// A cycle bounds itself with the safety timeout; one still registered after twice
			// that has died without clearing its slot.
			let stuck_after = self.inner.policy.safety_timeout.saturating_mul(2);

			if now.saturating_duration_since(in_flight.started_at) < stuck_after {
				return match trigger {
					RefreshTrigger::Manual => Claim::Join(in_flight.cycle.clone()),
					RefreshTrigger::ZoneSelection => Claim::Wait(in_flight.cycle.clone()),
					_ => Claim::Skip(SkipReason::InProgress),
				};
			}

			tracing::warn!(
				generation = in_flight.generation,
				trigger = in_flight.trigger.as_str(),
				"clearing stuck refresh"
			);
			self.inner.metrics.record_refresh_timeout();

			state.in_flight = None;
		}

		if let (Some(floor), Some(last)) = (self.inner.policy.floor(trigger), state.last_success_at) {
			let elapsed = requested_at.saturating_duration_since(last);

			if elapsed < floor {
				return Claim::Skip(SkipReason::TooSoon { remaining: floor - elapsed });
			}
		}

		state.generation += 1;

		let generation = state.generation;
		// Only these triggers (re)apply the zone server-side; the rest rely on the selection
		// already in place so their reads stay cacheable.
		let selection = match trigger {
			RefreshTrigger::ZoneSelection => Some(zone.unwrap_or_else(|| state.management_zone.clone())),
			RefreshTrigger::Initial => state.management_zone.clone().map(Some),
			_ => None,
		};
		let cycle = self.cycle(generation, trigger, requested_at, selection).shared();

		state.in_flight = Some(InFlight { generation, trigger, started_at: now, cycle: cycle.clone() });

		drop(state);

		if !trigger.is_automatic() {
			self.inner.view.send_modify(|view| view.loading = true);
		}

		tokio::spawn(cycle.clone());

		Claim::Start(cycle)
	}

	fn cycle(
		&self,
		generation: u64,
		trigger: RefreshTrigger,
		requested_at: Instant,
		selection: Option<Option<String>>,
	) -> BoxFuture<'static, RefreshReport> {
		let inner = self.inner.clone();

		async move {
			let started = Instant::now();
			let check_status =
				trigger == RefreshTrigger::Initial || inner.view.borrow().backend_unreachable;
			let load = load(
				inner.gateway.clone(),
				selection.clone(),
				trigger.forces_refresh(),
				check_status,
			);
			let result = time::timeout(inner.policy.safety_timeout, load).await;
			let elapsed = started.elapsed();
			let mut report =
				RefreshReport { trigger, succeeded: false, timed_out: false, errors: Vec::new(), elapsed };
			let mut selected = None;

			inner.view.send_modify(|view| {
				match result {
					Ok(Ok(data)) => {
						report.succeeded = !data.is_complete_failure();

						if trigger == RefreshTrigger::ZoneSelection
							&& let Some(zone) = &selection
						{
							view.management_zone = zone.clone();
							selected = Some(zone.clone());
						}

						view.merge(data, Utc::now());

						report.errors = view.errors.clone();
					},
					Ok(Err(CycleFailure::Unreachable(err))) => {
						tracing::warn!(error = %err, "backend unreachable");

						view.backend_unreachable = true;
						view.errors = vec![field_error("status", &err)];
						report.errors = view.errors.clone();
					},
					Ok(Err(CycleFailure::ZoneSelection(err))) => {
						tracing::warn!(error = %err, "management zone selection failed");

						view.errors = vec![field_error("management_zone", &err)];
						report.errors = view.errors.clone();
					},
					Err(_) => {
						tracing::warn!(generation, ?elapsed, "refresh cycle hit the safety timeout");

						report.timed_out = true;
					},
				}

				if !trigger.is_automatic() {
					view.loading = false;
				}
			});

			{
				let mut state = inner.state.lock();

				if state.in_flight.as_ref().is_some_and(|in_flight| in_flight.generation == generation)
				{
					state.in_flight = None;
				}
				if let Some(zone) = selected {
					state.management_zone = zone;
					state.views.clear();
				}
				if report.succeeded {
					state.last_success_at = Some(requested_at);
				}
			}

			let outcome = if report.timed_out {
				inner.metrics.record_refresh_timeout();

				"timeout"
			} else if report.succeeded {
				"success"
			} else {
				"failure"
			};

			inner.metrics.record_refresh_run(elapsed);
			metrics::record_refresh(trigger.as_str(), outcome);
			metrics::record_refresh_duration(trigger.as_str(), elapsed);
			tracing::debug!(generation, trigger = trigger.as_str(), outcome, ?elapsed, "refresh finished");

			report
		}
		.boxed()
	}

	fn skip(&self, trigger: RefreshTrigger, reason: SkipReason) -> RefreshOutcome {
		tracing::debug!(trigger = trigger.as_str(), ?reason, "refresh skipped");

		self.inner.metrics.record_refresh_skip();
		metrics::record_refresh(trigger.as_str(), "skipped");

		RefreshOutcome::Skipped(reason)
	}
}
impl Debug for RefreshCoordinator {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		let state = self.inner.state.lock();

		f.debug_struct("RefreshCoordinator")
			.field("policy", &self.inner.policy)
			.field("refreshing", &state.in_flight.is_some())
			.field("last_success_at", &state.last_success_at)
			.field("management_zone", &state.management_zone)
			.finish()
	}
}

struct Inner {
	gateway: DashboardGateway,
	policy: RefreshPolicy,
	state: Mutex<RefreshState>,
	view: watch::Sender<DashboardView>,
	metrics: Arc<CacheMetrics>,
}

#[derive(Default)]
struct RefreshState {
	in_flight: Option<InFlight>,
	generation: u64,
	last_success_at: Option<Instant>,
	management_zone: Option<String>,
	views: HashMap<String, Instant>,
}

struct InFlight {
	generation: u64,
	trigger: RefreshTrigger,
	started_at: Instant,
	cycle: Cycle,
}

enum Claim {
	Start(Cycle),
	Join(Cycle),
	Wait(Cycle),
	Skip(SkipReason),
}

enum CycleFailure {
	Unreachable(Error),
	ZoneSelection(Error),
}

/// `selection` is `Some` when the cycle must (re)apply the zone server-side; `Some(None)`
/// clears the filter.
async fn load(
	gateway: DashboardGateway,
	selection: Option<Option<String>>,
	force_refresh: bool,
	check_status: bool,
) -> std::result::Result<DashboardData, CycleFailure> {
	if check_status {
		gateway.check_status().await.map_err(CycleFailure::Unreachable)?;
	}

	let zone = match selection {
		Some(None) => {
			gateway.set_management_zone(None).await.map_err(CycleFailure::ZoneSelection)?;

			None
		},
		Some(zone) => zone,
		None => None,
	};

	gateway
		.load_dashboard_data(zone.as_deref(), force_refresh)
		.await
		.map_err(CycleFailure::ZoneSelection)
}

fn keep_ok<T>(slot: &mut Option<T>, result: Result<T>) {
	if let Ok(value) = result {
		*slot = Some(value);
	}
}

fn field_error(field: &str, err: &Error) -> FieldError {
	FieldError { field: field.into(), message: err.root().to_string() }
}
