// std
use std::{
	sync::{
		Arc,
		atomic::{AtomicUsize, Ordering},
	},
	time::Duration,
};
// crates.io
use dynacache::{RefreshOutcome, RefreshPolicy, RefreshTrigger, SkipReason};
use serde_json::json;
use wiremock::{
	Mock, MockServer, Request, ResponseTemplate,
	matchers::{method, path},
};
// self
use crate::{api, builder, mount_dashboard, ok, requests_to, session, short_refresh};

#[tokio::test]
async fn overlapping_triggers_share_one_cycle() {
	let server = MockServer::start().await;

	mount_dashboard(&server, Duration::from_millis(300)).await;

	let session = builder(&server).refresh(short_refresh()).build().expect("session");
	let coordinator = session.coordinator().clone();
	let first = tokio::spawn({
		let coordinator = coordinator.clone();

		async move { coordinator.manual_refresh().await }
	});

	while !coordinator.is_refreshing() {
		tokio::task::yield_now().await;
	}

	assert!(coordinator.view().loading);

	let background = coordinator.background_refresh().await;
	let navigation = coordinator.navigate("/hosts").await;
	let joined = coordinator.manual_refresh().await;
	let first = first.await.expect("join");

	assert_eq!(background, RefreshOutcome::Skipped(SkipReason::InProgress));
	assert_eq!(navigation, RefreshOutcome::Skipped(SkipReason::InProgress));
	assert!(matches!(first, RefreshOutcome::Ran(ref report) if report.succeeded));
	assert!(matches!(joined, RefreshOutcome::Joined(ref report) if report == first.report().expect("report")));
	assert_eq!(requests_to(&server, "/summary").await, 1);
	assert_eq!(requests_to(&server, "/hosts").await, 1);
	assert!(!coordinator.view().loading);
}

#[tokio::test]
async fn background_refresh_inside_the_floor_does_nothing() {
	let server = MockServer::start().await;

	mount_dashboard(&server, Duration::ZERO).await;

	let session = session(&server);
	let coordinator = session.coordinator();

	assert!(coordinator.initial_load().await.succeeded());

	let view = coordinator.view();
	let outcome = coordinator.background_refresh().await;

	assert!(matches!(
		outcome,
		RefreshOutcome::Skipped(SkipReason::TooSoon { remaining }) if remaining <= Duration::from_secs(60)
	));
	assert_eq!(coordinator.view(), view);
	assert_eq!(requests_to(&server, "/summary").await, 1);
	assert_eq!(session.metrics().refresh_skips, 1);
}

#[tokio::test]
async fn manual_refresh_ignores_the_floor_and_bypasses_the_cache() {
	let server = MockServer::start().await;

	mount_dashboard(&server, Duration::ZERO).await;

	let session = session(&server);
	let coordinator = session.coordinator();

	coordinator.initial_load().await;

	let outcome = coordinator.manual_refresh().await;
	let forced = server
		.received_requests()
		.await
		.unwrap_or_default()
		.iter()
		.filter(|request| request.url.path() == api("/hosts"))
		.filter(|request| request.url.query_pairs().any(|(k, v)| k == "debug" && v == "true"))
		.count();

	assert!(matches!(outcome, RefreshOutcome::Ran(ref report) if report.trigger == RefreshTrigger::Manual));
	assert_eq!(requests_to(&server, "/hosts").await, 2);
	assert_eq!(forced, 1);
}

#[tokio::test]
async fn failed_fields_keep_their_last_good_value() {
	let server = MockServer::start().await;
	let calls = Arc::new(AtomicUsize::new(0));
	let counter = calls.clone();

	Mock::given(method("GET"))
		.and(path(api("/hosts")))
		.respond_with(move |_: &Request| match counter.fetch_add(1, Ordering::SeqCst) {
			0 => ResponseTemplate::new(200).set_body_json(json!([{ "entityId": "HOST-1" }])),
			_ => ResponseTemplate::new(500).set_body_json(json!({ "error": "hosts down" })),
		})
		.with_priority(1)
		.mount(&server)
		.await;
	mount_dashboard(&server, Duration::ZERO).await;

	let session = session(&server);
	let coordinator = session.coordinator();
	let mut updates = coordinator.subscribe();

	coordinator.initial_load().await;

	let outcome = coordinator.manual_refresh().await;
	let view = updates.borrow_and_update().clone();

	assert!(outcome.succeeded());
	assert_eq!(view.hosts.as_ref().map(|hosts| hosts[0].entity_id.as_str()), Some("HOST-1"));
	assert_eq!(view.errors.len(), 1);
	assert_eq!(view.errors[0].field, "hosts");
	assert!(!view.backend_unreachable);
}

#[tokio::test]
async fn unreachable_backend_blocks_until_a_manual_retry_succeeds() {
	let server = MockServer::start().await;
	let calls = Arc::new(AtomicUsize::new(0));
	let counter = calls.clone();

	Mock::given(method("GET"))
		.and(path(api("/status")))
		.respond_with(move |_: &Request| match counter.fetch_add(1, Ordering::SeqCst) {
			0 => ResponseTemplate::new(503),
			_ => ResponseTemplate::new(200).set_body_json(json!({ "status": "ok" })),
		})
		.with_priority(1)
		.mount(&server)
		.await;
	mount_dashboard(&server, Duration::ZERO).await;

	let session = session(&server);
	let coordinator = session.coordinator();
	let initial = coordinator.initial_load().await;

	assert!(!initial.succeeded());
	assert!(coordinator.view().backend_unreachable);
	assert_eq!(coordinator.view().errors[0].field, "status");
	assert_eq!(requests_to(&server, "/summary").await, 0);
	assert_eq!(coordinator.last_success_at(), None);

	assert!(coordinator.manual_refresh().await.succeeded());
	assert!(!coordinator.view().backend_unreachable);
	assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn stuck_cycles_are_cleared_by_the_safety_timeout() {
	let server = MockServer::start().await;

	mount_dashboard(&server, Duration::from_secs(3)).await;

	let session = builder(&server)
		.refresh(RefreshPolicy { safety_timeout: Duration::from_millis(300), ..RefreshPolicy::default() })
		.build()
		.expect("session");
	let coordinator = session.coordinator();
	let outcome = coordinator.manual_refresh().await;

	assert!(matches!(outcome, RefreshOutcome::Ran(ref report) if report.timed_out && !report.succeeded));
	assert!(!coordinator.is_refreshing());
	assert!(!coordinator.view().loading);
	assert_eq!(session.metrics().refresh_timeouts, 1);
}

#[tokio::test]
async fn navigation_skips_routes_with_fresh_view_state() {
	let server = MockServer::start().await;

	mount_dashboard(&server, Duration::ZERO).await;

	let session = session(&server);
	let coordinator = session.coordinator();

	assert!(coordinator.navigate("/hosts").await.succeeded());
	assert_eq!(
		coordinator.navigate("/hosts").await,
		RefreshOutcome::Skipped(SkipReason::FreshViewState)
	);
	assert!(coordinator.navigate("/services").await.succeeded());
	assert_eq!(requests_to(&server, "/summary").await, 1);
}

#[tokio::test]
async fn zone_selection_reloads_for_the_new_zone() {
	let server = MockServer::start().await;

	Mock::given(method("POST"))
		.and(path(api("/set-management-zone")))
		.respond_with(ok(json!({ "success": true })))
		.expect(1)
		.mount(&server)
		.await;
	mount_dashboard(&server, Duration::ZERO).await;

	let session = session(&server);
	let coordinator = session.coordinator();

	coordinator.initial_load().await;

	let outcome = coordinator.select_zone(Some("Payments".into())).await;

	assert!(matches!(outcome, RefreshOutcome::Ran(ref report) if report.trigger == RefreshTrigger::ZoneSelection));
	assert_eq!(coordinator.management_zone().as_deref(), Some("Payments"));
	assert_eq!(coordinator.view().management_zone.as_deref(), Some("Payments"));
	assert_eq!(requests_to(&server, "/hosts").await, 2);

	server.verify().await;
}

#[tokio::test]
async fn rejected_zone_selection_keeps_the_previous_zone() {
	let server = MockServer::start().await;

	Mock::given(method("POST"))
		.and(path(api("/set-management-zone")))
		.respond_with(ResponseTemplate::new(400).set_body_json(json!({ "error": "unknown zone" })))
		.mount(&server)
		.await;
	mount_dashboard(&server, Duration::ZERO).await;

	let session = session(&server);
	let coordinator = session.coordinator();

	coordinator.initial_load().await;

	let selected = coordinator.select_zone(Some("Nope".into())).await;

	assert!(!selected.succeeded());
	assert_eq!(coordinator.management_zone(), None);
	assert_eq!(coordinator.view().management_zone, None);
	assert_eq!(coordinator.view().errors[0].field, "management_zone");

	assert!(coordinator.manual_refresh().await.succeeded());
	assert_eq!(coordinator.management_zone(), None);
	assert_eq!(coordinator.view().management_zone, None);
	assert!(coordinator.view().errors.is_empty());
}

#[tokio::test]
async fn scheduled_timer_runs_on_consecutive_ticks() {
	let server = MockServer::start().await;

	mount_dashboard(&server, Duration::ZERO).await;

	let session = builder(&server)
		.refresh(RefreshPolicy {
			scheduled_interval: Duration::from_millis(200),
			..RefreshPolicy::default()
		})
		.build()
		.expect("session");
	let timer = session.coordinator().spawn_scheduled();

	// Ticks at 200 ms, 400 ms, ... 1000 ms.
	tokio::time::sleep(Duration::from_millis(1_100)).await;
	timer.abort();

	let metrics = session.metrics();

	assert_eq!(metrics.refresh_skips, 0);
	assert!((4..=5).contains(&metrics.refresh_runs), "runs: {}", metrics.refresh_runs);
}
