// std
use std::{
	sync::{
		Arc,
		atomic::{AtomicUsize, Ordering},
	},
	time::Duration,
};
// crates.io
use dynacache::{Error, RetryPolicy};
use serde_json::json;
use wiremock::{
	Mock, MockServer, Request, ResponseTemplate,
	matchers::{body_json, method, path, query_param},
};
// self
use crate::{api, builder, mount_dashboard, ok, requests_to, session};

#[tokio::test]
async fn repeated_reads_within_ttl_hit_the_backend_once() {
	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path(api("/hosts")))
		.respond_with(ok(json!([{ "entityId": "HOST-1", "displayName": "web-1" }])))
		.expect(1)
		.mount(&server)
		.await;

	let session = session(&server);
	let first = session.gateway().get_hosts(false).await.expect("first");
	let second = session.gateway().get_hosts(false).await.expect("second");

	assert_eq!(first, second);
	assert_eq!(first[0].display_name, "web-1");
	assert_eq!(session.metrics().cache_hits, 1);

	server.verify().await;
}

#[tokio::test]
async fn concurrent_reads_are_coalesced() {
	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path(api("/services")))
		.respond_with(
			ok(json!([{ "entityId": "SERVICE-1" }])).set_delay(Duration::from_millis(200)),
		)
		.expect(1)
		.mount(&server)
		.await;

	let session = session(&server);
	let gateway = session.gateway();
	let (a, b, c) =
		tokio::join!(gateway.get_services(false), gateway.get_services(false), gateway.get_services(false));

	assert_eq!(a.expect("a"), b.expect("b"));
	assert!(c.is_ok());
	assert_eq!(session.metrics().coalesced, 2);

	server.verify().await;
}

#[tokio::test]
async fn zone_selection_invalidates_cached_hosts() {
	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path(api("/hosts")))
		.respond_with(ok(json!([{ "entityId": "HOST-1" }])))
		.expect(2)
		.mount(&server)
		.await;
	Mock::given(method("GET"))
		.and(path(api("/management-zones")))
		.respond_with(ok(json!([{ "id": "7", "name": "X" }])))
		.expect(1)
		.mount(&server)
		.await;
	Mock::given(method("POST"))
		.and(path(api("/set-management-zone")))
		.and(body_json(json!({ "name": "X" })))
		.respond_with(ok(json!({ "success": true })))
		.expect(1)
		.mount(&server)
		.await;

	let session = session(&server);
	let gateway = session.gateway();

	gateway.get_hosts(false).await.expect("warm hosts");
	gateway.get_management_zones(false).await.expect("warm zones");
	gateway.set_management_zone(Some("X")).await.expect("select");

	assert_eq!(gateway.manager().cache().len(), 1);

	gateway.get_hosts(false).await.expect("refetch hosts");
	gateway.get_management_zones(false).await.expect("cached zones");

	server.verify().await;
}

#[tokio::test]
async fn zone_selection_during_a_slow_read_refetches_afterwards() {
	let server = MockServer::start().await;
	let calls = Arc::new(AtomicUsize::new(0));
	let counter = calls.clone();

	Mock::given(method("GET"))
		.and(path(api("/hosts")))
		.respond_with(move |_: &Request| match counter.fetch_add(1, Ordering::SeqCst) {
			0 => ok(json!([{ "entityId": "OLD-ZONE-HOST" }])).set_delay(Duration::from_millis(300)),
			_ => ok(json!([{ "entityId": "NEW-ZONE-HOST" }])),
		})
		.mount(&server)
		.await;
	Mock::given(method("POST"))
		.and(path(api("/set-management-zone")))
		.respond_with(ok(json!({ "success": true })))
		.mount(&server)
		.await;

	let session = session(&server);
	let gateway = session.gateway().clone();
	let slow = tokio::spawn({
		let gateway = gateway.clone();

		async move { gateway.get_hosts(false).await }
	});

	while requests_to(&server, "/hosts").await == 0 {
		tokio::time::sleep(Duration::from_millis(10)).await;
	}

	gateway.set_management_zone(Some("X")).await.expect("select");

	let after = gateway.get_hosts(false).await.expect("after select");
	let before = slow.await.expect("join").expect("slow read");

	assert_eq!(after[0].entity_id, "NEW-ZONE-HOST");
	assert_eq!(before[0].entity_id, "OLD-ZONE-HOST");
	assert_eq!(requests_to(&server, "/hosts").await, 2);

	// The detached read settled after the selection and must not have overwritten the cache.
	let cached = gateway.get_hosts(false).await.expect("cached");

	assert_eq!(cached[0].entity_id, "NEW-ZONE-HOST");
	assert_eq!(requests_to(&server, "/hosts").await, 2);
}

#[tokio::test]
async fn forced_problem_reads_bypass_the_cache_and_bust_the_server_cache() {
	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path(api("/problems")))
		.and(query_param("debug", "true"))
		.respond_with(ok(json!([{ "problemId": "fresh", "status": "OPEN" }])))
		.expect(1)
		.with_priority(1)
		.mount(&server)
		.await;
	Mock::given(method("GET"))
		.and(path(api("/problems")))
		.and(query_param("status", "OPEN"))
		.respond_with(ok(json!([{ "problemId": "cached", "status": "OPEN" }])))
		.expect(1)
		.mount(&server)
		.await;

	let session = session(&server);
	let gateway = session.gateway();
	let cached = gateway.get_problems(Some("OPEN"), false).await.expect("cached");
	let forced = gateway.get_problems(Some("OPEN"), true).await.expect("forced");
	let after = gateway.get_problems(Some("OPEN"), false).await.expect("after");

	assert_eq!(cached[0].problem_id, "cached");
	assert_eq!(forced[0].problem_id, "fresh");
	assert_eq!(after[0].problem_id, "fresh");

	server.verify().await;
}

#[tokio::test]
async fn timeouts_are_retried_once_with_the_extended_budget() {
	let server = MockServer::start().await;
	let calls = Arc::new(AtomicUsize::new(0));
	let counter = calls.clone();

	Mock::given(method("GET"))
		.and(path(api("/summary")))
		.respond_with(move |_: &Request| {
			let body = ResponseTemplate::new(200).set_body_json(json!({ "hosts": 4 }));

			if counter.fetch_add(1, Ordering::SeqCst) == 0 {
				body.set_delay(Duration::from_millis(600))
			} else {
				body.set_delay(Duration::from_millis(300))
			}
		})
		.mount(&server)
		.await;

	let session = builder(&server)
		.retry(RetryPolicy {
			attempt_timeout: Duration::from_millis(200),
			extended_timeout: Duration::from_secs(2),
			rate_limit_backoff: Duration::from_millis(50),
		})
		.build()
		.expect("session");
	let summary = session.gateway().get_summary(false).await.expect("summary");

	assert_eq!(summary.hosts, 4);
	assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn a_second_timeout_surfaces_and_is_not_cached() {
	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path(api("/processes")))
		.respond_with(ok(json!([])).set_delay(Duration::from_millis(500)))
		.mount(&server)
		.await;

	let session = builder(&server)
		.retry(RetryPolicy {
			attempt_timeout: Duration::from_millis(100),
			extended_timeout: Duration::from_millis(150),
			rate_limit_backoff: Duration::from_millis(50),
		})
		.build()
		.expect("session");
	let err = session.gateway().get_processes(false).await.expect_err("timeout");

	assert!(matches!(err.root(), Error::Timeout { .. }));
	assert_eq!(requests_to(&server, "/processes").await, 2);
	assert!(session.gateway().manager().cache().is_empty());
}

#[tokio::test]
async fn rate_limited_requests_back_off_and_retry_once() {
	let server = MockServer::start().await;
	let calls = Arc::new(AtomicUsize::new(0));
	let counter = calls.clone();

	Mock::given(method("GET"))
		.and(path(api("/management-zones")))
		.respond_with(move |_: &Request| match counter.fetch_add(1, Ordering::SeqCst) {
			0 => ResponseTemplate::new(429),
			_ => ResponseTemplate::new(200).set_body_json(json!({ "managementZones": [{ "id": 1, "name": "A" }] })),
		})
		.mount(&server)
		.await;

	let session = session(&server);
	let zones = session.gateway().get_management_zones(false).await.expect("zones");

	assert_eq!(zones[0].name, "A");
	assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn application_errors_surface_their_message_without_retry() {
	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path(api("/summary")))
		.respond_with(ResponseTemplate::new(400).set_body_json(json!({ "error": "unknown zone" })))
		.expect(1)
		.mount(&server)
		.await;

	let session = session(&server);
	let err = session.gateway().get_summary(false).await.expect_err("bad request");

	match err.root() {
		Error::HttpStatus { status, message, .. } => {
			assert_eq!(status.as_u16(), 400);
			assert_eq!(message.as_deref(), Some("unknown zone"));
		},
		other => panic!("unexpected error: {other:?}"),
	}

	server.verify().await;
}

#[tokio::test]
async fn dashboard_load_isolates_field_failures() {
	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path(api("/hosts")))
		.respond_with(ResponseTemplate::new(500).set_body_json(json!({ "message": "hosts backend down" })))
		.with_priority(1)
		.mount(&server)
		.await;
	Mock::given(method("POST"))
		.and(path(api("/set-management-zone")))
		.respond_with(ok(json!({ "success": true })))
		.expect(1)
		.mount(&server)
		.await;
	mount_dashboard(&server, Duration::ZERO).await;

	let session = session(&server);
	let data = session.gateway().load_dashboard_data(Some("Payments"), false).await.expect("load");
	let errors = data.errors();

	assert_eq!(data.management_zone.as_deref(), Some("Payments"));
	assert_eq!(data.summary.as_ref().expect("summary").hosts, 2);
	assert_eq!(data.problems.as_ref().expect("problems").len(), 1);
	assert!(data.problems_72h.as_ref().expect("problems 72h").is_empty());
	assert_eq!(data.services.as_ref().expect("services").len(), 1);
	assert_eq!(errors.len(), 1);
	assert_eq!(errors[0].field, "hosts");
	assert!(errors[0].message.contains("hosts backend down"));
	assert!(!data.is_complete_failure());

	server.verify().await;
}

#[tokio::test]
async fn server_refresh_drops_the_matching_local_category() {
	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path(api("/problems-72h")))
		.respond_with(ok(json!([])))
		.expect(2)
		.mount(&server)
		.await;
	Mock::given(method("POST"))
		.and(path(api("/refresh/problems-72h")))
		.respond_with(ResponseTemplate::new(204))
		.expect(1)
		.mount(&server)
		.await;

	let session = session(&server);
	let gateway = session.gateway();

	gateway.get_problems_72h(false).await.expect("warm");
	gateway.trigger_server_refresh("problems-72h").await.expect("refresh");
	gateway.get_problems_72h(false).await.expect("refetch");

	server.verify().await;
}
