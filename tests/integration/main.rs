//! Integration tests against a mocked dashboard backend.

mod gateway;
mod refresh;

// std
use std::time::Duration;
// crates.io
use dynacache::{DashboardSession, RefreshPolicy, RetryPolicy, SessionBuilder};
use serde_json::{Value, json};
use url::Url;
use wiremock::{
	Mock, MockServer, ResponseTemplate,
	matchers::{method, path},
};

pub const API: &str = "/api";

pub fn init_tracing() {
	let _ = tracing_subscriber::fmt::try_init();
}

pub fn builder(server: &MockServer) -> SessionBuilder {
	init_tracing();

	let base_url = Url::parse(&format!("{}{API}", server.uri())).expect("base url");

	DashboardSession::builder(base_url).retry(fast_retry())
}

pub fn session(server: &MockServer) -> DashboardSession {
	builder(server).build().expect("session")
}

pub fn fast_retry() -> RetryPolicy {
	RetryPolicy {
		attempt_timeout: Duration::from_secs(2),
		extended_timeout: Duration::from_secs(4),
		rate_limit_backoff: Duration::from_millis(50),
	}
}

pub fn short_refresh() -> RefreshPolicy {
	RefreshPolicy { safety_timeout: Duration::from_secs(5), ..RefreshPolicy::default() }
}

pub fn api(endpoint: &str) -> String {
	format!("{API}{endpoint}")
}

pub fn ok(body: Value) -> ResponseTemplate {
	ResponseTemplate::new(200).set_body_json(body)
}

/// Mount every dashboard read with a static body, each answering with `delay`.
pub async fn mount_dashboard(server: &MockServer, delay: Duration) {
	let bodies = [
		("/status", json!({ "status": "ok" })),
		("/summary", json!({ "hosts": 2, "services": 1, "processes": 1, "problems": 1 })),
		(
			"/problems",
			json!([{ "problemId": "p-1", "displayId": "P-1", "status": "OPEN",
				"managementZones": [{ "id": 1, "name": "Payments" }] }]),
		),
		("/problems-72h", json!({ "problems": [] })),
		(
			"/hosts",
			json!([
				{ "entityId": "HOST-1", "displayName": "web-1" },
				{ "entityId": "HOST-2", "displayName": "web-2" }
			]),
		),
		("/services", json!([{ "entityId": "SERVICE-1", "displayName": "checkout" }])),
		("/processes", json!([{ "entityId": "PG-1", "displayName": "nginx" }])),
	];

	for (endpoint, body) in bodies {
		Mock::given(method("GET"))
			.and(path(api(endpoint)))
			.respond_with(ok(body).set_delay(delay))
			.mount(server)
			.await;
	}
}

pub async fn requests_to(server: &MockServer, endpoint: &str) -> usize {
	let target = api(endpoint);

	server
		.received_requests()
		.await
		.unwrap_or_default()
		.iter()
		.filter(|request| request.url.path() == target)
		.count()
}
