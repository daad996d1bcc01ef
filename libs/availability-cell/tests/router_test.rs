// libs/availability-cell/tests/router_test.rs

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::NaiveDate;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use availability_cell::router::{availability_routes, AppState};
use availability_cell::services::{AvailabilityService, FixedClock, TimeConverter};
use availability_cell::store::{InMemoryAvailabilityStore, InMemoryProviderDirectory};
use shared_config::SchedulingConfig;
use shared_utils::test_utils::{JwtTestUtils, TestConfig, TestUser};

struct TestApp {
    router: Router,
    secret: String,
}

impl TestApp {
    fn new() -> Self {
        let config = TestConfig::default();
        let service = AvailabilityService::new(
            Arc::new(InMemoryAvailabilityStore::new()),
            Arc::new(InMemoryProviderDirectory::new()),
            TimeConverter::default(),
            Arc::new(FixedClock::on(NaiveDate::from_ymd_opt(2024, 12, 1).unwrap())),
            SchedulingConfig::default(),
        );
        let state = Arc::new(AppState::with_service(config.to_arc(), service));

        Self {
            router: availability_routes(state),
            secret: config.jwt_secret,
        }
    }

    fn token(&self, user: &TestUser) -> String {
        JwtTestUtils::create_test_token(user, &self.secret, Some(1))
    }

    async fn send(&self, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }
}

fn window_body() -> Value {
    json!({
        "date": "2024-12-15",
        "start_time": "09:00",
        "end_time": "17:00",
        "timezone": "America/New_York",
        "max_appointments_per_slot": 1
    })
}

#[tokio::test]
async fn mutating_routes_require_a_token() {
    let app = TestApp::new();

    let (status, body) = app.send(Method::POST, "/", None, Some(window_body())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].as_str().unwrap().contains("authorization"));

    let provider = TestUser::provider("doc@example.com");
    let expired = JwtTestUtils::create_expired_token(&provider, &app.secret);
    let (status, _) = app.send(Method::POST, "/", Some(&expired), Some(window_body())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn provider_creates_own_window_and_public_can_read_it() {
    let app = TestApp::new();
    let provider = TestUser::provider("doc@example.com");
    let token = app.token(&provider);

    let (status, body) = app.send(Method::POST, "/", Some(&token), Some(window_body())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["kind"], "single");
    assert_eq!(body["availability"]["provider_id"], provider.id);
    assert_eq!(body["availability"]["local_start_time"], "09:00");
    assert_eq!(body["availability"]["start_time"], "09:00");

    let id = body["availability"]["id"].as_str().unwrap().to_string();

    let (status, fetched) = app.send(Method::GET, &format!("/{}", id), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["utc_start_time"], "2024-12-15T14:00:00Z");

    let (status, check) = app.send(Method::GET, &format!("/{}/check", id), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(check["can_be_booked"], true);
    assert_eq!(check["max_appointments"], 1);
    assert_eq!(check["remaining_capacity"], 1);

    let (status, slots) = app.send(Method::GET, &format!("/{}/slots", id), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(slots["total_slots"], 16);

    let (status, listing) = app
        .send(Method::GET, &format!("/provider/{}?limit=5", provider.id), None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listing["summary"]["total_slots"], 1);
    assert_eq!(listing["pagination"]["limit"], 5);
}

#[tokio::test]
async fn provider_cannot_manage_someone_else() {
    let app = TestApp::new();
    let provider = TestUser::provider("doc@example.com");
    let token = app.token(&provider);

    let mut body = window_body();
    body["provider_id"] = json!(Uuid::new_v4());
    let (status, _) = app.send(Method::POST, "/", Some(&token), Some(body.clone())).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let admin = TestUser::admin("admin@example.com");
    let (status, created) = app.send(Method::POST, "/", Some(&app.token(&admin)), Some(body)).await;
    assert_eq!(status, StatusCode::OK);

    let id = created["availability"]["id"].as_str().unwrap().to_string();
    let (status, _) = app
        .send(Method::DELETE, &format!("/{}", id), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn invalid_window_lists_field_details() {
    let app = TestApp::new();
    let token = app.token(&TestUser::provider("doc@example.com"));

    let body = json!({
        "date": "2024-12-15",
        "start_time": "17:00",
        "end_time": "9am",
        "timezone": "Mars/Olympus"
    });
    let (status, response) = app.send(Method::POST, "/", Some(&token), Some(body)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let details: Vec<String> = response["details"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d.as_str().unwrap().to_string())
        .collect();
    assert!(details.iter().any(|d| d.starts_with("end_time")));
    assert!(details.iter().any(|d| d.starts_with("timezone")));
}

fn detail_fields(response: &Value) -> Vec<String> {
    response["details"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d.as_str().unwrap().split(':').next().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn unknown_choices_are_listed_beside_bad_times() {
    let app = TestApp::new();
    let token = app.token(&TestUser::provider("doc@example.com"));

    let body = json!({
        "date": "2024-12-15",
        "start_time": "9am",
        "end_time": "17:00",
        "timezone": "Mars/Olympus",
        "appointment_type": "surgery",
        "location": { "type": "moon_base" }
    });
    let (status, response) = app.send(Method::POST, "/", Some(&token), Some(body)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let fields = detail_fields(&response);
    for expected in ["start_time", "timezone", "appointment_type", "location.type"] {
        assert!(fields.contains(&expected.to_string()), "missing {} in {:?}", expected, fields);
    }
}

#[tokio::test]
async fn mistyped_body_still_answers_with_details() {
    let app = TestApp::new();
    let token = app.token(&TestUser::provider("doc@example.com"));

    let mut body = window_body();
    body["slot_duration"] = json!("thirty");
    let (status, response) = app.send(Method::POST, "/", Some(&token), Some(body)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(response["error"], "Invalid request body");
    assert_eq!(detail_fields(&response), vec!["body"]);
}

#[tokio::test]
async fn oversized_durations_are_rejected_before_storage() {
    let app = TestApp::new();
    let token = app.token(&TestUser::provider("doc@example.com"));

    let mut body = window_body();
    body["slot_duration"] = json!(4294967295u64);
    body["break_duration"] = json!(100000);
    let (status, response) = app.send(Method::POST, "/", Some(&token), Some(body)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(detail_fields(&response), vec!["slot_duration", "break_duration"]);

    let (_, created) = app.send(Method::POST, "/", Some(&token), Some(window_body())).await;
    let id = created["availability"]["id"].as_str().unwrap().to_string();
    let (status, _) = app
        .send(
            Method::PUT,
            &format!("/{}", id),
            Some(&token),
            Some(json!({ "slot_duration": 4294967295u64 })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, slots) = app.send(Method::GET, &format!("/{}/slots", id), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(slots["total_slots"], 16);
}

#[tokio::test]
async fn booking_flow_over_http() {
    let app = TestApp::new();
    let provider_token = app.token(&TestUser::provider("doc@example.com"));
    let patient_token = app.token(&TestUser::patient("pat@example.com"));

    let (_, created) = app
        .send(Method::POST, "/", Some(&provider_token), Some(window_body()))
        .await;
    let id = created["availability"]["id"].as_str().unwrap().to_string();

    let (status, booked) = app
        .send(Method::POST, &format!("/{}/book", id), Some(&patient_token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(booked["status"], "booked");

    let (status, _) = app
        .send(Method::POST, &format!("/{}/book", id), Some(&patient_token), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app
        .send(Method::DELETE, &format!("/{}", id), Some(&provider_token), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, released) = app
        .send(Method::POST, &format!("/{}/cancel", id), Some(&patient_token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(released["current_appointments"], 0);

    let (status, deleted) = app
        .send(Method::DELETE, &format!("/{}?delete_recurring=false", id), Some(&provider_token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(deleted["deleted_count"], 1);

    let (status, _) = app.send(Method::GET, &format!("/{}", id), None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn recurring_create_and_public_search() {
    let app = TestApp::new();
    let token = app.token(&TestUser::provider("doc@example.com"));

    let mut body = window_body();
    body["is_recurring"] = json!(true);
    body["recurrence_pattern"] = json!("daily");
    body["recurrence_end_date"] = json!("2024-12-19");
    body["pricing"] = json!({ "base_fee": 80.0, "insurance_accepted": true, "currency": "USD" });

    let (status, created) = app.send(Method::POST, "/", Some(&token), Some(body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(created["kind"], "recurring");
    assert_eq!(created["summary"]["created_count"], 5);
    assert_eq!(created["summary"]["total_capacity"], 5);

    let (status, results) = app
        .send(
            Method::GET,
            "/search?start_date=2024-12-16&end_date=2024-12-17&insurance_accepted=true&max_price=100",
            None,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(results["total_slots"], 2);
    assert_eq!(results["providers"].as_array().unwrap().len(), 1);

    let (status, none) = app
        .send(Method::GET, "/search?max_price=50", None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(none["total_slots"], 0);
}
