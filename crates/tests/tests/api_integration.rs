use std::collections::HashMap;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::extract::Query;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tower::ServiceExt;
use wayfinder_agents::{GeminiConfig, NominatimConfig};
use wayfinder_api::{build_app_with, ApiConfig};
use wayfinder_core::{OPTION_RESTART, OPTION_RETRY, OPTION_VIEW_ITINERARY};

const API_KEY: &str = "test-wayfinder-key";

const THREE_DAY_ITINERARY: &str = "Destination: Paris\nNumber of Days: 3\n\n\
Day 1: Arrival\n- Morning:\n  • Check in near the Marais\n- Evening:\n  • Seine walk\n\n\
Day 2: Museums\n- Morning:\n  • Louvre\n- Afternoon:\n  • Musée d'Orsay\n\n\
Day 3: Markets\n- Morning:\n  • Marché d'Aligre\n- Evening:\n  • Farewell dinner";

async fn spawn(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

async fn gemini_mock(text: &'static str) -> String {
    spawn(Router::new().route(
        "/v1beta/models/{*rest}",
        post(move || async move {
            Json(json!({"candidates": [{"content": {"parts": [{"text": text}]}}]}))
        }),
    ))
    .await
}

async fn failing_gemini_mock() -> String {
    spawn(Router::new().route(
        "/v1beta/models/{*rest}",
        post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "upstream exploded") }),
    ))
    .await
}

async fn geocoder_mock() -> String {
    spawn(Router::new().route(
        "/search",
        get(|Query(query): Query<HashMap<String, String>>| async move {
            let q = query.get("q").cloned().unwrap_or_default();
            if q == "Nowhere" {
                return (StatusCode::SERVICE_UNAVAILABLE, Json(json!([])));
            }
            let limit = query
                .get("limit")
                .and_then(|value| value.parse::<usize>().ok())
                .unwrap_or(10);
            let places = vec![
                json!({"display_name": format!("{q}, Île-de-France, France"), "lat": "48.8566", "lon": "2.3522"}),
                json!({"display_name": format!("{q} Gare de Lyon, France"), "lat": "48.8443", "lon": "2.3744"}),
            ];
            (
                StatusCode::OK,
                Json(Value::Array(places.into_iter().take(limit).collect())),
            )
        }),
    ))
    .await
}

fn config(gemini_base: String, geocoder_base: String) -> ApiConfig {
    ApiConfig {
        api_key: API_KEY.to_string(),
        gemini: GeminiConfig::default()
            .with_api_key("mock-key")
            .with_base_url(gemini_base),
        geocoder: NominatimConfig::default().with_base_url(geocoder_base),
        session_ttl: Duration::from_secs(3_600),
        rate_limit_window: Duration::from_secs(60),
        rate_limit_max: 500,
        allowed_origins: vec!["https://planner.example.com".to_string()],
    }
}

async fn app_with_mocks() -> Router {
    let gemini = gemini_mock(THREE_DAY_ITINERARY).await;
    let geocoder = geocoder_mock().await;
    build_app_with(config(gemini, geocoder))
        .await
        .expect("app should build")
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, HeaderMap, Vec<u8>) {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-api-key", API_KEY);
    let body = match body {
        Some(value) => {
            builder = builder.header("content-type", "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, headers, bytes.to_vec())
}

async fn call_json(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let (status, _, bytes) = call(app, method, uri, body).await;
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

async fn new_session(app: &Router) -> String {
    let (status, session) = call_json(app, "POST", "/v1/sessions", None).await;
    assert_eq!(status, StatusCode::CREATED);
    session["session_id"].as_str().unwrap().to_string()
}

async fn answer(app: &Router, session_id: &str, body: Value) -> Value {
    let (status, turn) = call_json(
        app,
        "POST",
        &format!("/v1/sessions/{session_id}/messages"),
        Some(body),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "unexpected turn response: {turn}");
    turn
}

async fn answer_up_to_style(app: &Router, session_id: &str) {
    answer(app, session_id, json!({"text": "Paris"})).await;
    answer(app, session_id, json!({"option": "3"})).await;
    answer(app, session_id, json!({"option": "next_month"})).await;
    answer(app, session_id, json!({"option": "food"})).await;
}

fn option_values(turn: &Value) -> Vec<String> {
    turn["reply"]["options"]
        .as_array()
        .map(|options| {
            options
                .iter()
                .filter_map(|option| option["value"].as_str().map(ToString::to_string))
                .collect()
        })
        .unwrap_or_default()
}

#[tokio::test]
async fn health_is_public() {
    let app = app_with_mocks().await;

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let parsed: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(parsed["status"], "ok");
    assert_eq!(parsed["capabilities"]["itinerary_generation"], true);
}

#[tokio::test]
async fn sessions_require_api_key() {
    let app = app_with_mocks().await;

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/sessions")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn allowed_origin_does_not_need_api_key() {
    let app = app_with_mocks().await;

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/sessions")
                .header("origin", "https://planner.example.com")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(
        response
            .headers()
            .get("x-content-type-options")
            .and_then(|value| value.to_str().ok()),
        Some("nosniff")
    );
}

#[tokio::test]
async fn full_conversation_produces_itinerary_export_and_map() {
    let app = app_with_mocks().await;
    let session_id = new_session(&app).await;

    let (status, itinerary) = call_json(
        &app,
        "GET",
        &format!("/v1/sessions/{session_id}/itinerary"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(itinerary["error"], "itinerary_not_ready");

    answer_up_to_style(&app, &session_id).await;
    let turn = answer(&app, &session_id, json!({"option": "balanced"})).await;
    assert_eq!(turn["session"]["step"], "generating_itinerary");
    assert_eq!(
        option_values(&turn),
        vec![OPTION_VIEW_ITINERARY.to_string(), OPTION_RESTART.to_string()]
    );

    let (status, itinerary) = call_json(
        &app,
        "GET",
        &format!("/v1/sessions/{session_id}/itinerary"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(itinerary["destination"], "Paris");
    assert_eq!(itinerary["days"].as_array().map(Vec::len), Some(3));
    assert_eq!(itinerary["days"][1]["sections"][1]["title"], "Afternoon");

    let (status, headers, document) = call(
        &app,
        "GET",
        &format!("/v1/sessions/{session_id}/itinerary/export"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        headers
            .get("content-disposition")
            .and_then(|value| value.to_str().ok()),
        Some("attachment; filename=\"paris-itinerary.txt\"")
    );
    let document = String::from_utf8(document).unwrap();
    assert!(document.starts_with("Destination: Paris"));
    assert!(document.contains("Day 3: Markets"));

    let (status, map) = call_json(
        &app,
        "GET",
        &format!("/v1/sessions/{session_id}/map?zoom=30"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(map["markers"].as_array().map(Vec::len), Some(1));
    assert_eq!(map["markers"][0]["label"], "Paris");
    assert_eq!(map["zoom"], 18);
    assert!(map.get("path").is_none());

    let (status, museums) = call_json(
        &app,
        "GET",
        &format!("/v1/sessions/{session_id}/map?day=2"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(museums["markers"][0]["label"], "Louvre");
    assert_eq!(museums["markers"][1]["label"], "Musée d'Orsay");
    assert_eq!(
        museums["markers"][0]["detail"],
        "Louvre, Paris, Île-de-France, France"
    );
    assert_eq!(museums["path"].as_array().map(Vec::len), Some(2));

    let (status, missing_day) = call_json(
        &app,
        "GET",
        &format!("/v1/sessions/{session_id}/map?day=9"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(missing_day["error"], "day_not_found");

    let turn = answer(&app, &session_id, json!({"option": OPTION_VIEW_ITINERARY})).await;
    assert_eq!(turn["session"]["step"], "terminal");

    let turn = answer(&app, &session_id, json!({"option": OPTION_RESTART})).await;
    assert_eq!(turn["session"]["step"], "collecting_destination");
    assert_eq!(turn["session"]["messages"].as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn generation_failure_offers_retry_and_restart() {
    let gemini = failing_gemini_mock().await;
    let geocoder = geocoder_mock().await;
    let app = build_app_with(config(gemini, geocoder))
        .await
        .expect("app should build");
    let session_id = new_session(&app).await;

    answer_up_to_style(&app, &session_id).await;
    let turn = answer(&app, &session_id, json!({"option": "packed"})).await;
    assert_eq!(
        option_values(&turn),
        vec![OPTION_RETRY.to_string(), OPTION_RESTART.to_string()]
    );

    let turn = answer(&app, &session_id, json!({"option": OPTION_RETRY})).await;
    assert_eq!(
        option_values(&turn),
        vec![OPTION_RETRY.to_string(), OPTION_RESTART.to_string()]
    );

    let (_, health) = call_json(&app, "GET", "/health", None).await;
    assert_eq!(health["metrics"]["generation_failures_total"], 2);
}

#[tokio::test]
async fn message_needs_text_or_option() {
    let app = app_with_mocks().await;
    let session_id = new_session(&app).await;

    let (status, body) = call_json(
        &app,
        "POST",
        &format!("/v1/sessions/{session_id}/messages"),
        Some(json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_message");
}

#[tokio::test]
async fn unknown_session_is_not_found() {
    let app = app_with_mocks().await;

    let (status, body) = call_json(&app, "GET", "/v1/sessions/does-not-exist", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "session_not_found");

    let (status, _) = call_json(
        &app,
        "POST",
        "/v1/sessions/does-not-exist/messages",
        Some(json!({"text": "Rome"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn parse_endpoint_returns_structure() {
    let app = app_with_mocks().await;

    let (status, parsed) = call_json(
        &app,
        "POST",
        "/v1/itinerary/parse",
        Some(json!({
            "text": "Day 2:\n- Morning\nWalk\nCoffee\n- Afternoon\nMuseum"
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(parsed["destination"], "");
    assert_eq!(parsed["days"][0]["day_number"], 2);
    assert_eq!(
        parsed["days"][0]["sections"],
        json!([
            {"title": "Morning", "details": ["Walk", "Coffee"]},
            {"title": "Afternoon", "details": ["Museum"]}
        ])
    );
}

#[tokio::test]
async fn place_search_degrades_to_empty_list() {
    let app = app_with_mocks().await;

    let (status, places) = call_json(&app, "GET", "/v1/places/search?q=Paris&limit=2", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(places.as_array().map(Vec::len), Some(2));
    assert_eq!(places[0]["display_name"], "Paris, Île-de-France, France");

    let (status, places) = call_json(&app, "GET", "/v1/places/search?q=Nowhere", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(places, json!([]));
}

#[tokio::test]
async fn rate_limit_applies_per_ip() {
    let gemini = gemini_mock(THREE_DAY_ITINERARY).await;
    let geocoder = geocoder_mock().await;
    let app = build_app_with(ApiConfig {
        rate_limit_max: 2,
        ..config(gemini, geocoder)
    })
    .await
    .expect("app should build");

    for _ in 0..2 {
        let (status, _) = call_json(&app, "POST", "/v1/sessions", None).await;
        assert_eq!(status, StatusCode::CREATED);
    }
    let (status, body) = call_json(&app, "POST", "/v1/sessions", None).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"], "rate_limited");

    let (status, _) = call_json(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
}
