use super::*;
use axum::body::{to_bytes, Body};
use axum::http::{Method, Request};
use axum::response::IntoResponse;
use serde_json::{json, Value};
use tower::ServiceExt;

fn app_with(config: ServerConfig) -> Arc<AppState> {
    Arc::new(AppState::new(&config))
}

fn app() -> Arc<AppState> {
    app_with(ServerConfig::default())
}

fn onclick_ids(html: &str) -> Vec<String> {
    let needle = "data-onclick-id=\"";
    html.match_indices(needle)
        .filter_map(|(start, _)| {
            let rest = &html[start + needle.len()..];
            rest.find('"').map(|end| rest[..end].to_string())
        })
        .collect()
}

async fn page(app: &Arc<AppState>) -> String {
    let Html(body) = index(State(Arc::clone(app))).await.expect("index");
    body
}

async fn send(app: &Arc<AppState>, method: Method, uri: &str) -> (StatusCode, Vec<u8>) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .expect("request");
    let response = router(Arc::clone(app))
        .oneshot(request)
        .await
        .expect("router is infallible");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    (status, bytes.to_vec())
}

async fn post_json(app: &Arc<AppState>, uri: &str) -> (StatusCode, Value) {
    let (status, body) = send(app, Method::POST, uri).await;
    (status, serde_json::from_slice(&body).expect("json"))
}

async fn post(app: &Arc<AppState>, id: &str) -> (StatusCode, CallbackReply) {
    let (status, Json(reply)) = callback(State(Arc::clone(app)), Path(id.to_string())).await;
    (status, reply)
}

#[tokio::test]
async fn index_renders_a_hydrated_counter() {
    let app = app();
    let body = page(&app).await;

    assert!(body.starts_with("<!DOCTYPE html>"));
    assert!(body.contains(r#"<p id="count" aria-live="polite" data-hid="count">0</p>"#));
    assert!(body.contains(r#"<script type="application/json" id="__trellis_hydration">"#));
    assert!(body.contains(r#""count":0"#));

    let ids = onclick_ids(&body);
    assert_eq!(ids.len(), 3);
    let listed = format!(
        r#""callbacks":[{}]"#,
        ids.iter()
            .map(|id| format!("\"{id}\""))
            .collect::<Vec<_>>()
            .join(",")
    );
    assert!(body.contains(&listed));
    assert!(ids.iter().all(|id| app.registry().has_callback(id)));
}

#[tokio::test]
async fn increment_executes_once_and_shows_on_the_next_page() {
    let app = app();
    let ids = onclick_ids(&page(&app).await);
    let increment = &ids[1];

    assert_eq!(post(&app, increment).await, (StatusCode::OK, CallbackReply::EXECUTED));
    assert_eq!(app.counter().get(), 1);
    assert_eq!(
        post(&app, increment).await,
        (StatusCode::NOT_FOUND, CallbackReply::MISSING)
    );
    assert_eq!(app.counter().get(), 1);

    let body = page(&app).await;
    assert!(body.contains(r#"data-hid="count">1</p>"#));
    assert!(body.contains(r#""count":1"#));
}

#[tokio::test]
async fn decrement_and_reset() {
    let app = app();
    let ids = onclick_ids(&page(&app).await);
    post(&app, &ids[0]).await;
    assert_eq!(app.counter().get(), -1);
    post(&app, &ids[2]).await;
    assert_eq!(app.counter().get(), 0);
}

#[tokio::test]
async fn unknown_id_is_a_noop() {
    let app = app();
    assert_eq!(
        post(&app, "ffff-1").await,
        (StatusCode::NOT_FOUND, CallbackReply::MISSING)
    );
}

#[tokio::test]
async fn blank_ids_are_rejected_before_lookup() {
    let app = app();
    assert_eq!(
        post(&app, "   ").await,
        (StatusCode::BAD_REQUEST, CallbackReply::MISSING_ID)
    );
    let (status, Json(reply)) = callback_without_id().await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(reply, CallbackReply::MISSING_ID);
}

#[tokio::test]
async fn replies_serialize_as_action_and_status() {
    let response = (StatusCode::OK, Json(CallbackReply::EXECUTED)).into_response();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let body: Value = serde_json::from_slice(&bytes).expect("json");
    assert_eq!(body, json!({"action": "reload", "status": "ok"}));
    assert_eq!(
        serde_json::to_value(CallbackReply::MISSING).expect("json"),
        json!({"action": "noop", "status": "missing"})
    );
    assert_eq!(
        serde_json::to_value(CallbackReply::MISSING_ID).expect("json"),
        json!({"action": "error", "status": "missing-id"})
    );
}

#[tokio::test]
async fn stale_pages_lose_their_callbacks() {
    let app = app_with(ServerConfig {
        retained_pages: 1,
        ..ServerConfig::default()
    });
    let first = onclick_ids(&page(&app).await);
    let second = onclick_ids(&page(&app).await);

    assert!(first.iter().all(|id| !app.registry().has_callback(id)));
    assert!(second.iter().all(|id| app.registry().has_callback(id)));
    assert_eq!(app.registry().size(), 3);
}

#[tokio::test]
async fn healthz_answers_ok() {
    assert_eq!(healthz().await, "ok");
}

#[tokio::test]
async fn callback_routes_without_an_id_are_bad_requests() {
    let app = app();
    let missing_id = json!({"action": "error", "status": "missing-id"});
    for uri in ["/callback", "/callback/", "/callback/%20%20"] {
        assert_eq!(
            post_json(&app, uri).await,
            (StatusCode::BAD_REQUEST, missing_id.clone()),
            "{uri}"
        );
    }
}

#[tokio::test]
async fn routed_callback_runs_a_rendered_handler_once() {
    let app = app();
    let (status, body) = send(&app, Method::GET, "/").await;
    assert_eq!(status, StatusCode::OK);
    let ids = onclick_ids(&String::from_utf8(body).expect("utf-8"));
    let increment = format!("/callback/{}", ids[1]);

    assert_eq!(
        post_json(&app, &increment).await,
        (StatusCode::OK, json!({"action": "reload", "status": "ok"}))
    );
    assert_eq!(app.counter().get(), 1);
    assert_eq!(
        post_json(&app, &increment).await,
        (StatusCode::NOT_FOUND, json!({"action": "noop", "status": "missing"}))
    );
    assert_eq!(
        post_json(&app, "/callback/nope").await,
        (StatusCode::NOT_FOUND, json!({"action": "noop", "status": "missing"}))
    );
}

#[tokio::test]
async fn routed_healthz_answers_ok() {
    let (status, body) = send(&app(), Method::GET, "/healthz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"ok");
}
