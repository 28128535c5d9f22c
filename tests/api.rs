//! End-to-end HTTP tests against the in-memory backend.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;
use uuid::Uuid;

use rollcall_server::attendance::InMemoryStore;
use rollcall_server::notify::{NotificationError, Notifier};
use rollcall_server::routes::api_routes;
use rollcall_server::state::AppState;

const ADMIN_ID: &str = "5f0c6a1e-2b8c-4f1a-9d0e-7a3b2c1d0e9f";

#[derive(Default)]
struct Outbox {
    sent: Mutex<Vec<String>>,
    fail: bool,
}

#[async_trait]
impl Notifier for Outbox {
    async fn send(
        &self,
        to: &str,
        _subject: &str,
        _html_body: &str,
    ) -> Result<(), NotificationError> {
        if self.fail {
            return Err(NotificationError::Transport("connection refused".into()));
        }
        self.sent.lock().unwrap().push(to.to_string());
        Ok(())
    }
}

struct TestApp {
    router: Router,
    store: InMemoryStore,
    outbox: Arc<Outbox>,
}

impl TestApp {
    fn new() -> Self {
        Self::with_outbox(Outbox::default())
    }

    fn with_outbox(outbox: Outbox) -> Self {
        let store = InMemoryStore::new();
        let outbox = Arc::new(outbox);
        let state = AppState::in_memory(store.clone(), outbox.clone(), "http://test.local");
        Self {
            router: api_routes(state),
            store,
            outbox,
        }
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Vec<u8>, Option<String>) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .map(|v| v.to_str().unwrap().to_string());
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec();
        (status, body, content_type)
    }

    async fn json(&self, request: Request<Body>) -> (StatusCode, Value) {
        let (status, body, _) = self.send(request).await;
        (status, serde_json::from_slice(&body).unwrap())
    }

    async fn create_event(&self, title: &str) -> String {
        let (status, body) = self
            .json(admin_post(
                "/events",
                json!({
                    "title": title,
                    "description": "Welcome week",
                    "location": "Main Hall",
                    "eventDate": "2026-09-01",
                    "eventTime": "18:00:00"
                }),
            ))
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["data"]["id"].as_str().unwrap().to_string()
    }

    async fn register(&self, event_id: &str, name: &str, email: &str) -> (StatusCode, Value) {
        self.json(post(
            "/registrations",
            json!({ "eventId": event_id, "name": name, "email": email }),
        ))
        .await
    }
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn admin_post(uri: &str, body: Value) -> Request<Body> {
    let mut request = post(uri, body);
    add_admin_headers(&mut request);
    request
}

fn admin(method: &str, uri: &str) -> Request<Body> {
    let mut request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    add_admin_headers(&mut request);
    request
}

fn add_admin_headers(request: &mut Request<Body>) {
    let headers = request.headers_mut();
    headers.insert("x-profile-id", ADMIN_ID.parse().unwrap());
    headers.insert("x-profile-role", "admin".parse().unwrap());
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_health() {
    let app = TestApp::new();
    let (status, body) = app.json(get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "ok");
}

#[tokio::test]
async fn test_register_then_duplicate_is_conflict() {
    let app = TestApp::new();
    let event_id = app.create_event("Fall Kickoff!").await;

    let (status, body) = app.register(&event_id, "Ada", "ada@x.com").await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let registration_id = body["data"]["registrationId"].as_str().unwrap();
    assert_eq!(
        body["data"]["tokenImageUrl"],
        format!("http://test.local/registrations/{registration_id}/qrcode")
    );
    assert_eq!(body["data"]["notification"], "sent");
    assert_eq!(*app.outbox.sent.lock().unwrap(), vec!["ada@x.com".to_string()]);

    let (status, body) = app.register(&event_id, "Ada", "ada@x.com").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["reason"], "AlreadyRegistered");
    assert_eq!(app.store.registration_count(), 1);
}

#[tokio::test]
async fn test_registration_input_errors() {
    let app = TestApp::new();
    let event_id = app.create_event("Kickoff").await;

    let (status, body) = app.register(&event_id, "", "ada@x.com").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["reason"], "InvalidInput");

    let (status, body) = app.register(&Uuid::new_v4().to_string(), "Ada", "ada@x.com").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["reason"], "EventNotFound");

    let (status, body) = app
        .json(
            Request::builder()
                .method("POST")
                .uri("/registrations")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["reason"], "InvalidInput");
}

#[tokio::test]
async fn test_failed_mail_is_a_warning_not_an_error() {
    let app = TestApp::with_outbox(Outbox {
        fail: true,
        ..Default::default()
    });
    let event_id = app.create_event("Kickoff").await;

    let (status, body) = app.register(&event_id, "Ada", "ada@x.com").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["notification"], "failed");
    assert_eq!(app.store.registration_count(), 1);
}

#[tokio::test]
async fn test_qrcode_endpoint_serves_png() {
    let app = TestApp::new();
    let event_id = app.create_event("Kickoff").await;
    let (_, body) = app.register(&event_id, "Ada", "ada@x.com").await;
    let registration_id = body["data"]["registrationId"].as_str().unwrap();
    let token = body["data"]["token"].as_str().unwrap().to_string();

    let (status, png, content_type) = app
        .send(get(&format!("/registrations/{registration_id}/qrcode")))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some("image/png"));

    let image = image::load_from_memory(&png).unwrap().to_luma8();
    let mut prepared = rqrr::PreparedImage::prepare_from_greyscale(
        image.width() as usize,
        image.height() as usize,
        |x, y| image.get_pixel(x as u32, y as u32).0[0],
    );
    let grids = prepared.detect_grids();
    assert_eq!(grids.len(), 1);
    assert_eq!(grids[0].decode().unwrap().1, token);

    let (status, _, _) = app
        .send(get(&format!("/registrations/{}/qrcode", Uuid::new_v4())))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _, _) = app.send(get("/registrations/not-a-uuid/qrcode")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_event_admin_routes_require_admin() {
    let app = TestApp::new();
    let (status, body) = app
        .json(post(
            "/events",
            json!({
                "title": "Kickoff",
                "location": "Main Hall",
                "eventDate": "2026-09-01",
                "eventTime": "18:00:00"
            }),
        ))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["reason"], "Forbidden");

    let event_id = app.create_event("Kickoff").await;
    let request = Request::builder()
        .method("DELETE")
        .uri(format!("/events/{event_id}"))
        .body(Body::empty())
        .unwrap();
    let (status, _) = app.json(request).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_list_events_newest_first() {
    let app = TestApp::new();
    let first = app.create_event("First").await;
    let second = app.create_event("Second").await;

    let (status, body) = app.json(get("/events")).await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec![second.as_str(), first.as_str()]);
}

#[tokio::test]
async fn test_delete_event_removes_registrations() {
    let app = TestApp::new();
    let event_id = app.create_event("Kickoff").await;
    let (_, body) = app.register(&event_id, "Ada", "ada@x.com").await;
    let registration_id = body["data"]["registrationId"].as_str().unwrap().to_string();

    let (status, _) = app.json(admin("DELETE", &format!("/events/{event_id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.store.registration_count(), 0);

    let (status, _, _) = app
        .send(get(&format!("/registrations/{registration_id}/qrcode")))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = app.json(admin("DELETE", &format!("/events/{event_id}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["reason"], "NotFound");
}

#[tokio::test]
async fn test_check_in_by_id_and_token() {
    let app = TestApp::new();
    let event_id = app.create_event("Kickoff").await;
    let (_, ada) = app.register(&event_id, "Ada", "ada@x.com").await;
    let (_, bob) = app.register(&event_id, "Bob", "bob@x.com").await;

    let ada_id = ada["data"]["registrationId"].as_str().unwrap();
    let (status, body) = app
        .json(admin("POST", &format!("/registrations/{ada_id}/check-in")))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["registration"]["checkedIn"], true);
    let first_time = body["data"]["registration"]["checkInTime"].clone();
    assert!(first_time.is_string());

    let (status, body) = app
        .json(admin("POST", &format!("/registrations/{ada_id}/check-in")))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["reason"], "AlreadyCheckedIn");

    let (_, listing) = app
        .json(admin("GET", &format!("/events/{event_id}/registrations")))
        .await;
    let rows = listing["data"].as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["checkInTime"], first_time);

    let token = bob["data"]["token"].as_str().unwrap();
    let (status, body) = app.json(admin_post("/check-in", json!({ "token": token }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["registration"]["email"], "bob@x.com");

    let (status, body) = app
        .json(admin_post("/check-in", json!({ "token": "not-base64!!" })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["reason"], "MalformedToken");
}

#[tokio::test]
async fn test_students_cannot_check_in() {
    let app = TestApp::new();
    let event_id = app.create_event("Kickoff").await;
    let (_, ada) = app.register(&event_id, "Ada", "ada@x.com").await;
    let ada_id = ada["data"]["registrationId"].as_str().unwrap();

    let request = Request::builder()
        .method("POST")
        .uri(format!("/registrations/{ada_id}/check-in"))
        .body(Body::empty())
        .unwrap();
    let (status, _) = app.json(request).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}
