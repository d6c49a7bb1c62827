use std::net::SocketAddr;
use std::sync::Arc;

use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use ulid::Ulid;

use innkeep::api::{self, AppState};
use innkeep::engine::Engine;

// ── Test infrastructure ──────────────────────────────────────

struct TestServer {
    base: String,
    engine: Arc<Engine>,
    client: Client,
}

async fn start_test_server() -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("innkeep_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let engine = Arc::new(Engine::new(dir.join("innkeep.wal")).unwrap());

    let app = api::router(AppState::new(engine.clone()));
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    TestServer {
        base: format!("http://{addr}"),
        engine,
        client: Client::new(),
    }
}

impl TestServer {
    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    async fn room(&self, number: u32, price: &str, capacity: u32) {
        let price: Decimal = price.parse().unwrap();
        self.engine.create_room(number, price, capacity).await.unwrap();
    }

    async fn register(&self, username: &str) -> reqwest::Response {
        self.client
            .post(self.url("/register/"))
            .json(&json!({
                "username": username,
                "email": format!("{username}@example.com"),
                "password": "s3cret-pw",
            }))
            .send()
            .await
            .unwrap()
    }

    /// Register and log in, returning the token.
    async fn guest(&self, username: &str) -> String {
        assert_eq!(self.register(username).await.status(), StatusCode::CREATED);
        let resp = self
            .client
            .post(self.url("/login/"))
            .json(&json!({ "username": username, "password": "s3cret-pw" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = resp.json().await.unwrap();
        body["token"].as_str().unwrap().to_string()
    }

    async fn reserve(&self, token: &str, room: u32, check_in: &str, check_out: &str) -> reqwest::Response {
        self.client
            .post(self.url("/reservations/"))
            .header("Authorization", format!("Token {token}"))
            .json(&json!({
                "room": room,
                "check_in_date": check_in,
                "check_out_date": check_out,
            }))
            .send()
            .await
            .unwrap()
    }

    async fn get_authed(&self, token: &str, path: &str) -> reqwest::Response {
        self.client
            .get(self.url(path))
            .header("Authorization", format!("Token {token}"))
            .send()
            .await
            .unwrap()
    }

    async fn room_numbers(&self, query: &str) -> Vec<u64> {
        let resp = self
            .client
            .get(self.url(&format!("/rooms/{query}")))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK, "GET /rooms/{query}");
        let rooms: Vec<Value> = resp.json().await.unwrap();
        rooms.iter().map(|r| r["number"].as_u64().unwrap()).collect()
    }
}

// ── Rooms ────────────────────────────────────────────────────

#[tokio::test]
async fn rooms_listing_and_filters() {
    let srv = start_test_server().await;
    srv.room(101, "150", 2).await;
    srv.room(102, "90", 1).await;
    srv.room(103, "250", 4).await;
    srv.room(104, "200", 3).await;

    let resp = srv.client.get(srv.url("/rooms/")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let rooms: Vec<Value> = resp.json().await.unwrap();
    assert_eq!(rooms.len(), 4);
    assert_eq!(rooms[0], json!({ "number": 101, "price_per_night": "150.00", "capacity": 2 }));

    assert_eq!(srv.room_numbers("?min_price=100&max_price=200").await, [101, 104]);
    assert_eq!(srv.room_numbers("?min_capacity=3").await, [103, 104]);
    assert_eq!(srv.room_numbers("?sort_by=asc").await, [102, 101, 104, 103]);
    assert_eq!(srv.room_numbers("?sort_by=desc").await, [103, 104, 101, 102]);

    let token = srv.guest("alice").await;
    let resp = srv.reserve(&token, 101, "2024-01-10", "2024-01-15").await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    assert_eq!(
        srv.room_numbers("?check_in_date=2024-01-12&check_out_date=2024-01-13").await,
        [102, 103, 104]
    );
    assert_eq!(
        srv.room_numbers("?check_in_date=2024-01-15&check_out_date=2024-01-20").await,
        [101, 102, 103, 104]
    );
}

#[tokio::test]
async fn rooms_listing_rejects_bad_params() {
    let srv = start_test_server().await;
    srv.room(101, "150", 2).await;

    for query in [
        "?min_price=cheap",
        "?min_capacity=lots",
        "?sort_by=price",
        "?check_in_date=2024-01-15&check_out_date=2024-01-10",
        "?check_in_date=yesterday&check_out_date=2024-01-10",
    ] {
        let resp = srv
            .client
            .get(srv.url(&format!("/rooms/{query}")))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{query}");
        let body: Value = resp.json().await.unwrap();
        assert!(body["error"].is_string(), "{query}: {body}");
    }
}

// ── Reservations ─────────────────────────────────────────────

#[tokio::test]
async fn reservation_lifecycle() {
    let srv = start_test_server().await;
    srv.room(101, "150", 2).await;
    let alice = srv.guest("alice").await;

    let resp = srv.reserve(&alice, 101, "2024-01-10", "2024-01-15").await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let created: Value = resp.json().await.unwrap();
    assert_eq!(created["room"], 101);
    assert_eq!(created["check_in_date"], "2024-01-10");
    assert_eq!(created["check_out_date"], "2024-01-15");
    let id = created["id"].as_str().unwrap().to_string();

    // Back-to-back is fine, overlap is not.
    let resp = srv.reserve(&alice, 101, "2024-01-15", "2024-01-20").await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let resp = srv.reserve(&alice, 101, "2024-01-12", "2024-01-18").await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("not available"));

    let resp = srv.get_authed(&alice, "/reservations/").await;
    assert_eq!(resp.status(), StatusCode::OK);
    let mine: Vec<Value> = resp.json().await.unwrap();
    assert_eq!(mine.len(), 2);
    assert_eq!(mine[0]["id"], id.as_str());

    let resp = srv.get_authed(&alice, &format!("/reservations/{id}/")).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = srv
        .client
        .delete(srv.url(&format!("/reservations/{id}/")))
        .header("Authorization", format!("Token {alice}"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = srv.get_authed(&alice, &format!("/reservations/{id}/")).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn reservation_input_errors() {
    let srv = start_test_server().await;
    srv.room(101, "150", 2).await;
    let alice = srv.guest("alice").await;

    let resp = srv.reserve(&alice, 999, "2024-01-10", "2024-01-15").await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = srv.reserve(&alice, 101, "2024-01-15", "2024-01-10").await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = srv.reserve(&alice, 101, "not-a-date", "2024-01-10").await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"].is_string());

    let resp = srv
        .client
        .post(srv.url("/reservations/"))
        .header("Authorization", format!("Token {alice}"))
        .json(&json!({ "room": 101 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = srv.get_authed(&alice, "/reservations/not-a-ulid/").await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = srv
        .get_authed(&alice, &format!("/reservations/{}/", Ulid::new()))
        .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn reservations_require_authentication() {
    let srv = start_test_server().await;
    srv.room(101, "150", 2).await;

    let resp = srv
        .client
        .post(srv.url("/reservations/"))
        .json(&json!({ "room": 101, "check_in_date": "2024-01-10", "check_out_date": "2024-01-15" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let bogus = "0".repeat(40);
    let resp = srv.get_authed(&bogus, "/reservations/").await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = srv
        .client
        .get(srv.url("/reservations/"))
        .header("Authorization", "Basic dXNlcjpwdw==")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn only_owner_can_see_or_cancel() {
    let srv = start_test_server().await;
    srv.room(101, "150", 2).await;
    let alice = srv.guest("alice").await;
    let mallory = srv.guest("mallory").await;

    let resp = srv.reserve(&alice, 101, "2024-01-10", "2024-01-15").await;
    let created: Value = resp.json().await.unwrap();
    let id = created["id"].as_str().unwrap().to_string();

    let resp = srv.get_authed(&mallory, &format!("/reservations/{id}/")).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let resp = srv
        .client
        .delete(srv.url(&format!("/reservations/{id}/")))
        .header("Authorization", format!("Bearer {mallory}"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    // Still there for its owner.
    let resp = srv.get_authed(&alice, &format!("/reservations/{id}/")).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = srv.get_authed(&mallory, "/reservations/").await;
    let theirs: Vec<Value> = resp.json().await.unwrap();
    assert!(theirs.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_book_once() {
    let srv = Arc::new(start_test_server().await);
    srv.room(101, "150", 2).await;
    let token = srv.guest("alice").await;

    let mut handles = Vec::new();
    for _ in 0..16 {
        let srv = srv.clone();
        let token = token.clone();
        handles.push(tokio::spawn(async move {
            srv.reserve(&token, 101, "2024-03-01", "2024-03-05").await.status()
        }));
    }

    let statuses: Vec<StatusCode> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|h| h.unwrap())
        .collect();
    assert_eq!(statuses.iter().filter(|s| **s == StatusCode::CREATED).count(), 1);
    assert_eq!(statuses.iter().filter(|s| **s == StatusCode::BAD_REQUEST).count(), 15);
}

// ── Accounts ─────────────────────────────────────────────────

#[tokio::test]
async fn register_never_echoes_password() {
    let srv = start_test_server().await;

    let resp = srv.register("alice").await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let text = resp.text().await.unwrap();
    assert!(!text.contains("s3cret-pw"));
    assert!(!text.contains("password"));
    let body: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(body["username"], "alice");
    assert_eq!(body["email"], "alice@example.com");
    assert!(body["id"].is_string());

    let resp = srv.register("alice").await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = srv
        .client
        .post(srv.url("/register/"))
        .json(&json!({ "username": "bob", "email": "nope", "password": "pw" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn login_and_logout() {
    let srv = start_test_server().await;
    let token = srv.guest("alice").await;
    assert_eq!(token.len(), 40);

    let resp = srv
        .client
        .post(srv.url("/login/"))
        .json(&json!({ "username": "alice", "password": "wrong" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = srv.get_authed(&token, "/logout/").await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = srv.get_authed(&token, "/reservations/").await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn profile_lists_and_cancels() {
    let srv = start_test_server().await;
    srv.room(101, "150", 2).await;
    srv.room(102, "90", 1).await;
    let alice = srv.guest("alice").await;
    let bob = srv.guest("bob").await;

    let first: Value = srv
        .reserve(&alice, 101, "2024-02-01", "2024-02-03")
        .await
        .json()
        .await
        .unwrap();
    srv.reserve(&alice, 102, "2024-01-20", "2024-01-22").await;
    let bobs: Value = srv
        .reserve(&bob, 102, "2024-03-01", "2024-03-02")
        .await
        .json()
        .await
        .unwrap();

    let resp = srv.get_authed(&alice, "/accounts/profile/").await;
    assert_eq!(resp.status(), StatusCode::OK);
    let profile: Value = resp.json().await.unwrap();
    assert_eq!(profile["user"]["username"], "alice");
    let listed = profile["reservations"].as_array().unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0]["check_in_date"], "2024-01-20");

    // Someone else's reservation is ignored.
    let resp = srv
        .client
        .post(srv.url("/accounts/profile/"))
        .header("Authorization", format!("Token {alice}"))
        .json(&json!({ "reservation_id": bobs["id"] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let profile: Value = resp.json().await.unwrap();
    assert_eq!(profile["reservations"].as_array().unwrap().len(), 2);
    let resp = srv.get_authed(&bob, "/reservations/").await;
    let still: Vec<Value> = resp.json().await.unwrap();
    assert_eq!(still.len(), 1);

    let resp = srv
        .client
        .post(srv.url("/accounts/profile/"))
        .header("Authorization", format!("Token {alice}"))
        .json(&json!({ "reservation_id": first["id"] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let profile: Value = resp.json().await.unwrap();
    let listed = profile["reservations"].as_array().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["room"], 102);

    let resp = srv
        .client
        .post(srv.url("/accounts/profile/"))
        .header("Authorization", format!("Token {alice}"))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn profile_cancel_accepts_form_posts_and_ignores_bad_bodies() {
    let srv = start_test_server().await;
    srv.room(101, "150", 2).await;
    let alice = srv.guest("alice").await;
    let booked: Value = srv
        .reserve(&alice, 101, "2024-02-01", "2024-02-03")
        .await
        .json()
        .await
        .unwrap();
    let id = booked["id"].as_str().unwrap();

    for (content_type, body) in [
        ("application/json", "{not json".to_string()),
        ("application/x-www-form-urlencoded", "reservation_id=%zz".to_string()),
        ("text/plain", format!("reservation_id={id}")),
    ] {
        let resp = srv
            .client
            .post(srv.url("/accounts/profile/"))
            .header("Authorization", format!("Token {alice}"))
            .header("Content-Type", content_type)
            .body(body)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK, "{content_type} body should be ignored");
        let profile: Value = resp.json().await.unwrap();
        assert_eq!(profile["reservations"].as_array().unwrap().len(), 1);
    }

    let resp = srv
        .client
        .post(srv.url("/accounts/profile/"))
        .header("Authorization", format!("Token {alice}"))
        .header("Content-Type", "application/x-www-form-urlencoded")
        .body(format!("reservation_id={id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let profile: Value = resp.json().await.unwrap();
    assert!(profile["reservations"].as_array().unwrap().is_empty());
    let resp = srv.get_authed(&alice, "/reservations/").await;
    let left: Vec<Value> = resp.json().await.unwrap();
    assert!(left.is_empty());
}

#[tokio::test]
async fn health_is_public() {
    let srv = start_test_server().await;
    srv.room(101, "150", 2).await;
    let resp = srv.client.get(srv.url("/health/")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["rooms"], 1);
}
