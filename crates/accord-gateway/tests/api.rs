use std::sync::{Arc, Mutex};

use accord_core::{
    AgreementController, AgreementSettings, FileStorage, MemoryAgreementStore, MemoryFileStorage,
    Notifier,
};
use accord_gateway::{AppState, router};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

// -- Test doubles ---------------------------------------------------------

#[derive(Default)]
struct Outbox {
    sent: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl Notifier for Outbox {
    async fn send(&self, _from: &str, to: &str, _subject: &str, body: &str) -> anyhow::Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), body.to_string()));
        Ok(())
    }
}

struct FailingNotifier;

#[async_trait]
impl Notifier for FailingNotifier {
    async fn send(&self, _: &str, _: &str, _: &str, _: &str) -> anyhow::Result<()> {
        anyhow::bail!("connection refused")
    }
}

// -- Helpers --------------------------------------------------------------

struct TestApp {
    app: axum::Router,
    files: Arc<MemoryFileStorage>,
    outbox: Arc<Outbox>,
}

fn build_app_with(notifier: Arc<dyn Notifier>, outbox: Arc<Outbox>) -> TestApp {
    let files = Arc::new(MemoryFileStorage::new());
    let controller = AgreementController::new(
        Arc::new(MemoryAgreementStore::new()),
        files.clone(),
        notifier,
        AgreementSettings::default(),
    );

    TestApp {
        app: router(AppState { controller }),
        files,
        outbox,
    }
}

fn build_app() -> TestApp {
    let outbox = Arc::new(Outbox::default());
    build_app_with(outbox.clone(), outbox)
}

async fn send(app: &axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();

    let value = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&body).into_owned()))
    };
    (status, value)
}

fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

const BOUNDARY: &str = "accord-test-boundary";

enum Part<'a> {
    Text(&'a str, &'a str),
    File(&'a str, &'a str, &'a [u8]),
}

fn multipart_request(method: Method, uri: &str, parts: &[Part<'_>]) -> Request<Body> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part {
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n")
                        .as_bytes(),
                );
            }
            Part::File(name, file_name, bytes) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(bytes);
                body.extend_from_slice(b"\r\n");
            }
        }
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method(method)
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn create(app: &axum::Router, body: Value) -> (i64, String) {
    let (status, json) = send(app, json_request(Method::POST, "/agreement/", body)).await;
    assert_eq!(status, StatusCode::CREATED, "{json}");
    (
        json["agreement"]["id"].as_i64().unwrap(),
        json["access_token"].as_str().unwrap().to_string(),
    )
}

// -- Tests ----------------------------------------------------------------

#[tokio::test]
async fn healthz_returns_ok() {
    let t = build_app();
    let (status, body) = send(&t.app, get("/healthz")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "ok");
}

#[tokio::test]
async fn create_returns_token_and_mails_it() {
    let t = build_app();

    let (status, body) = send(
        &t.app,
        multipart_request(
            Method::POST,
            "/agreement/",
            &[
                Part::Text("first_party_address", "addr1"),
                Part::Text("content", "Sale of goods"),
                Part::Text("email", "a@b.com"),
            ],
        ),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED, "{body}");
    let token = body["access_token"].as_str().unwrap();
    assert!(Uuid::parse_str(token).is_ok());
    assert_eq!(body["agreement"]["access_token"], token);
    assert_eq!(body["agreement"]["content"], "Sale of goods");

    let sent = t.outbox.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "a@b.com");
    assert!(sent[0].1.contains(token));
}

#[tokio::test]
async fn create_skips_untouched_file_inputs() {
    let t = build_app();

    let (status, body) = send(
        &t.app,
        multipart_request(
            Method::POST,
            "/agreement/",
            &[
                Part::Text("content", "Sale of goods"),
                Part::Text("first_party_address", "addr1"),
                Part::File("first_party_signature", "", b""),
            ],
        ),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert!(body["agreement"]["first_party_signature"].is_null());
    assert!(t.files.paths().await.is_empty());
}

#[tokio::test]
async fn urlencoded_forms_update_and_trim_values() {
    let t = build_app();
    let (_, token) = create(
        &t.app,
        json!({"content": "terms", "first_party_address": "addr1"}),
    )
    .await;

    let request = Request::builder()
        .method(Method::PATCH)
        .uri(format!("/agreement/{token}/"))
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(
            "first_party_name=Ada+Lovelace&second_party_address=+addr2+&agreementType=lease",
        ))
        .unwrap();
    let (status, body) = send(&t.app, request).await;

    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["first_party_name"], "Ada Lovelace");
    assert_eq!(body["second_party_address"], "addr2");
    assert_eq!(body["agreementType"], "lease");

    let (status, hits) = send(&t.app, get("/agreement/by_party/?address=addr2")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(hits.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn create_rejects_invalid_payloads() {
    let t = build_app();

    let (status, body) = send(
        &t.app,
        json_request(Method::POST, "/agreement/", json!({"content": "terms"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.as_str().unwrap().contains("first_party_address"));

    let (status, body) = send(
        &t.app,
        json_request(
            Method::POST,
            "/agreement/",
            json!({"content": "terms", "first_party_address": "addr1", "email": "nope"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.as_str().unwrap().contains("email"));

    let request = Request::builder()
        .method(Method::POST)
        .uri("/agreement/")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, _) = send(&t.app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn delivery_failure_is_a_server_error() {
    let outbox = Arc::new(Outbox::default());
    let t = build_app_with(Arc::new(FailingNotifier), outbox);

    let (status, _) = send(
        &t.app,
        json_request(
            Method::POST,
            "/agreement/",
            json!({"content": "terms", "first_party_address": "addr1", "email": "a@b.com"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    let (status, _) = send(&t.app, get("/agreement/1/")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn id_reads_hide_the_token_and_token_reads_show_it() {
    let t = build_app();
    let (id, token) = create(
        &t.app,
        json!({"content": "terms", "first_party_address": "addr1"}),
    )
    .await;

    let (status, body) = send(&t.app, get(&format!("/agreement/{id}/"))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.get("access_token").is_none());
    assert_eq!(body["first_party_address"], "addr1");

    let (status, body) = send(&t.app, get(&format!("/agreement/{token}/"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["access_token"], token.as_str());

    let (status, body) = send(
        &t.app,
        get(&format!("/agreement/access_token/?access_token={token}")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], id);
}

#[tokio::test]
async fn unknown_keys_are_denied() {
    let t = build_app();

    let (status, _) = send(&t.app, get(&format!("/agreement/{}/", Uuid::new_v4()))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(&t.app, get("/agreement/not-a-token/")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(&t.app, get("/agreement/99/")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(&t.app, get("/agreement/access_token/")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body, "Access token is required.");
}

#[tokio::test]
async fn restricted_token_update_ignores_second_party_identity() {
    let t = build_app();
    let (id, token) = create(
        &t.app,
        json!({"content": "terms", "first_party_address": "addr1"}),
    )
    .await;

    let (status, body) = send(
        &t.app,
        json_request(
            Method::PATCH,
            &format!("/agreement/access_token_update/?access_token={token}"),
            json!({
                "first_party_name": "Ada",
                "second_party_country": "France",
                "second_party_id_type": "passport",
                "second_party_address": "addr2"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["first_party_name"], "Ada");
    assert_eq!(body["second_party_address"], "addr2");
    assert!(body["second_party_country"].is_null());
    assert!(body["second_party_id_type"].is_null());

    let (_, body) = send(&t.app, get(&format!("/agreement/{id}/"))).await;
    assert!(body["second_party_country"].is_null());
}

#[tokio::test]
async fn full_token_put_requires_required_fields() {
    let t = build_app();
    let (_, token) = create(
        &t.app,
        json!({"content": "terms", "first_party_address": "addr1"}),
    )
    .await;

    let (status, _) = send(
        &t.app,
        json_request(
            Method::PUT,
            &format!("/agreement/{token}/"),
            json!({"content": "new terms"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &t.app,
        json_request(
            Method::PUT,
            &format!("/agreement/{token}/"),
            json!({
                "content": "new terms",
                "first_party_address": "addr1",
                "second_party_country": "Kenya"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["content"], "new terms");
    assert_eq!(body["second_party_country"], "Kenya");
}

#[tokio::test]
async fn id_update_applies_only_second_party_fields_and_renames_files() {
    let t = build_app();
    let (id, _) = create(
        &t.app,
        json!({"content": "Sale of goods", "first_party_address": "addr1", "email": "a@b.com"}),
    )
    .await;

    let (status, body) = send(
        &t.app,
        multipart_request(
            Method::PATCH,
            &format!("/agreement/{id}/?address=addr2"),
            &[
                Part::Text("second_party_address", "addr2"),
                Part::Text("content", "hijacked"),
                Part::Text("second_party_fullname", "Grace"),
                Part::File("second_party_signature", "signature.png", b"ink"),
            ],
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "{body}");
    assert!(body.get("access_token").is_none());
    assert_eq!(body["content"], "Sale of goods");
    assert!(body["second_party_address"].is_null());
    assert_eq!(body["second_party_name"], "Grace");

    let url = body["second_party_signature"].as_str().unwrap();
    assert!(url.starts_with("/media/signatures/"));
    assert!(url.ends_with(".png"));
    assert!(!url.ends_with("/signature.png"));

    let path = url.trim_start_matches("/media/");
    assert_eq!(t.files.read(path).await.unwrap(), Some(b"ink".to_vec()));

    let (status, body) = send(
        &t.app,
        multipart_request(
            Method::POST,
            &format!("/agreement/{id}/sign/"),
            &[Part::File("second_party_signature", "again.png", b"more ink")],
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, "Agreement already signed.");
}

#[tokio::test]
async fn sign_is_one_time_and_needs_a_file() {
    let t = build_app();
    let (id, _) = create(
        &t.app,
        json!({"content": "terms", "first_party_address": "addr1"}),
    )
    .await;

    let (status, body) = send(
        &t.app,
        multipart_request(
            Method::POST,
            &format!("/agreement/{id}/sign/"),
            &[Part::Text("note", "no file here")],
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, "No signature file provided.");

    let (status, body) = send(
        &t.app,
        multipart_request(
            Method::POST,
            &format!("/agreement/{id}/sign/"),
            &[Part::File("signature", "sig.jpg", b"first")],
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let first = body["second_party_signature"].as_str().unwrap().to_string();

    let (status, _) = send(
        &t.app,
        multipart_request(
            Method::POST,
            &format!("/agreement/{id}/sign/"),
            &[Part::File("signature", "sig.jpg", b"second")],
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, body) = send(&t.app, get(&format!("/agreement/{id}/"))).await;
    assert_eq!(body["second_party_signature"], first.as_str());
    assert_eq!(t.files.paths().await.len(), 1);
}

#[tokio::test]
async fn file_urls_are_absolute_with_a_host_header() {
    let t = build_app();
    let (id, _) = create(
        &t.app,
        json!({"content": "terms", "first_party_address": "addr1"}),
    )
    .await;
    send(
        &t.app,
        multipart_request(
            Method::POST,
            &format!("/agreement/{id}/sign/"),
            &[Part::File("signature", "sig.png", b"ink")],
        ),
    )
    .await;

    let request = Request::builder()
        .uri(format!("/agreement/{id}/"))
        .header(header::HOST, "agreements.example.com")
        .header("x-forwarded-proto", "https")
        .body(Body::empty())
        .unwrap();
    let (_, body) = send(&t.app, request).await;

    assert!(
        body["second_party_signature"]
            .as_str()
            .unwrap()
            .starts_with("https://agreements.example.com/media/signatures/")
    );
}

#[tokio::test]
async fn second_party_patch_checks_the_address() {
    let t = build_app();
    let (id, _) = create(
        &t.app,
        json!({"content": "terms", "first_party_address": "addr1", "second_party_address": "addr2"}),
    )
    .await;

    let (status, _) = send(
        &t.app,
        json_request(
            Method::PATCH,
            &format!("/agreement/{id}/patch_second_party/"),
            json!({"second_party_address": "someone-else", "second_party_name": "Mallory"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(
        &t.app,
        json_request(
            Method::PATCH,
            &format!("/agreement/{id}/patch_second_party/"),
            json!({
                "second_party_address": "ADDR2",
                "second_party_name": "Grace",
                "second_party_country": "Chile",
                "first_party_name": "not allowed"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["second_party_name"], "Grace");
    assert_eq!(body["second_party_country"], "Chile");
    assert!(body["first_party_name"].is_null());
}

#[tokio::test]
async fn party_search_reveals_tokens_only_for_first_party_matches() {
    let t = build_app();
    let (mine_id, mine_token) = create(
        &t.app,
        json!({"content": "a", "first_party_address": "0xabc"}),
    )
    .await;
    let (theirs_id, _) = create(
        &t.app,
        json!({"content": "b", "first_party_address": "0xdef", "second_party_address": "0xABC"}),
    )
    .await;

    let (status, body) = send(&t.app, get("/agreement/by_party/?address=0xABC")).await;
    assert_eq!(status, StatusCode::OK);

    let hits = body.as_array().unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0]["id"], mine_id);
    assert_eq!(hits[0]["access_token"], mine_token.as_str());
    assert_eq!(hits[1]["id"], theirs_id);
    assert!(hits[1].get("access_token").is_some());
    assert!(hits[1]["access_token"].is_null());
}

#[tokio::test]
async fn strict_party_search_and_missing_parameters() {
    let t = build_app();
    create(
        &t.app,
        json!({"content": "a", "first_party_address": "0xabc", "second_party_address": "0xdef"}),
    )
    .await;

    let (status, body) = send(&t.app, get("/agreement/by_party/?second_party_address=0xdef")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert!(body[0]["access_token"].is_null());

    let (_, body) = send(&t.app, get("/agreement/by_party/?first_party_address=0xABC")).await;
    assert!(body.as_array().unwrap().is_empty());

    let (status, body) = send(&t.app, get("/agreement/by_party/")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.as_str().unwrap().contains("first_party_address"));
}

#[tokio::test]
async fn deleting_by_token_makes_the_token_useless() {
    let t = build_app();
    let (_, token) = create(
        &t.app,
        json!({"content": "terms", "first_party_address": "addr1"}),
    )
    .await;

    let request = Request::builder()
        .method(Method::DELETE)
        .uri(format!("/agreement/{token}/"))
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&t.app, request).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(&t.app, get(&format!("/agreement/{token}/"))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}
