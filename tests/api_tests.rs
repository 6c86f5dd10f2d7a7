mod common;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode, header},
};
use common::TestDrive;
use matter_drive::{AppState, routes::routes::routes};
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

struct Api {
    app: Router,
    user: Uuid,
    _drive: TestDrive,
}

impl Api {
    async fn new() -> Self {
        let drive = TestDrive::new().await;
        let app = routes().with_state(AppState::new(drive.service.clone()));
        Self {
            app,
            user: Uuid::new_v4(),
            _drive: drive,
        }
    }

    async fn send(&self, method: Method, uri: &str, body: Body) -> (StatusCode, Vec<u8>) {
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .header("x-user-id", self.user.to_string())
            .header(header::CONTENT_TYPE, "application/json")
            .body(body)
            .unwrap();
        let resp = self.app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, bytes.to_vec())
    }

    async fn json(&self, method: Method, uri: &str, body: Value) -> (StatusCode, Value) {
        let (status, bytes) = self.send(method, uri, Body::from(body.to_string())).await;
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }
}

#[tokio::test]
async fn requests_without_caller_are_rejected() {
    let api = Api::new().await;
    let req = Request::builder()
        .method(Method::POST)
        .uri("/matters/root")
        .body(Body::empty())
        .unwrap();
    let resp = api.app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn health_endpoints_respond() {
    let api = Api::new().await;
    let (status, _) = api.send(Method::GET, "/healthz", Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = api.json(Method::GET, "/readyz", Value::Null).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["checks"]["sqlite"]["ok"], true);
}

#[tokio::test]
async fn drive_flow_over_http() {
    let api = Api::new().await;

    let (status, root) = api.json(Method::POST, "/matters/root", Value::Null).await;
    assert_eq!(status, StatusCode::OK);
    let root_id = root["id"].as_str().unwrap().to_string();

    let uri = format!("/matters/{root_id}/folders");
    let (status, docs) = api.json(Method::POST, &uri, json!({ "name": "docs" })).await;
    assert_eq!(status, StatusCode::CREATED);
    let docs_id = docs["id"].as_str().unwrap().to_string();
    let (status, err) = api.json(Method::POST, &uri, json!({ "name": "docs" })).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(err["status"], 409);

    let (status, bytes) = api
        .send(
            Method::PUT,
            &format!("/matters/{docs_id}/files/a.txt"),
            Body::from("hello"),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let file: Value = serde_json::from_slice(&bytes).unwrap();
    let file_id = file["id"].as_str().unwrap().to_string();
    assert_eq!(file["size_bytes"], 5);

    let req = Request::builder()
        .uri(format!("/matters/{file_id}/content"))
        .header("x-user-id", api.user.to_string())
        .body(Body::empty())
        .unwrap();
    let resp = api.app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers()[header::ETAG],
        "\"5d41402abc4b2a76b9719d911017c592\""
    );
    let content = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&content[..], b"hello");

    let (_, size) = api
        .json(Method::GET, &format!("/matters/{docs_id}/size"), Value::Null)
        .await;
    assert_eq!(size["size_bytes"], 5);
    let (_, path) = api
        .json(Method::GET, &format!("/matters/{file_id}/path"), Value::Null)
        .await;
    assert_eq!(path["path"], "/docs/a.txt");

    let (status, link) = api
        .json(Method::POST, "/shares", json!({ "matter_id": docs_id, "ttl_secs": 3600 }))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(link["mode"], "READ_ONLY");

    let (status, _) = api
        .json(Method::POST, "/shares", json!({ "matter_id": docs_id, "ttl_secs": -5 }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, writable) = api
        .json(Method::POST, "/shares", json!({ "matter_id": docs_id, "mode": "READ_WRITE" }))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, resolved) = api
        .json(Method::GET, &format!("/shares/{}", writable["token"].as_str().unwrap()), Value::Null)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resolved["mode"], "READ_WRITE");
    assert_eq!(resolved["matter_id"], docs_id);
    let token = link["token"].as_str().unwrap().to_string();
    let (status, shared) = api
        .send(
            Method::GET,
            &format!("/shares/{token}/content?matter_id={file_id}"),
            Body::empty(),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(shared, b"hello");

    let (status, report) = api
        .json(Method::DELETE, &format!("/matters/{docs_id}"), Value::Null)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["matters_deleted"], 2);
    assert_eq!(report["references_released"], 1);

    let (status, _) = api
        .json(Method::GET, &format!("/shares/{token}"), Value::Null)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = api
        .json(Method::POST, &format!("/matters/{root_id}/rename"), json!({ "name": "x" }))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}
