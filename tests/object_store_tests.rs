mod common;

use axum::{
    Router,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    routing::get,
};
use common::{body, failing_body, read_all};
use matter_drive::{
    DriveError,
    config::BackendKind,
    services::backend::{ObjectStoreBackend, StorageBackend},
};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};
use tokio::net::TcpListener;

type Objects = Arc<Mutex<HashMap<String, Bytes>>>;

async fn put_object(
    State(objects): State<Objects>,
    Path(key): Path<String>,
    data: Bytes,
) -> StatusCode {
    if key.contains("reject") {
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    objects.lock().unwrap().insert(key, data);
    StatusCode::OK
}

async fn get_object(
    State(objects): State<Objects>,
    Path(key): Path<String>,
) -> Result<Bytes, StatusCode> {
    objects
        .lock()
        .unwrap()
        .get(&key)
        .cloned()
        .ok_or(StatusCode::NOT_FOUND)
}

async fn delete_object(State(objects): State<Objects>, Path(key): Path<String>) -> StatusCode {
    match objects.lock().unwrap().remove(&key) {
        Some(_) => StatusCode::NO_CONTENT,
        None => StatusCode::NOT_FOUND,
    }
}

/// Serve an in-memory bucket at `http://127.0.0.1:{port}/bucket`.
async fn mock_store() -> (String, Objects) {
    let objects = Objects::default();
    let app = Router::new()
        .route(
            "/bucket/{*key}",
            get(get_object).put(put_object).delete(delete_object),
        )
        .with_state(objects.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}/bucket/", addr), objects)
}

#[tokio::test]
async fn object_store_round_trip() {
    let (url, objects) = mock_store().await;
    let backend = ObjectStoreBackend::new(&url).unwrap();
    assert_eq!(backend.kind(), BackendKind::ObjectStore);

    let location = "2c/f2/2cf24dba";
    let written = backend
        .write(location, Box::pin(body(b"hello")))
        .await
        .unwrap();
    assert_eq!(written, 5);
    assert_eq!(objects.lock().unwrap().get(location).unwrap().as_ref(), b"hello");
    assert!(backend.exists(location).await.unwrap());

    let stream = backend.read(location).await.unwrap();
    assert_eq!(read_all(stream).await, b"hello");

    backend.delete(location).await.unwrap();
    assert!(!backend.exists(location).await.unwrap());
    // Deleting again is fine.
    backend.delete(location).await.unwrap();

    let err = backend.read(location).await.err().unwrap();
    assert!(matches!(err, DriveError::NotFound(_)));
}

#[tokio::test]
async fn rejected_write_leaves_nothing_behind() {
    let (url, objects) = mock_store().await;
    let backend = ObjectStoreBackend::new(&url).unwrap();

    let err = backend
        .write("reject/me", Box::pin(body(b"hello")))
        .await
        .unwrap_err();
    assert!(matches!(err, DriveError::StorageIo(_)));
    assert!(objects.lock().unwrap().is_empty());
}

#[tokio::test]
async fn failed_overwrite_keeps_existing_object() {
    let (url, objects) = mock_store().await;
    let backend = ObjectStoreBackend::new(&url).unwrap();

    let location = "2c/f2/2cf24dba";
    backend
        .write(location, Box::pin(body(b"hello")))
        .await
        .unwrap();

    // Another writer of the same content whose body breaks midway.
    assert!(backend
        .write(location, Box::pin(failing_body()))
        .await
        .is_err());
    assert!(backend.exists(location).await.unwrap());
    let stream = backend.read(location).await.unwrap();
    assert_eq!(read_all(stream).await, b"hello");

    // A rejected PUT leaves an object that was already there alone.
    objects
        .lock()
        .unwrap()
        .insert("reject/kept".to_string(), Bytes::from_static(b"kept"));
    let err = backend
        .write("reject/kept", Box::pin(body(b"other")))
        .await
        .unwrap_err();
    assert!(matches!(err, DriveError::StorageIo(_)));
    assert_eq!(
        objects.lock().unwrap().get("reject/kept").unwrap().as_ref(),
        b"kept"
    );
}

#[tokio::test]
async fn unsafe_locations_and_urls_are_refused() {
    assert!(ObjectStoreBackend::new("ftp://example.com/bucket").is_err());

    let (url, _) = mock_store().await;
    let backend = ObjectStoreBackend::new(&url).unwrap();
    let err = backend.exists("../escape").await.unwrap_err();
    assert!(matches!(err, DriveError::StorageIo(_)));
}
