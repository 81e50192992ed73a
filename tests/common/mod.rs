#![allow(dead_code)]

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode},
};
use notes_stack::db::{NoteStore, StoreOptions};
use notes_stack::router::{AppState, notes_router};
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

pub const SECRET: &str = "test-secret-0123456789";

/// Fresh SQLite-backed store with the schema applied. Keep the `TempDir`
/// alive for as long as the store is used.
pub async fn temp_store() -> (NoteStore, TempDir) {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let store = NoteStore::connect(&db_url(&dir), &StoreOptions::default())
        .await
        .expect("failed to open store");
    store.migrate().await.expect("migration failed");
    (store, dir)
}

pub fn db_url(dir: &TempDir) -> String {
    format!(
        "sqlite://{}?mode=rwc",
        dir.path().join("notes.sqlite").display()
    )
}

/// Second, independent handle on the database behind a `temp_store`.
pub async fn reopen(dir: &TempDir) -> NoteStore {
    NoteStore::connect(&db_url(dir), &StoreOptions::default())
        .await
        .expect("failed to reopen store")
}

pub async fn notes_app() -> (Router, NoteStore, TempDir) {
    let (store, dir) = temp_store().await;
    let app = notes_router(AppState::new(store.clone(), Arc::from(SECRET)));
    (app, store, dir)
}

pub async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("host", "notes.example.com");
    let req = match body {
        Some(v) => builder
            .header("content-type", "application/json")
            .body(Body::from(v.to_string())),
        None => builder.body(Body::empty()),
    }
    .expect("failed to build request");

    let resp = app.clone().oneshot(req).await.expect("request failed");
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("failed to read response body");
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}
