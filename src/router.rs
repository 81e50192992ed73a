use axum::{
    Router, middleware,
    routing::get,
};
use std::sync::Arc;

use crate::db::NoteStore;
use crate::handlers::health::health;
use crate::handlers::notes::{create_note, delete_note, get_note, list_notes, update_note};
use crate::middleware::trace::trace_app_requests;

#[derive(Clone)]
pub struct AppState {
    pub store: NoteStore,
    pub secret_key: Arc<str>,
}

impl AppState {
    pub fn new(store: NoteStore, secret_key: Arc<str>) -> Self {
        Self { store, secret_key }
    }
}

pub fn notes_router(state: AppState) -> Router {
    Router::new()
        .route("/notes", get(list_notes).post(create_note))
        .route(
            "/notes/{id}",
            get(get_note).put(update_note).delete(delete_note),
        )
        .route("/health", get(health))
        .layer(middleware::from_fn_with_state(
            state.secret_key.clone(),
            trace_app_requests,
        ))
        .with_state(state)
}
