use axum::{
    Json,
    extract::{Path, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use tracing::debug;

use crate::db::{Note, NoteFields};
use crate::{StackError, router::AppState};

/// GET /notes -> every note, oldest first.
pub async fn list_notes(State(state): State<AppState>) -> Result<Json<Vec<Note>>, StackError> {
    let notes = state.store.list().await?;
    Ok(Json(notes))
}

/// POST /notes -> 201 with the stored note and its location.
pub async fn create_note(
    State(state): State<AppState>,
    Json(fields): Json<NoteFields>,
) -> Result<impl IntoResponse, StackError> {
    let note = state.store.create(fields).await?;
    debug!(id = note.id, "note created");
    let location = format!("/notes/{}", note.id);
    Ok((StatusCode::CREATED, [(header::LOCATION, location)], Json(note)))
}

pub async fn get_note(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Note>, StackError> {
    Ok(Json(state.store.get(id).await?))
}

/// PUT /notes/{id} -> replaces title and content.
pub async fn update_note(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(fields): Json<NoteFields>,
) -> Result<Json<Note>, StackError> {
    let note = state.store.update(id, fields).await?;
    debug!(id, "note updated");
    Ok(Json(note))
}

/// DELETE /notes/{id} -> 204; a missing note (including one already
/// deleted) is 404.
pub async fn delete_note(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, StackError> {
    state.store.delete(id).await?;
    debug!(id, "note deleted");
    Ok(StatusCode::NO_CONTENT)
}
