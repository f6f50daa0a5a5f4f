//! Project, transcript and frame routes.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use mockup_shared::protocol::{
    CreateProjectRequest, RenameProjectRequest, ReplaceFramesRequest, ReplaceFramesResponse,
};
use mockup_store::{Frame, Project, ProjectSnapshot};
use tracing::info;
use uuid::Uuid;

use crate::api::AppState;
use crate::auth::AuthUser;
use crate::error::ServerError;

/// Caller's projects, newest first. A user without projects gets the
/// default one.
pub async fn list(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<Project>>, ServerError> {
    let projects = state.db.lock().await.ensure_default_project(user.id())?;
    Ok(Json(projects))
}

pub async fn create(
    State(state): State<AppState>,
    user: AuthUser,
    body: Option<Json<CreateProjectRequest>>,
) -> Result<(StatusCode, Json<Project>), ServerError> {
    let requested = body
        .and_then(|Json(req)| req.name)
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty());

    let db = state.db.lock().await;
    let name = match requested {
        Some(name) => name,
        None => format!("App {}", db.count_projects_for_user(user.id())? + 1),
    };
    let project = db.create_project(user.id(), &name)?;

    info!(user = %user.id(), project = %project.id, name = %project.name, "project created");
    Ok((StatusCode::CREATED, Json(project)))
}

pub async fn snapshot(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ProjectSnapshot>, ServerError> {
    let snapshot = state
        .db
        .lock()
        .await
        .project_snapshot(id, user.id())
        .map_err(ServerError::missing("Project"))?;
    Ok(Json(snapshot))
}

pub async fn rename(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(req): Json<RenameProjectRequest>,
) -> Result<Json<Project>, ServerError> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(ServerError::BadRequest("name must not be empty".into()));
    }
    let project = state
        .db
        .lock()
        .await
        .rename_project(id, user.id(), name)
        .map_err(ServerError::missing("Project"))?;
    Ok(Json(project))
}

pub async fn delete(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ServerError> {
    state
        .db
        .lock()
        .await
        .delete_project(id, user.id())
        .map_err(ServerError::missing("Project"))?;

    info!(user = %user.id(), project = %id, "project deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Make the stored frames equal to the client's list (undo/redo sync).
pub async fn replace_frames(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(req): Json<ReplaceFramesRequest>,
) -> Result<Json<ReplaceFramesResponse>, ServerError> {
    let frames: Vec<Frame> = req
        .frames
        .into_iter()
        .map(|draft| Frame::from_draft(id, draft))
        .collect();

    let mut db = state.db.lock().await;
    db.get_owned_project(id, user.id())
        .map_err(ServerError::missing("Project"))?;
    let outcome = db.replace_project_frames(id, &frames)?;

    Ok(Json(ReplaceFramesResponse {
        kept: outcome.kept,
        removed: outcome.removed,
    }))
}
