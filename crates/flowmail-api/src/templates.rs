use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use flowmail_core::{Error, validation};
use flowmail_types::api::{CreateTemplateRequest, MessageResponse};
use flowmail_types::models::{EmailTemplate, TemplatePatch};

use crate::error::{ApiError, blocking};
use crate::state::AppState;

pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<EmailTemplate>>, ApiError> {
    let templates = state.templates.clone();
    Ok(Json(blocking(move || templates.list_templates()).await?))
}

pub async fn create(
    State(state): State<AppState>,
    payload: Result<Json<CreateTemplateRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let template = validation::new_template(req)?;
    let templates = state.templates.clone();
    let created = blocking(move || templates.create_template(template)).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<EmailTemplate>, ApiError> {
    let templates = state.templates.clone();
    let template = blocking(move || {
        templates
            .get_template(id)?
            .ok_or_else(|| Error::template_not_found(id))
    })
    .await?;
    Ok(Json(template))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    payload: Result<Json<TemplatePatch>, JsonRejection>,
) -> Result<Json<EmailTemplate>, ApiError> {
    let Json(patch) = payload?;
    let patch = validation::template_patch(patch)?;
    let templates = state.templates.clone();
    let template = blocking(move || {
        templates
            .update_template(id, &patch)?
            .ok_or_else(|| Error::template_not_found(id))
    })
    .await?;
    Ok(Json(template))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<MessageResponse>, ApiError> {
    let templates = state.templates.clone();
    let removed = blocking(move || templates.delete_template(id)).await?;
    if !removed {
        return Err(Error::template_not_found(id).into());
    }
    Ok(Json(MessageResponse::new("Template deleted successfully")))
}
