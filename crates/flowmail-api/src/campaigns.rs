use axum::{
    Json,
    body::Bytes,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;
use uuid::Uuid;

use flowmail_core::TickOutcome;
use flowmail_types::api::{
    CampaignProgress, CreateCampaignRequest, MessageResponse, SendEmailRequest, SendEmailResponse,
    UpdateCampaignRequest,
};
use flowmail_types::models::{Campaign, EmailResult};

use crate::error::{ApiError, blocking};
use crate::state::AppState;

pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<Campaign>>, ApiError> {
    let lifecycle = state.lifecycle.clone();
    Ok(Json(blocking(move || lifecycle.list()).await?))
}

pub async fn create(
    State(state): State<AppState>,
    payload: Result<Json<CreateCampaignRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let lifecycle = state.lifecycle.clone();
    let campaign = blocking(move || lifecycle.create(req)).await?;
    Ok((StatusCode::CREATED, Json(campaign)))
}

pub async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Campaign>, ApiError> {
    let lifecycle = state.lifecycle.clone();
    Ok(Json(blocking(move || lifecycle.get(id)).await?))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    payload: Result<Json<UpdateCampaignRequest>, JsonRejection>,
) -> Result<Json<Campaign>, ApiError> {
    let Json(req) = payload?;
    let lifecycle = state.lifecycle.clone();
    Ok(Json(blocking(move || lifecycle.update(id, req)).await?))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<MessageResponse>, ApiError> {
    let lifecycle = state.lifecycle.clone();
    blocking(move || lifecycle.delete(id)).await?;
    Ok(Json(MessageResponse::new("Campaign deleted successfully")))
}

// -- Lifecycle --

pub async fn start(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Campaign>, ApiError> {
    let lifecycle = state.lifecycle.clone();
    Ok(Json(blocking(move || lifecycle.start(id)).await?))
}

pub async fn pause(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Campaign>, ApiError> {
    let lifecycle = state.lifecycle.clone();
    Ok(Json(blocking(move || lifecycle.pause(id)).await?))
}

pub async fn stop(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Campaign>, ApiError> {
    let lifecycle = state.lifecycle.clone();
    Ok(Json(blocking(move || lifecycle.stop(id)).await?))
}

// -- Results --

pub async fn results(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<EmailResult>>, ApiError> {
    let lifecycle = state.lifecycle.clone();
    Ok(Json(blocking(move || lifecycle.results(id)).await?))
}

pub async fn clear_results(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<MessageResponse>, ApiError> {
    let lifecycle = state.lifecycle.clone();
    let cleared = blocking(move || lifecycle.clear_results(id)).await?;
    info!(campaign_id = %id, "Cleared {} result(s)", cleared);
    Ok(Json(MessageResponse::new(format!("Cleared {} result(s)", cleared))))
}

pub async fn progress(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CampaignProgress>, ApiError> {
    let lifecycle = state.lifecycle.clone();
    Ok(Json(blocking(move || lifecycle.progress(id)).await?))
}

/// One tick on behalf of a client-driven session. The body is optional;
/// when it names an email, it must be the campaign's next recipient.
pub async fn send_email(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Bytes,
) -> Result<Json<SendEmailResponse>, ApiError> {
    let req: SendEmailRequest = if body.iter().all(u8::is_ascii_whitespace) {
        SendEmailRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| ApiError::bad_request(e.to_string()))?
    };

    let outcome = state.lifecycle.send_next(id, req.email.as_deref()).await?;
    Ok(Json(send_response(outcome)))
}

fn send_response(outcome: TickOutcome) -> SendEmailResponse {
    match outcome {
        TickOutcome::Sent { campaign, result } => SendEmailResponse {
            status: result.status.as_str().to_string(),
            email: Some(result.email),
            response: Some(result.response),
            campaign: Some(campaign),
        },
        TickOutcome::Completed(campaign) => SendEmailResponse {
            status: "completed".to_string(),
            email: None,
            response: None,
            campaign: Some(campaign),
        },
        TickOutcome::Halted { campaign, reason } => SendEmailResponse {
            status: "stopped".to_string(),
            email: None,
            response: Some(reason),
            campaign: Some(campaign),
        },
        TickOutcome::Idle { .. } => SendEmailResponse {
            status: "idle".to_string(),
            email: None,
            response: None,
            campaign: None,
        },
    }
}
