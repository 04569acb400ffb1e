//! Sends that bypass campaign tracking, plus the health probe.

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};
use chrono::Utc;
use serde_json::{Value, json};

use flowmail_core::validation::email_address;
use flowmail_core::webhook::body_value;
use flowmail_types::api::{OneOffSendResponse, SubmitRequest, TestEmailRequest};

use crate::error::ApiError;
use crate::state::AppState;

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "driver": state.lifecycle.mode().as_str(),
        "storage": state.storage,
    }))
}

pub async fn test_email(
    State(state): State<AppState>,
    payload: Result<Json<TestEmailRequest>, JsonRejection>,
) -> Result<Json<OneOffSendResponse>, ApiError> {
    let Json(req) = payload?;
    let email = email_address(&req.email)?;

    let body = state
        .lifecycle
        .dispatcher()
        .send_one_off(&req.flow_account, &email, &req.subject, &req.html_content)
        .await?;

    Ok(Json(OneOffSendResponse {
        message: "Test email sent successfully".to_string(),
        timestamp: Utc::now(),
        response: body_value(body),
    }))
}

/// Legacy single-send form: the description is posted as the email body.
pub async fn submit(
    State(state): State<AppState>,
    payload: Result<Json<SubmitRequest>, JsonRejection>,
) -> Result<Json<OneOffSendResponse>, ApiError> {
    let Json(req) = payload?;
    let email = email_address(&req.email)?;

    let body = state
        .lifecycle
        .dispatcher()
        .send_one_off(&req.flow_account, &email, &req.subject, &req.description)
        .await?;

    Ok(Json(OneOffSendResponse {
        message: "Email sent successfully".to_string(),
        timestamp: Utc::now(),
        response: body_value(body),
    }))
}
