use std::collections::BTreeMap;

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;

use flowmail_types::api::{
    ConnectionTestResponse, CreateAccountRequest, TestConnectionRequest, UpdateAccountRequest,
};

use crate::error::{ApiError, blocking};
use crate::state::AppState;

type AccountMap = BTreeMap<String, String>;

pub async fn list(State(state): State<AppState>) -> Result<Json<AccountMap>, ApiError> {
    let accounts = state.accounts().clone();
    Ok(Json(blocking(move || accounts.list_accounts()).await?))
}

pub async fn create(
    State(state): State<AppState>,
    payload: Result<Json<CreateAccountRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let (Some(name), Some(url)) = (non_blank(req.name), non_blank(req.url)) else {
        return Err(ApiError::bad_request("Name and URL are required"));
    };

    let accounts = state.accounts().clone();
    let map = blocking(move || {
        accounts.create_account(&name, &url)?;
        info!(account = %name, "Flow account created");
        accounts.list_accounts()
    })
    .await?;
    Ok((StatusCode::CREATED, Json(map)))
}

/// Re-point an account and optionally rename it. Campaigns keep the name
/// they were created with.
pub async fn update(
    State(state): State<AppState>,
    Path(name): Path<String>,
    payload: Result<Json<UpdateAccountRequest>, JsonRejection>,
) -> Result<Json<AccountMap>, ApiError> {
    let Json(req) = payload?;
    let Some(url) = non_blank(req.url) else {
        return Err(ApiError::bad_request("URL is required"));
    };
    let new_name = non_blank(req.new_name).unwrap_or_else(|| name.clone());

    let accounts = state.accounts().clone();
    let map = blocking(move || {
        accounts.update_account(&name, &new_name, &url)?;
        info!(account = %name, new_name = %new_name, "Flow account updated");
        accounts.list_accounts()
    })
    .await?;
    Ok(Json(map))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<AccountMap>, ApiError> {
    let accounts = state.accounts().clone();
    let map = blocking(move || {
        accounts.delete_account(&name)?;
        info!(account = %name, "Flow account deleted");
        accounts.list_accounts()
    })
    .await?;
    Ok(Json(map))
}

pub async fn test_connection(
    State(state): State<AppState>,
    payload: Result<Json<TestConnectionRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ConnectionTestResponse>), ApiError> {
    let Json(req) = payload?;
    let result = state.lifecycle.dispatcher().test_connection(&req.name).await?;
    let status = if result.status == "success" {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    Ok((status, Json(result)))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
