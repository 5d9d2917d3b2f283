use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use validator::Validate;

use fitclub_shared::errors::AppResult;
use fitclub_shared::types::{
    ApiResponse, AuthUser, Platform, PushTokenRecord, RegisterTokenResponse, RegisteredResponse,
    RemovedResponse,
};

use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterTokenRequest {
    #[validate(length(min = 1, max = 4096, message = "token must be 1-4096 characters"))]
    pub token: String,
    pub platform: Platform,
}

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub token: String,
}

/// POST /push-tokens
pub async fn register_token(
    State(state): State<Arc<AppState>>,
    auth_user: AuthUser,
    Json(req): Json<RegisterTokenRequest>,
) -> AppResult<Json<ApiResponse<RegisterTokenResponse>>> {
    req.validate().map_err(super::invalid_body)?;

    let (record, outcome) = state
        .push_tokens
        .register_token(auth_user.id, &req.token, req.platform)
        .await?;

    Ok(Json(ApiResponse::ok(RegisterTokenResponse {
        success: true,
        outcome,
        record,
    })))
}

/// GET /push-tokens
pub async fn list_tokens(
    State(state): State<Arc<AppState>>,
    auth_user: AuthUser,
) -> AppResult<Json<ApiResponse<Vec<PushTokenRecord>>>> {
    let tokens = state.push_tokens.list_tokens(auth_user.id).await?;
    Ok(Json(ApiResponse::ok(tokens)))
}

/// GET /push-tokens/check?token=
pub async fn check_token(
    State(state): State<Arc<AppState>>,
    auth_user: AuthUser,
    Query(query): Query<TokenQuery>,
) -> AppResult<Json<ApiResponse<RegisteredResponse>>> {
    let registered = state.push_tokens.is_token_registered(auth_user.id, &query.token).await?;
    Ok(Json(ApiResponse::ok(RegisteredResponse { registered })))
}

/// DELETE /push-tokens?token=
/// Device logout.
pub async fn remove_token(
    State(state): State<Arc<AppState>>,
    auth_user: AuthUser,
    Query(query): Query<TokenQuery>,
) -> AppResult<Json<ApiResponse<RemovedResponse>>> {
    let removed = state.push_tokens.remove_token(auth_user.id, &query.token).await?;
    Ok(Json(ApiResponse::ok(RemovedResponse { removed })))
}

/// DELETE /push-tokens/all
/// Revokes every device of the caller.
pub async fn remove_all_tokens(
    State(state): State<Arc<AppState>>,
    auth_user: AuthUser,
) -> AppResult<Json<ApiResponse<RemovedResponse>>> {
    let removed = state.push_tokens.remove_all_tokens(auth_user.id).await?;
    Ok(Json(ApiResponse::ok(RemovedResponse { removed })))
}
