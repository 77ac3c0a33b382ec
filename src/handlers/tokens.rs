use axum::extract::State;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth::{password, AuthToken, Scope};
use crate::database::models::user::{validate_email, validate_password_plaintext};
use crate::database::StoreError;
use crate::error::ApiError;
use crate::middleware::authorize::{Authenticated, Authorized};
use crate::middleware::response::{ApiResponse, ApiResult, ValidJson};
use crate::state::AppState;
use crate::validator::Validator;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CredentialsInput {
    pub email: String,
    pub password: String,
}

pub async fn create_authentication_token(
    State(state): State<AppState>,
    ValidJson(input): ValidJson<CredentialsInput>,
) -> ApiResult<Value> {
    let mut v = Validator::new();
    validate_email(&mut v, &input.email);
    validate_password_plaintext(&mut v, &input.password);
    if !v.valid() {
        return Err(v.into());
    }

    let user = match state.stores.users.get_by_email(&input.email).await {
        Ok(user) => user,
        Err(StoreError::NotFound) => return Err(ApiError::invalid_credentials()),
        Err(err) => return Err(err.into()),
    };

    if !password::matches(input.password, user.password_hash.clone()).await? {
        return Err(ApiError::invalid_credentials());
    }

    let token = AuthToken::generate(user.id, state.config.tokens.authentication_ttl(), Scope::Authentication);
    state.stores.tokens.insert(&token).await?;

    Ok(ApiResponse::with_status(
        json!({ "authentication_token": token }),
        axum::http::StatusCode::CREATED,
    ))
}

/// Logout: revokes every authentication token of the caller.
pub async fn delete_authentication_tokens(
    auth: Authorized<Authenticated>,
    State(state): State<AppState>,
) -> ApiResult<Value> {
    state
        .stores
        .tokens
        .delete_all_for_user(Scope::Authentication, auth.user.id)
        .await?;
    Ok(ApiResponse::success(json!({ "message": "authentication tokens revoked" })))
}
