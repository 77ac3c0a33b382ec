use axum::extract::State;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::auth::token::{hash_plaintext, is_well_formed, PLAINTEXT_LEN};
use crate::auth::{password, AuthToken, Scope};
use crate::database::models::user::{validate_email, validate_name, validate_password_plaintext};
use crate::database::models::User;
use crate::database::StoreError;
use crate::error::ApiError;
use crate::mailer::{self, Message};
use crate::middleware::response::{ApiResponse, ApiResult, ValidJson};
use crate::state::AppState;
use crate::validator::Validator;

/// Granted to every newly registered account.
pub const DEFAULT_PERMISSIONS: &[&str] = &["movies:read"];

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RegisterUserInput {
    pub name: String,
    pub email: String,
    pub password: String,
}

pub async fn register_user(
    State(state): State<AppState>,
    ValidJson(input): ValidJson<RegisterUserInput>,
) -> ApiResult<Value> {
    let mut v = Validator::new();
    validate_name(&mut v, &input.name);
    validate_email(&mut v, &input.email);
    validate_password_plaintext(&mut v, &input.password);
    if !v.valid() {
        return Err(v.into());
    }

    let password_hash = password::hash(input.password, state.config.security.bcrypt_cost).await?;
    let mut user = User::new(input.name, input.email, password_hash);
    state.stores.users.insert(&mut user).await?;

    let defaults: Vec<String> = DEFAULT_PERMISSIONS.iter().map(|c| c.to_string()).collect();
    state.stores.permissions.add_for_user(user.id, &defaults).await?;

    let token = AuthToken::generate(user.id, state.config.tokens.activation_ttl(), Scope::Activation);
    state.stores.tokens.insert(&token).await?;

    let mailer = Arc::clone(&state.mailer);
    let recipient = user.email.clone();
    let message = Message::UserWelcome {
        user_id: user.id,
        activation_token: token.plaintext,
    };
    state.spawn_background("welcome_mail", async move {
        if let Err(err) = mailer::deliver(mailer.as_ref(), &recipient, &message).await {
            tracing::error!(error = %err, "could not deliver welcome mail");
        }
    });

    tracing::info!(user_id = user.id, "user registered");
    Ok(ApiResponse::accepted(json!({ "user": user })))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ActivateUserInput {
    pub token: String,
}

fn invalid_activation_token() -> ApiError {
    let mut field_errors = HashMap::new();
    field_errors.insert("token".to_string(), "invalid or expired activation token".to_string());
    ApiError::unprocessable_entity("validation failed", field_errors)
}

pub async fn activate_user(
    State(state): State<AppState>,
    ValidJson(input): ValidJson<ActivateUserInput>,
) -> ApiResult<Value> {
    let mut v = Validator::new();
    v.check(!input.token.is_empty(), "token", "must be provided");
    v.check(
        input.token.len() == PLAINTEXT_LEN,
        "token",
        &format!("must be {PLAINTEXT_LEN} bytes long"),
    );
    v.check(is_well_formed(&input.token), "token", "must be a valid token");
    if !v.valid() {
        return Err(v.into());
    }

    let hash = hash_plaintext(&input.token);
    let mut user = match state.stores.users.get_for_token(Scope::Activation, &hash, Utc::now()).await {
        Ok(user) => user,
        Err(StoreError::NotFound) => return Err(invalid_activation_token()),
        Err(err) => return Err(err.into()),
    };

    user.activated = true;
    state.stores.users.update(&mut user).await?;
    state.stores.tokens.delete_all_for_user(Scope::Activation, user.id).await?;

    tracing::info!(user_id = user.id, "user activated");
    Ok(ApiResponse::success(json!({ "user": user })))
}
