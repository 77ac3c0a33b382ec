mod common;

use anyhow::Result;
use greenlight::auth::Scope;
use reqwest::StatusCode;
use serde_json::{json, Value};

#[tokio::test]
async fn register_activate_login_logout() -> Result<()> {
    let server = common::TestServer::start().await?;

    let res = server
        .client
        .post(server.url("/v1/users"))
        .json(&json!({ "name": "Alice", "email": "Alice@Example.com", "password": common::PASSWORD }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let body: Value = res.json().await?;
    let user = &body["data"]["user"];
    assert_eq!(user["email"], "alice@example.com");
    assert_eq!(user["activated"], false);
    assert!(user.get("password_hash").is_none());
    let user_id = user["id"].as_i64().unwrap_or_default();

    // The mailed token is out of reach, so mint an equivalent one.
    let activation = server
        .issue_token(user_id, Scope::Activation, chrono::Duration::hours(1))
        .await?;
    let res = server
        .client
        .put(server.url("/v1/users/activated"))
        .json(&json!({ "token": &activation }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await?;
    assert_eq!(body["data"]["user"]["activated"], true);

    // Activation tokens are single use.
    let res = server
        .client
        .put(server.url("/v1/users/activated"))
        .json(&json!({ "token": &activation }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = res.json().await?;
    assert_eq!(body["field_errors"]["token"], "invalid or expired activation token");

    let res = server
        .client
        .post(server.url("/v1/tokens/authentication"))
        .json(&json!({ "email": "alice@example.com", "password": common::PASSWORD }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::CREATED);
    let body: Value = res.json().await?;
    let token = body["data"]["authentication_token"]["token"]
        .as_str()
        .unwrap_or_default()
        .to_string();
    assert_eq!(token.len(), greenlight::auth::token::PLAINTEXT_LEN);
    assert!(body["data"]["authentication_token"]["expiry"].is_string());

    // New accounts may read the catalog straight away.
    let res = server
        .client
        .get(server.url("/v1/movies"))
        .bearer_auth(&token)
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);

    let res = server
        .client
        .delete(server.url("/v1/tokens/authentication"))
        .bearer_auth(&token)
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);

    let res = server
        .client
        .get(server.url("/v1/movies"))
        .bearer_auth(&token)
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn duplicate_email_is_rejected() -> Result<()> {
    let server = common::TestServer::start().await?;
    server.seed_user("bob@example.com", false, &[]).await?;

    let res = server
        .client
        .post(server.url("/v1/users"))
        .json(&json!({ "name": "Bob", "email": "BOB@example.com", "password": common::PASSWORD }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = res.json().await?;
    assert_eq!(body["field_errors"]["email"], "a user with this email address already exists");
    Ok(())
}

#[tokio::test]
async fn registration_validates_input() -> Result<()> {
    let server = common::TestServer::start().await?;

    let res = server
        .client
        .post(server.url("/v1/users"))
        .json(&json!({ "name": "", "email": "not-an-email", "password": "short" }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = res.json().await?;
    for field in ["name", "email", "password"] {
        assert!(body["field_errors"][field].is_string(), "missing error for {}", field);
    }
    Ok(())
}

#[tokio::test]
async fn wrong_password_is_unauthorized() -> Result<()> {
    let server = common::TestServer::start().await?;
    server.seed_user("carol@example.com", true, &["movies:read"]).await?;

    let res = server
        .client
        .post(server.url("/v1/tokens/authentication"))
        .json(&json!({ "email": "carol@example.com", "password": "definitely-wrong" }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let body: Value = res.json().await?;
    assert_eq!(body["message"], "invalid authentication credentials");

    let res = server
        .client
        .post(server.url("/v1/tokens/authentication"))
        .json(&json!({ "email": "nobody@example.com", "password": common::PASSWORD }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn malformed_activation_token_fails_validation() -> Result<()> {
    let server = common::TestServer::start().await?;

    let res = server
        .client
        .put(server.url("/v1/users/activated"))
        .json(&json!({ "token": "too-short" }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = res.json().await?;
    assert!(body["field_errors"]["token"].is_string());
    Ok(())
}
