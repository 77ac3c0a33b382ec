mod common;

use anyhow::Result;
use greenlight::auth::Scope;
use reqwest::StatusCode;
use serde_json::Value;

#[tokio::test]
async fn anonymous_read_requires_authentication() -> Result<()> {
    let server = common::TestServer::start().await?;

    let res = server.client.get(server.url("/v1/movies")).send().await?;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(res.headers()["www-authenticate"], "Bearer");
    assert!(res
        .headers()
        .get_all("vary")
        .iter()
        .any(|v| v.to_str().unwrap_or_default().contains("Authorization")));

    let body: Value = res.json().await?;
    assert_eq!(body["message"], "you must be authenticated to access this resource");
    Ok(())
}

#[tokio::test]
async fn malformed_authorization_header_is_rejected() -> Result<()> {
    let server = common::TestServer::start().await?;

    for header in ["Bearer", "Token ABCDEFGHIJKLMNOPQRSTUVWXYZ", "Bearer short", "Bearer a b"] {
        let res = server
            .client
            .get(server.url("/v1/healthcheck"))
            .header("Authorization", header)
            .send()
            .await?;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED, "header {:?}", header);
        assert_eq!(res.headers()["www-authenticate"], "Bearer");

        let body: Value = res.json().await?;
        assert_eq!(body["message"], "invalid or missing authentication token");
    }
    Ok(())
}

#[tokio::test]
async fn expired_token_is_rejected() -> Result<()> {
    let server = common::TestServer::start().await?;
    let user = server.seed_user("expired@example.com", true, &["movies:read"]).await?;
    let token = server
        .issue_token(user.id, Scope::Authentication, chrono::Duration::seconds(-1))
        .await?;

    let res = server
        .client
        .get(server.url("/v1/movies"))
        .bearer_auth(token)
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn activation_token_does_not_authenticate() -> Result<()> {
    let server = common::TestServer::start().await?;
    let user = server.seed_user("scoped@example.com", true, &["movies:read"]).await?;
    let token = server
        .issue_token(user.id, Scope::Activation, chrono::Duration::hours(1))
        .await?;

    let res = server
        .client
        .get(server.url("/v1/movies"))
        .bearer_auth(token)
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn inactive_account_is_forbidden() -> Result<()> {
    let server = common::TestServer::start().await?;
    let user = server.seed_user("inactive@example.com", false, &["movies:read"]).await?;
    let bearer = server.bearer_for(user.id).await?;

    let res = server
        .client
        .get(server.url("/v1/movies"))
        .header("Authorization", bearer)
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let body: Value = res.json().await?;
    assert_eq!(body["message"], "your user account must be activated to access this resource");
    Ok(())
}

#[tokio::test]
async fn missing_permission_is_forbidden() -> Result<()> {
    let server = common::TestServer::start().await?;
    let user = server.seed_user("reader@example.com", true, &["movies:read"]).await?;
    let bearer = server.bearer_for(user.id).await?;

    let res = server
        .client
        .post(server.url("/v1/movies"))
        .header("Authorization", bearer)
        .json(&serde_json::json!({
            "title": "Moana",
            "year": 2016,
            "runtime": "107 mins",
            "genres": ["animation", "adventure"]
        }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let body: Value = res.json().await?;
    assert_eq!(
        body["message"],
        "your user account doesn't have the necessary permissions to access this resource"
    );
    Ok(())
}
