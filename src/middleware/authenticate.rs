use async_trait::async_trait;
use std::sync::Arc;

use super::pipeline::{Rejection, RequestContext, Stage, Verdict};
use crate::auth::{AuthError, TokenAuthenticator};
use crate::error::ApiError;

/// Resolves the bearer token into the request's principal.
pub struct AuthenticateStage {
    authenticator: Arc<TokenAuthenticator>,
}

impl AuthenticateStage {
    pub fn new(authenticator: Arc<TokenAuthenticator>) -> Self {
        Self { authenticator }
    }
}

#[async_trait]
impl Stage for AuthenticateStage {
    fn name(&self) -> &'static str {
        "authenticate"
    }

    async fn evaluate(&self, ctx: &mut RequestContext) -> Result<Verdict, ApiError> {
        // Set before resolving so rejections vary on the header too.
        ctx.vary_authorization = true;

        match self.authenticator.resolve(ctx.authorization.as_deref()).await {
            Ok(principal) => {
                ctx.principal = principal;
                Ok(Verdict::Pass)
            }
            Err(AuthError::Malformed) | Err(AuthError::InvalidToken) => {
                Ok(Verdict::Reject(Rejection::InvalidToken))
            }
            Err(err @ AuthError::Unavailable(_)) => Err(err.into()),
        }
    }
}
