use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};
use std::marker::PhantomData;
use std::sync::Arc;

use super::pipeline::{run_stage, Rejection, RequestContext, Stage, Verdict};
use crate::auth::{Decision, PermissionAuthorizer, Principal, Requirement};
use crate::database::models::User;
use crate::error::ApiError;
use crate::state::AppState;

/// Per-route check run after routing, against the principal the pipeline resolved.
pub struct AuthorizeStage {
    authorizer: Arc<PermissionAuthorizer>,
    requirement: Requirement,
}

impl AuthorizeStage {
    pub fn new(authorizer: Arc<PermissionAuthorizer>, requirement: Requirement) -> Self {
        Self { authorizer, requirement }
    }
}

#[async_trait]
impl Stage for AuthorizeStage {
    fn name(&self) -> &'static str {
        "authorize"
    }

    async fn evaluate(&self, ctx: &mut RequestContext) -> Result<Verdict, ApiError> {
        let decision = self.authorizer.authorize(&ctx.principal, self.requirement).await?;
        Ok(match decision {
            Decision::Allow => Verdict::Pass,
            Decision::Unauthenticated => Verdict::Reject(Rejection::Unauthenticated),
            Decision::InactiveAccount => Verdict::Reject(Rejection::InactiveAccount),
            Decision::Forbidden => Verdict::Reject(Rejection::Forbidden),
        })
    }
}

/// A requirement known at compile time, so handlers state it in their signature.
pub trait Capability: Send + Sync + 'static {
    const REQUIREMENT: Requirement;
}

pub struct Authenticated;
pub struct Activated;
pub struct MoviesRead;
pub struct MoviesWrite;

impl Capability for Authenticated {
    const REQUIREMENT: Requirement = Requirement::Authenticated;
}

impl Capability for Activated {
    const REQUIREMENT: Requirement = Requirement::Activated;
}

impl Capability for MoviesRead {
    const REQUIREMENT: Requirement = Requirement::Permission("movies:read");
}

impl Capability for MoviesWrite {
    const REQUIREMENT: Requirement = Requirement::Permission("movies:write");
}

/// Extractor that only exists for a user satisfying `C`.
pub struct Authorized<C: Capability> {
    pub user: User,
    _capability: PhantomData<C>,
}

#[async_trait]
impl<C: Capability> FromRequestParts<AppState> for Authorized<C> {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let mut ctx = parts
            .extensions
            .get::<RequestContext>()
            .cloned()
            .ok_or_else(|| {
                tracing::error!("request context missing; is the request pipeline layered?");
                ApiError::server_fault()
            })?;

        let stage = AuthorizeStage::new(Arc::clone(&state.authorizer), C::REQUIREMENT);
        if let Verdict::Reject(rejection) = run_stage(&stage, &mut ctx).await? {
            return Err(rejection.into());
        }

        match ctx.principal {
            Principal::User(user) => Ok(Self {
                user,
                _capability: PhantomData,
            }),
            Principal::Anonymous => Err(Rejection::Unauthenticated.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{MemoryStore, PermissionRepository};

    fn ctx_for(activated: bool) -> RequestContext {
        let mut user = User::new("Bob".into(), "bob@example.com".into(), "h".into());
        user.id = 9;
        user.activated = activated;
        let mut ctx = RequestContext::new("c", None);
        ctx.principal = Principal::User(user);
        ctx
    }

    #[tokio::test]
    async fn maps_decisions_to_verdicts() {
        let store = Arc::new(MemoryStore::new());
        store.add_for_user(9, &["movies:read".to_string()]).await.unwrap();
        let authorizer = Arc::new(PermissionAuthorizer::new(store));

        let read = AuthorizeStage::new(authorizer.clone(), MoviesRead::REQUIREMENT);
        let write = AuthorizeStage::new(authorizer.clone(), MoviesWrite::REQUIREMENT);

        assert_eq!(read.evaluate(&mut ctx_for(true)).await.unwrap(), Verdict::Pass);
        assert_eq!(
            write.evaluate(&mut ctx_for(true)).await.unwrap(),
            Verdict::Reject(Rejection::Forbidden)
        );
        assert_eq!(
            read.evaluate(&mut ctx_for(false)).await.unwrap(),
            Verdict::Reject(Rejection::InactiveAccount)
        );
        assert_eq!(
            read.evaluate(&mut RequestContext::new("c", None)).await.unwrap(),
            Verdict::Reject(Rejection::Unauthenticated)
        );
    }
}
