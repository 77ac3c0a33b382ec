pub mod authenticator;
pub mod authorizer;
pub mod password;
pub mod principal;
pub mod token;

use thiserror::Error;

use crate::database::StoreError;

pub use authenticator::TokenAuthenticator;
pub use authorizer::{Decision, PermissionAuthorizer, Requirement};
pub use principal::{PermissionSet, Principal};
pub use token::{AuthToken, Scope};

/// Failures while resolving a bearer token.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("authorization header or token is malformed")]
    Malformed,

    #[error("token is unknown or expired")]
    InvalidToken,

    #[error("token store unavailable: {0}")]
    Unavailable(#[source] StoreError),
}
