use std::sync::Arc;

use super::principal::Principal;
use crate::database::{PermissionRepository, StoreError};

/// What a route demands of its caller, weakest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    Authenticated,
    Activated,
    Permission(&'static str),
}

/// Outcome of an authorization check. Denials are values, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Unauthenticated,
    InactiveAccount,
    Forbidden,
}

pub fn require_authenticated(principal: &Principal) -> Decision {
    if principal.is_anonymous() {
        return Decision::Unauthenticated;
    }
    Decision::Allow
}

pub fn require_activated(principal: &Principal) -> Decision {
    match require_authenticated(principal) {
        Decision::Allow => {}
        denied => return denied,
    }
    match principal.user() {
        Some(user) if user.activated => Decision::Allow,
        _ => Decision::InactiveAccount,
    }
}

pub struct PermissionAuthorizer {
    permissions: Arc<dyn PermissionRepository>,
}

impl PermissionAuthorizer {
    pub fn new(permissions: Arc<dyn PermissionRepository>) -> Self {
        Self { permissions }
    }

    /// Loads the permission set fresh on every call.
    pub async fn require_permission(&self, principal: &Principal, code: &str) -> Result<Decision, StoreError> {
        match require_activated(principal) {
            Decision::Allow => {}
            denied => return Ok(denied),
        }
        let granted = self.permissions.get_all_for_user(principal.id()).await?;
        if granted.include(code) {
            Ok(Decision::Allow)
        } else {
            Ok(Decision::Forbidden)
        }
    }

    pub async fn authorize(&self, principal: &Principal, requirement: Requirement) -> Result<Decision, StoreError> {
        match requirement {
            Requirement::Authenticated => Ok(require_authenticated(principal)),
            Requirement::Activated => Ok(require_activated(principal)),
            Requirement::Permission(code) => self.require_permission(principal, code).await,
        }
    }
}
