use std::collections::HashSet;

use crate::database::models::User;

/// The identity a request acts as.
#[derive(Debug, Clone, PartialEq)]
pub enum Principal {
    Anonymous,
    User(User),
}

impl Principal {
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Principal::Anonymous)
    }

    /// 0 for the anonymous principal.
    pub fn id(&self) -> i64 {
        match self {
            Principal::Anonymous => 0,
            Principal::User(user) => user.id,
        }
    }

    pub fn user(&self) -> Option<&User> {
        match self {
            Principal::Anonymous => None,
            Principal::User(user) => Some(user),
        }
    }
}

/// Permission codes held by one user, loaded per check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionSet(HashSet<String>);

impl PermissionSet {
    pub fn include(&self, code: &str) -> bool {
        self.0.contains(code)
    }

    pub fn codes(&self) -> Vec<&str> {
        let mut codes: Vec<&str> = self.0.iter().map(String::as_str).collect();
        codes.sort_unstable();
        codes
    }
}

impl<S: Into<String>> FromIterator<S> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}
