// Authorization context. Identity arrives as an opaque verified username;
// this only answers "is this user an admin". Developer approval lives in the
// store.

use std::collections::HashSet;

use crate::error::{RegistryError, Result};

#[derive(Debug, Clone, Default)]
pub struct AuthContext {
    admins: HashSet<String>,
}

impl AuthContext {
    pub fn new<I, S>(admins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            admins: admins
                .into_iter()
                .map(|s| s.into().trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    pub fn is_admin(&self, username: &str) -> bool {
        self.admins.contains(username)
    }

    pub fn require_admin(&self, username: &str) -> Result<()> {
        if self.is_admin(username) {
            Ok(())
        } else {
            Err(RegistryError::PermissionDenied(format!(
                "user '{username}' is not a registry admin"
            )))
        }
    }
}
