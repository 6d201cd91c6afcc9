use std::sync::RwLock;

use crate::application::repos::CurrentUser;
use crate::domain::entities::SessionUser;

/// Session whose user is set explicitly.
#[derive(Debug, Default)]
pub struct StaticSession {
    user: RwLock<Option<SessionUser>>,
}

impl StaticSession {
    pub fn signed_in(user: SessionUser) -> Self {
        Self {
            user: RwLock::new(Some(user)),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn sign_in(&self, user: SessionUser) {
        *self.user.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(user);
    }

    pub fn sign_out(&self) {
        *self.user.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
    }
}

impl CurrentUser for StaticSession {
    fn current_user(&self) -> Option<SessionUser> {
        self.user
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}
