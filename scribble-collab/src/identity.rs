//! Authenticated user behind a session.
//!
//! Issuing identities is someone else's job; the session only asks who is
//! signed in and, on logout, asks to sign them out.

use parking_lot::Mutex;
use scribble_core::UserId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub email: Option<String>,
}

impl Identity {
    pub fn new(user_id: UserId, email: Option<String>) -> Self {
        Self { user_id, email }
    }

    /// Label shown to other users: the email, or the user id without one.
    pub fn display_identity(&self) -> String {
        self.email
            .clone()
            .unwrap_or_else(|| self.user_id.to_string())
    }
}

pub trait IdentityProvider: Send + Sync {
    fn current(&self) -> Option<Identity>;
    fn sign_out(&self);
}

/// Provider holding a fixed identity until signed out.
#[derive(Debug, Default)]
pub struct StaticIdentity {
    identity: Mutex<Option<Identity>>,
}

impl StaticIdentity {
    pub fn signed_in(identity: Identity) -> Self {
        Self {
            identity: Mutex::new(Some(identity)),
        }
    }

    pub fn signed_out() -> Self {
        Self::default()
    }
}

impl IdentityProvider for StaticIdentity {
    fn current(&self) -> Option<Identity> {
        self.identity.lock().clone()
    }

    fn sign_out(&self) {
        if let Some(identity) = self.identity.lock().take() {
            log::info!("Signed out {}", identity.user_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_identity_falls_back_to_uid() {
        let uid = UserId::new("u1").unwrap();
        assert_eq!(Identity::new(uid.clone(), None).display_identity(), "u1");
        assert_eq!(
            Identity::new(uid, Some("a@example.com".into())).display_identity(),
            "a@example.com"
        );
    }

    #[test]
    fn test_sign_out() {
        let provider = StaticIdentity::signed_in(Identity::new(UserId::new("u1").unwrap(), None));
        assert!(provider.current().is_some());
        provider.sign_out();
        assert!(provider.current().is_none());
        assert!(StaticIdentity::signed_out().current().is_none());
    }
}
