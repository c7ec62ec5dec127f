use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::AppError;

/// External collaborator: turns a session token into a validated
/// `(user_id, username)` tuple. Real auth is out of scope (`spec.md`
/// §1) — this crate only defines the interface the hub consumes.
#[async_trait]
pub trait SessionAuthority: Send + Sync {
    async fn authenticate(&self, session_id: &str) -> Result<(String, String), AppError>;
}

/// In-memory session table, sufficient to drive integration tests
/// end-to-end without a real identity provider.
#[derive(Default)]
pub struct StaticSessionAuthority {
    sessions: RwLock<HashMap<String, (String, String)>>,
}

impl StaticSessionAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, session_id: impl Into<String>, user_id: impl Into<String>, username: impl Into<String>) {
        self.sessions
            .write()
            .unwrap()
            .insert(session_id.into(), (user_id.into(), username.into()));
    }
}

#[async_trait]
impl SessionAuthority for StaticSessionAuthority {
    async fn authenticate(&self, session_id: &str) -> Result<(String, String), AppError> {
        self.sessions
            .read()
            .unwrap()
            .get(session_id)
            .cloned()
            .ok_or(AppError::AuthFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn authenticates_registered_session() {
        let authority = StaticSessionAuthority::new();
        authority.register("sess-1", "u1", "alice");
        let (user_id, username) = authority.authenticate("sess-1").await.unwrap();
        assert_eq!(user_id, "u1");
        assert_eq!(username, "alice");
    }

    #[tokio::test]
    async fn rejects_unknown_session() {
        let authority = StaticSessionAuthority::new();
        let err = authority.authenticate("nope").await.unwrap_err();
        assert!(matches!(err, AppError::AuthFailed));
    }
}
