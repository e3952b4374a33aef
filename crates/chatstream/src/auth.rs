//! Bearer token access for authenticated backend calls

use std::sync::Arc;

use parking_lot::RwLock;

/// Source of the current bearer token.
///
/// The session reads the token through this trait immediately before each
/// backend call, so a token refreshed mid-session is honored on the next
/// call. `None` means no user is logged in; the session reports that in the
/// transcript instead of calling the backend.
pub trait TokenProvider: Send + Sync {
    /// Current bearer token, if any.
    fn bearer_token(&self) -> Option<String>;
}

/// Shared in-memory token slot.
///
/// Login and logout live outside this crate; whoever owns that lifecycle
/// calls [`TokenStore::set`] and [`TokenStore::clear`].
#[derive(Debug, Clone, Default)]
pub struct TokenStore {
    token: Arc<RwLock<Option<String>>>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the token issued at login.
    pub fn set(&self, token: impl Into<String>) {
        *self.token.write() = Some(token.into());
    }

    /// Drop the stored token on logout or session expiry.
    pub fn clear(&self) {
        *self.token.write() = None;
    }
}

impl TokenProvider for TokenStore {
    fn bearer_token(&self) -> Option<String> {
        self.token.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_store_roundtrip() {
        let store = TokenStore::new();
        assert_eq!(store.bearer_token(), None);

        store.set("secret");
        assert_eq!(store.bearer_token().as_deref(), Some("secret"));

        store.clear();
        assert_eq!(store.bearer_token(), None);
    }

    #[test]
    fn token_store_clones_share_the_slot() {
        let store = TokenStore::new();
        let view = store.clone();

        store.set("secret");
        assert_eq!(view.bearer_token().as_deref(), Some("secret"));
    }
}
