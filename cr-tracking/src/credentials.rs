//! Bearer token sources.
//!
//! The tracking client does not own authentication. It reads the current
//! token through [`CredentialProvider`] each time it opens a connection.

use std::sync::{Arc, PoisonError, RwLock};

/// Supplies the current bearer token, or `None` when the session is not
/// authenticated. Blank tokens are treated as absent by the caller.
pub trait CredentialProvider: Send + Sync {
    fn bearer_token(&self) -> Option<String>;
}

impl<F> CredentialProvider for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn bearer_token(&self) -> Option<String> {
        self()
    }
}

/// Shared, updatable token slot for a login session.
///
/// Clones share the same slot, so the session can `set` a refreshed token
/// or `clear` it on logout while the client keeps reading from it.
#[derive(Debug, Clone, Default)]
pub struct SessionToken {
    inner: Arc<RwLock<Option<String>>>,
}

impl SessionToken {
    /// Create a slot holding `token`.
    pub fn new(token: impl Into<String>) -> Self {
        let slot = Self::default();
        slot.set(token);
        slot
    }

    /// Replace the stored token.
    pub fn set(&self, token: impl Into<String>) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = Some(token.into());
    }

    /// Forget the stored token.
    pub fn clear(&self) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl CredentialProvider for SessionToken {
    fn bearer_token(&self) -> Option<String> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Read a token from `provider`, treating blank strings as absent.
pub(crate) fn current_token(provider: &dyn CredentialProvider) -> Option<String> {
    provider
        .bearer_token()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}
