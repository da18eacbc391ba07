//! Access to the current user's broker/API credentials.
//!
//! Token storage lives outside this workspace; the session only asks for the
//! current identity each time it (re)connects.

use std::sync::{Arc, RwLock};

use crate::types::Credentials;

/// Supplies the current identity. Returns `None` while unauthenticated, in
/// which case no connection is attempted.
pub trait CredentialSource: Send + Sync {
    fn credentials(&self) -> Option<Credentials>;
}

/// Fixed credentials, mostly useful for tools and tests.
#[derive(Debug, Clone)]
pub struct StaticCredentials(Option<Credentials>);

impl StaticCredentials {
    pub fn new(credentials: Credentials) -> Self {
        Self(Some(credentials))
    }

    pub fn anonymous() -> Self {
        Self(None)
    }
}

impl CredentialSource for StaticCredentials {
    fn credentials(&self) -> Option<Credentials> {
        self.0.clone()
    }
}

/// Credentials that the login flow can swap at runtime (re-authentication,
/// token refresh, logout).
#[derive(Debug, Clone, Default)]
pub struct SharedCredentials {
    inner: Arc<RwLock<Option<Credentials>>>,
}

impl SharedCredentials {
    pub fn new(credentials: Option<Credentials>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(credentials)),
        }
    }

    pub fn set(&self, credentials: Credentials) {
        match self.inner.write() {
            Ok(mut guard) => *guard = Some(credentials),
            Err(poisoned) => *poisoned.into_inner() = Some(credentials),
        }
    }

    pub fn clear(&self) {
        match self.inner.write() {
            Ok(mut guard) => *guard = None,
            Err(poisoned) => *poisoned.into_inner() = None,
        }
    }
}

impl CredentialSource for SharedCredentials {
    fn credentials(&self) -> Option<Credentials> {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}
