//! Authentication gate — the capability check every handler runs before
//! touching the blob store.
//!
//! Decoupled from any particular HTTP framework: the caller extracts a
//! bearer token (or `None`) from whatever transport it's using and asks
//! whether the requested action is allowed.

use async_trait::async_trait;

/// The kind of access a request is attempting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Read,
    Write,
}

/// The gate's verdict for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Proceed.
    Allow,
    /// No credentials were presented where some are required.
    NeedAuth,
    /// Credentials were presented but rejected.
    Deny,
}

#[async_trait]
pub trait AuthGate: Send + Sync {
    async fn check(&self, bearer_token: Option<&str>, action: Action) -> Decision;
}

/// Allows every request regardless of credentials — the default for local
/// development and for deployments that front the server with their own
/// auth proxy.
#[derive(Debug, Default)]
pub struct AllowAll;

#[async_trait]
impl AuthGate for AllowAll {
    async fn check(&self, _bearer_token: Option<&str>, _action: Action) -> Decision {
        Decision::Allow
    }
}

/// Requires a single shared bearer token for write actions; reads are open.
/// This is the minimal gate a single-operator deployment needs without
/// standing up a full user directory.
pub struct BearerToken {
    expected: String,
}

impl BearerToken {
    pub fn new(expected: impl Into<String>) -> Self {
        Self { expected: expected.into() }
    }
}

#[async_trait]
impl AuthGate for BearerToken {
    async fn check(&self, bearer_token: Option<&str>, action: Action) -> Decision {
        if action == Action::Read {
            return Decision::Allow;
        }
        match bearer_token {
            None => Decision::NeedAuth,
            Some(token) if token == self.expected => Decision::Allow,
            Some(_) => Decision::Deny,
        }
    }
}
