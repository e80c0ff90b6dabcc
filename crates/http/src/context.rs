//! Axum application state and the request shape handed to each handler.

use axum::http::HeaderMap;
use bytes::Bytes;
use conan_core::auth::AuthGate;
use conan_core::BlobStore;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Axum state shared by every handler: the blob store, the auth gate, and
/// the lock TTL used by index rebuilds triggered from upload handlers.
#[derive(Clone)]
pub struct AppContext {
    pub store: Arc<dyn BlobStore>,
    pub auth: Arc<dyn AuthGate>,
    pub lock_ttl: Duration,
}

/// A request that matched a [`crate::urls::Route`], carrying its named
/// regex captures, query parameters, headers, and raw body.
pub struct RouteRequest {
    pub uri: String,
    pub captures: HashMap<String, String>,
    pub query: HashMap<String, String>,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl RouteRequest {
    pub fn capture(&self, name: &str) -> Option<&str> {
        self.captures.get(name).map(|s| s.as_str())
    }

    /// `Host` header value, or empty string if absent — some Conan clients
    /// omit it, and downstream URL builders tolerate the empty string.
    pub fn host(&self) -> &str {
        self.headers.get("host").and_then(|v| v.to_str().ok()).unwrap_or("")
    }
}

/// Parse a `?a=b&c=d` query string into a map, the same way the teacher's
/// handlers do via axum's `Query<T>` extractor (backed by
/// `serde_urlencoded`) — generalized here to an untyped map since the
/// dispatcher's route table, not a declared axum route, owns the query
/// shape per endpoint.
pub fn parse_query(query: Option<&str>) -> HashMap<String, String> {
    let Some(query) = query else { return HashMap::new() };
    serde_urlencoded::from_str(query).unwrap_or_default()
}
