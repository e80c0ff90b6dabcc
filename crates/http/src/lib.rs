//! `conan-http` — the URL pattern registry and request handlers that turn
//! an HTTP request into a `conan-core` blob store operation.
//!
//! [`dispatch`] is the single entry point: it walks the route table,
//! resolves the capability the request needs, asks the configured
//! [`conan_core::AuthGate`], and either invokes the matched handler or
//! falls back to the generic file accessor.

pub mod context;
pub mod handlers;
pub mod urls;

use axum::body::to_bytes;
use axum::extract::{Request, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use conan_core::auth::Action;
pub use context::AppContext;
use context::{parse_query, RouteRequest};

/// Bodies larger than this are rejected outright rather than buffered in
/// full — package tarballs can be large, but an unbounded buffer is not
/// something a repository server should offer an anonymous uploader.
const MAX_BODY_BYTES: usize = 512 * 1024 * 1024;

fn action_for(method: &Method) -> Action {
    match *method {
        Method::GET | Method::HEAD => Action::Read,
        _ => Action::Write,
    }
}

fn bearer_token(headers: &axum::http::HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|s| s.to_string())
}

/// The single axum entry point: mount this as the router's fallback (or its
/// only route, via a wildcard) and it handles every Conan endpoint.
pub async fn dispatch(State(ctx): State<AppContext>, req: Request) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = parse_query(req.uri().query());
    let uri = match req.uri().query() {
        Some(q) => format!("{path}?{q}"),
        None => path.clone(),
    };
    let headers = req.headers().clone();
    let token = bearer_token(&headers);

    let body = match to_bytes(req.into_body(), MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(_) => return (StatusCode::BAD_REQUEST, "request body too large or malformed").into_response(),
    };

    for candidate in urls::registry() {
        if candidate.method != method {
            continue;
        }
        let Some(captures) = candidate.regex.captures(&path) else { continue };
        let captures = candidate
            .regex
            .capture_names()
            .flatten()
            .filter_map(|name| captures.name(name).map(|m| (name.to_string(), m.as_str().to_string())))
            .collect();

        match ctx.auth.check(token.as_deref(), action_for(&method)).await {
            conan_core::auth::Decision::Allow => {}
            conan_core::auth::Decision::NeedAuth => return StatusCode::UNAUTHORIZED.into_response(),
            conan_core::auth::Decision::Deny => return StatusCode::FORBIDDEN.into_response(),
        }

        let route_req = RouteRequest { uri, captures, query, headers, body };
        return (candidate.handler)(ctx, route_req).await;
    }

    generic_file_fallback(ctx, method, path, token, body).await
}

/// Every `download_urls`/`upload_urls` response embeds the literal storage
/// key as the path portion of its URL (§4.7.3/§6: "the fixed `_/_/0/…`
/// segments are part of the contract"). A request that didn't match any
/// table entry is therefore treated as a direct blob-store key, with the
/// leading slash stripped.
async fn generic_file_fallback(
    ctx: AppContext,
    method: Method,
    path: String,
    token: Option<String>,
    body: bytes::Bytes,
) -> Response {
    let key = path.trim_start_matches('/');
    if key.is_empty() {
        return (StatusCode::NOT_FOUND, format!("URI {path} not found.")).into_response();
    }

    match ctx.auth.check(token.as_deref(), action_for(&method)).await {
        conan_core::auth::Decision::Allow => {}
        conan_core::auth::Decision::NeedAuth => return StatusCode::UNAUTHORIZED.into_response(),
        conan_core::auth::Decision::Deny => return StatusCode::FORBIDDEN.into_response(),
    }

    match method {
        Method::GET => handlers::generic_get(&ctx, key, &path).await,
        Method::PUT => handlers::generic_put(&ctx, key, body).await,
        _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
    }
}

/// Build an axum `Router` with [`dispatch`] mounted as the catch-all
/// fallback. Conan coordinates have a variable number of path segments, so
/// routing is done by this crate's own regex table rather than axum's
/// declarative path syntax.
pub fn router(ctx: AppContext) -> axum::Router {
    axum::Router::new().fallback(dispatch).with_state(ctx)
}
