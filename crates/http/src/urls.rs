//! URL pattern registry — a fixed, ordered table of `(method, regex,
//! handler)` entries. The dispatcher in [`crate::dispatch`] walks the table
//! in order and invokes the first regex whose named captures match the
//! request path; more specific routes are listed ahead of the generic
//! patterns they would otherwise shadow.

use crate::context::{AppContext, RouteRequest};
use crate::handlers;
use axum::http::Method;
use axum::response::Response;
use regex::Regex;
use std::future::Future;
use std::pin::Pin;
use std::sync::OnceLock;

pub type HandlerFuture = Pin<Box<dyn Future<Output = Response> + Send>>;
pub type HandlerFn = fn(AppContext, RouteRequest) -> HandlerFuture;

pub struct Route {
    pub method: Method,
    pub regex: Regex,
    pub handler: HandlerFn,
}

fn route(method: Method, pattern: &str, handler: HandlerFn) -> Route {
    Route { method, regex: Regex::new(pattern).expect("static route pattern is valid regex"), handler }
}

macro_rules! wrap {
    ($f:path) => {
        |ctx, req| Box::pin($f(ctx, req))
    };
}

/// The route table, built once and reused for the lifetime of the process.
///
/// Order matters: routes with a literal suffix after the greedy `path`
/// capture (e.g. `.../packages/<hash>/download_urls`) must precede the
/// shorter pattern they'd otherwise be swallowed by (`.../download_urls`),
/// since the regex engine happily backtracks a greedy `.+` to make a later
/// pattern match too.
pub fn registry() -> &'static [Route] {
    static REGISTRY: OnceLock<Vec<Route>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        vec![
            route(Method::GET, r"^/v1/ping$", wrap!(handlers::ping)),
            route(Method::GET, r"^/v1/users/authenticate$", wrap!(handlers::users_ack)),
            route(Method::GET, r"^/v1/users/check_credentials$", wrap!(handlers::users_ack)),
            route(Method::GET, r"^/v1/conans/search$", wrap!(handlers::recipe_search)),
            route(
                Method::GET,
                r"^/v1/conans/(?P<path>.+)/packages/(?P<hash>[0-9a-f]+)/download_urls$",
                wrap!(handlers::binary_download_urls),
            ),
            route(
                Method::GET,
                r"^/v1/conans/(?P<path>.+)/packages/(?P<hash>[0-9a-f]+)$",
                wrap!(handlers::binary_manifest_digest),
            ),
            route(Method::GET, r"^/v1/conans/(?P<path>.+)/search$", wrap!(handlers::binary_search)),
            route(Method::GET, r"^/v1/conans/(?P<path>.+)/download_urls$", wrap!(handlers::recipe_download_urls)),
            route(
                Method::PUT,
                r"^/v1/conans/(?P<path>.+)/packages/(?P<hash>[0-9a-f]+)/upload_urls$",
                wrap!(handlers::binary_upload_url_allocation),
            ),
            route(Method::PUT, r"^/v1/conans/(?P<path>.+)/upload_urls$", wrap!(handlers::recipe_upload_url_allocation)),
            route(
                Method::GET,
                r"^/v2/conans/(?P<path>.+)/packages/(?P<hash>[0-9a-f]+)/latest$",
                wrap!(handlers::v2_binary_latest),
            ),
            route(Method::GET, r"^/v2/conans/(?P<path>.+)/latest$", wrap!(handlers::v2_recipe_latest)),
            route(
                Method::GET,
                r"^/v2/conans/(?P<path>.+)/packages/(?P<hash>[0-9a-f]+)/revisions/(?P<bin_rev>\d+)/files/(?P<name>.+)$",
                wrap!(handlers::v2_binary_file_get),
            ),
            route(
                Method::GET,
                r"^/v2/conans/(?P<path>.+)/packages/(?P<hash>[0-9a-f]+)/revisions/(?P<bin_rev>\d+)/files$",
                wrap!(handlers::v2_binary_files_list),
            ),
            route(
                Method::GET,
                r"^/v2/conans/(?P<path>.+)/revisions/(?P<rev>\d+)/files/(?P<name>.+)$",
                wrap!(handlers::v2_recipe_file_get),
            ),
            route(
                Method::GET,
                r"^/v2/conans/(?P<path>.+)/revisions/(?P<rev>\d+)/files$",
                wrap!(handlers::v2_recipe_files_list),
            ),
        ]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_download_urls_wins_over_recipe_download_urls() {
        let path = "/v1/conans/zlib/1.2.11/_/_/packages/abc123/download_urls";
        let hit = registry().iter().find(|r| r.method == Method::GET && r.regex.is_match(path)).unwrap();
        let caps = hit.regex.captures(path).unwrap();
        assert_eq!(&caps["path"], "zlib/1.2.11/_/_");
        assert_eq!(&caps["hash"], "abc123");
    }

    #[test]
    fn recipe_download_urls_matches_plain_coordinate() {
        let path = "/v1/conans/zlib/1.2.11/_/_/download_urls";
        let hit = registry().iter().find(|r| r.method == Method::GET && r.regex.is_match(path)).unwrap();
        let caps = hit.regex.captures(path).unwrap();
        assert_eq!(&caps["path"], "zlib/1.2.11/_/_");
    }

    #[test]
    fn bare_search_does_not_match_binary_search_pattern() {
        let path = "/v1/conans/search";
        assert!(registry().iter().all(|r| !(r.method == Method::GET
            && r.regex.as_str().contains("/search$")
            && r.regex.as_str() != r"^/v1/conans/search$"
            && r.regex.is_match(path))));
    }

    #[test]
    fn ping_route_present() {
        assert!(registry().iter().any(|r| r.method == Method::GET && r.regex.is_match("/v1/ping")));
    }
}
