//! Request handlers — one function per table entry in [`crate::urls`], plus
//! the generic GET/PUT file accessor the dispatcher falls back on when
//! nothing in the table matches.

use crate::context::{AppContext, RouteRequest};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use conan_core::{
    path, BlobStore, Coordinate, CoreError, ErrorKind, IniDocument, PackageHash, RevisionsApi, PKG_BIN_LIST,
    PKG_SRC_LIST,
};
use md5::{Digest, Md5};
use serde_json::{json, Map, Value};
use std::collections::HashSet;

fn error_response(err: CoreError) -> Response {
    let status = match err.kind {
        ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::AuthRequired => StatusCode::UNAUTHORIZED,
        ErrorKind::Forbidden => StatusCode::FORBIDDEN,
        ErrorKind::IndexFault | ErrorKind::StoreFault => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({"error": err.message}))).into_response()
}

fn not_found_uri(uri: &str) -> Response {
    (StatusCode::NOT_FOUND, format!("URI {uri} not found.")).into_response()
}

fn parse_coordinate(req: &RouteRequest) -> Result<Coordinate, Response> {
    Coordinate::parse(req.capture("path").unwrap_or("")).map_err(error_response)
}

fn parse_hash(req: &RouteRequest) -> Result<PackageHash, Response> {
    PackageHash::parse(req.capture("hash").unwrap_or("")).map_err(error_response)
}

/// Absolute URL for a blob store key. The key is also the path the generic
/// GET/PUT accessor (§4.7.8) resolves directly against the blob store, so
/// this is a literal, bit-exact URL — no extra path segment.
fn file_url(req: &RouteRequest, key: &str) -> String {
    format!("http://{}/{key}", req.host())
}

pub async fn ping(_ctx: AppContext, _req: RouteRequest) -> Response {
    (StatusCode::ACCEPTED, [("x-conan-server-capabilities", "complex_search,revisions")], "").into_response()
}

pub async fn users_ack(_ctx: AppContext, _req: RouteRequest) -> Response {
    Json(json!({})).into_response()
}

/// `GET /v1/conans/search?q=<pattern>` — every indexed recipe coordinate
/// whose text contains `q`, derived from any key that has reached its
/// `0/export/` marker.
pub async fn recipe_search(ctx: AppContext, req: RouteRequest) -> Response {
    let query = req.query.get("q").cloned().unwrap_or_default();
    let keys = match ctx.store.list("").await {
        Ok(keys) => keys,
        Err(e) => return error_response(e),
    };

    let mut seen = HashSet::new();
    let mut results = Vec::new();
    for key in keys {
        let Some(idx) = key.find("/0/export/") else { continue };
        let mut coord = key[..idx].to_string();
        if let Some(stripped) = coord.strip_suffix("/_/_") {
            coord = stripped.to_string();
        }
        if coord.contains(&query) && seen.insert(coord.clone()) {
            results.push(coord);
        }
    }

    Json(json!({ "results": results })).into_response()
}

/// `GET /v1/conans/<coord>/search` — binary info for every package under the
/// recipe, keyed by package hash, sourced from each package's
/// `conaninfo.txt`.
pub async fn binary_search(ctx: AppContext, req: RouteRequest) -> Response {
    let coord = match parse_coordinate(&req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let prefix = format!("{}/0/package/", coord.root_key());
    let keys = match ctx.store.list(&prefix).await {
        Ok(keys) => keys,
        Err(e) => return error_response(e),
    };

    let mut out = Map::new();
    let mut hashes: Vec<&str> = keys
        .iter()
        .filter(|k| k.ends_with("/conaninfo.txt"))
        .filter_map(|k| k.strip_prefix(&prefix))
        .filter_map(|rest| rest.split('/').next())
        .collect();
    hashes.sort_unstable();
    hashes.dedup();

    for hash in hashes {
        let key = format!("{prefix}{hash}/0/conaninfo.txt");
        let bytes = match ctx.store.get(&key).await {
            Ok(bytes) => bytes,
            Err(_) => continue,
        };
        let text = match std::str::from_utf8(&bytes) {
            Ok(text) => text,
            Err(_) => continue,
        };
        let doc = match IniDocument::parse(text) {
            Ok(doc) => doc,
            Err(_) => continue,
        };
        let mut obj = doc.to_json_object();
        obj.remove("recipe_hash");
        let recipe_hash = doc.keys("recipe_hash").first().copied().unwrap_or("").to_string();
        obj.insert("recipe_hash".to_string(), Value::String(recipe_hash));
        out.insert(hash.to_string(), Value::Object(obj));
    }

    Json(Value::Object(out)).into_response()
}

/// `GET /v1/conans/<coord>/download_urls` — URL per canonical recipe file
/// present under `export/`.
pub async fn recipe_download_urls(ctx: AppContext, req: RouteRequest) -> Response {
    let coord = match parse_coordinate(&req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let mut urls = Map::new();
    for filename in PKG_SRC_LIST {
        let key = path::recipe_key(&coord, 0, filename);
        match ctx.store.exists(&key).await {
            Ok(true) => {
                urls.insert((*filename).to_string(), Value::String(file_url(&req, &key)));
            }
            Ok(false) => {}
            Err(e) => return error_response(e),
        }
    }

    if urls.is_empty() {
        return not_found_uri(&req.uri);
    }
    Json(Value::Object(urls)).into_response()
}

/// `GET /v1/conans/<coord>/packages/<hash>/download_urls` — URL per
/// canonical binary file present under the package directory.
pub async fn binary_download_urls(ctx: AppContext, req: RouteRequest) -> Response {
    let coord = match parse_coordinate(&req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let hash = match parse_hash(&req) {
        Ok(h) => h,
        Err(resp) => return resp,
    };

    let mut urls = Map::new();
    for filename in PKG_BIN_LIST {
        let key = path::binary_key(&coord, 0, &hash, 0, filename);
        match ctx.store.exists(&key).await {
            Ok(true) => {
                urls.insert((*filename).to_string(), Value::String(file_url(&req, &key)));
            }
            Ok(false) => {}
            Err(e) => return error_response(e),
        }
    }

    if urls.is_empty() {
        return not_found_uri(&req.uri);
    }
    Json(Value::Object(urls)).into_response()
}

/// `GET /v1/conans/<coord>/packages/<hash>` — MD5 digest of each canonical
/// binary file, `null` for any file absent. 404 only when none are present.
pub async fn binary_manifest_digest(ctx: AppContext, req: RouteRequest) -> Response {
    let coord = match parse_coordinate(&req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let hash = match parse_hash(&req) {
        Ok(h) => h,
        Err(resp) => return resp,
    };

    let mut digests = Map::new();
    let mut any_present = false;
    for filename in PKG_BIN_LIST {
        let key = path::binary_key(&coord, 0, &hash, 0, filename);
        match ctx.store.get(&key).await {
            Ok(bytes) => {
                any_present = true;
                let mut hasher = Md5::new();
                hasher.update(&bytes);
                let digest = hex::encode(hasher.finalize());
                digests.insert((*filename).to_string(), Value::String(digest));
            }
            Err(e) if e.kind == ErrorKind::NotFound => {
                digests.insert((*filename).to_string(), Value::Null);
            }
            Err(e) => return error_response(e),
        }
    }

    if !any_present {
        return not_found_uri(&req.uri);
    }
    Json(Value::Object(digests)).into_response()
}

/// `PUT /v1/conans/<coord>/upload_urls` — allocate signed upload URLs for a
/// recipe. Refuses to re-allocate over an existing coordinate.
pub async fn recipe_upload_url_allocation(ctx: AppContext, req: RouteRequest) -> Response {
    let coord = match parse_coordinate(&req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    allocate_upload_urls(&ctx, &req, &format!("{}/", coord.root_key()), |filename| {
        path::recipe_key(&coord, 0, filename)
    })
    .await
}

/// `PUT /v1/conans/<coord>/packages/<hash>/upload_urls` — allocate signed
/// upload URLs for a binary package.
pub async fn binary_upload_url_allocation(ctx: AppContext, req: RouteRequest) -> Response {
    let coord = match parse_coordinate(&req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let hash = match parse_hash(&req) {
        Ok(h) => h,
        Err(resp) => return resp,
    };
    allocate_upload_urls(&ctx, &req, &format!("{}/", path::binary_root(&coord, 0, &hash)), |filename| {
        path::binary_key(&coord, 0, &hash, 0, filename)
    })
    .await
}

async fn allocate_upload_urls(
    ctx: &AppContext,
    req: &RouteRequest,
    existing_prefix: &str,
    key_of: impl Fn(&str) -> String,
) -> Response {
    let existing = match ctx.store.list(existing_prefix).await {
        Ok(keys) => keys,
        Err(e) => return error_response(e),
    };
    if !existing.is_empty() {
        return (StatusCode::NOT_FOUND, format!("{existing_prefix} already exists")).into_response();
    }

    let filenames: Vec<String> = match serde_json::from_slice::<Value>(&req.body) {
        Ok(Value::Object(map)) => map.keys().cloned().collect(),
        _ => return error_response(CoreError::bad_request("upload_urls body must be a JSON object")),
    };

    let mut urls = Map::new();
    for filename in filenames {
        let key = key_of(&filename);
        urls.insert(filename, Value::String(format!("{}?signature=0", file_url(req, &key))));
    }
    Json(Value::Object(urls)).into_response()
}

/// `GET /v2/conans/<coord>/latest` — the most recently indexed recipe
/// revision and its upload timestamp.
pub async fn v2_recipe_latest(ctx: AppContext, req: RouteRequest) -> Response {
    let coord = match parse_coordinate(&req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let api = RevisionsApi::new(ctx.store.clone(), coord);
    match api.get_recipe_revision_entries().await {
        Ok(entries) => match entries.last() {
            Some(entry) => Json(json!({"revision": entry.revision, "time": entry.time})).into_response(),
            None => not_found_uri(&req.uri),
        },
        Err(e) => error_response(e),
    }
}

/// `GET /v2/conans/<coord>/packages/<hash>/latest` — the most recently
/// indexed binary revision for a package and its upload timestamp.
pub async fn v2_binary_latest(ctx: AppContext, req: RouteRequest) -> Response {
    let coord = match parse_coordinate(&req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let hash = match parse_hash(&req) {
        Ok(h) => h,
        Err(resp) => return resp,
    };
    let api = RevisionsApi::new(ctx.store.clone(), coord);
    match api.get_binary_revision_entries(0, &hash).await {
        Ok(entries) => match entries.last() {
            Some(entry) => Json(json!({"revision": entry.revision, "time": entry.time})).into_response(),
            None => not_found_uri(&req.uri),
        },
        Err(e) => error_response(e),
    }
}

/// `GET /v2/conans/<coord>/revisions/<rev>/files` — canonical recipe
/// filenames present at `<rev>`, each mapped to its MD5 digest.
pub async fn v2_recipe_files_list(ctx: AppContext, req: RouteRequest) -> Response {
    let coord = match parse_coordinate(&req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let rev = match req.capture("rev").and_then(|s| s.parse::<u64>().ok()) {
        Some(rev) => rev,
        None => return error_response(CoreError::bad_request("malformed revision")),
    };
    files_digest_listing(&ctx, &req, PKG_SRC_LIST, |filename| path::recipe_key(&coord, rev, filename)).await
}

/// `GET /v2/conans/<coord>/revisions/<rev>/files/<name>` — raw bytes of one
/// canonical recipe file at `<rev>`.
pub async fn v2_recipe_file_get(ctx: AppContext, req: RouteRequest) -> Response {
    let coord = match parse_coordinate(&req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let rev = match req.capture("rev").and_then(|s| s.parse::<u64>().ok()) {
        Some(rev) => rev,
        None => return error_response(CoreError::bad_request("malformed revision")),
    };
    let name = req.capture("name").unwrap_or("").to_string();
    get_file(&ctx, &req, &path::recipe_key(&coord, rev, &name)).await
}

/// `GET /v2/conans/<coord>/packages/<hash>/revisions/<rev>/files` —
/// canonical binary filenames present at `<rev>`, each mapped to its MD5
/// digest.
pub async fn v2_binary_files_list(ctx: AppContext, req: RouteRequest) -> Response {
    let coord = match parse_coordinate(&req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let hash = match parse_hash(&req) {
        Ok(h) => h,
        Err(resp) => return resp,
    };
    let bin_rev = match req.capture("bin_rev").and_then(|s| s.parse::<u64>().ok()) {
        Some(rev) => rev,
        None => return error_response(CoreError::bad_request("malformed revision")),
    };
    files_digest_listing(&ctx, &req, PKG_BIN_LIST, |filename| path::binary_key(&coord, 0, &hash, bin_rev, filename)).await
}

/// `GET /v2/conans/<coord>/packages/<hash>/revisions/<rev>/files/<name>` —
/// raw bytes of one canonical binary file at `<rev>`.
pub async fn v2_binary_file_get(ctx: AppContext, req: RouteRequest) -> Response {
    let coord = match parse_coordinate(&req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let hash = match parse_hash(&req) {
        Ok(h) => h,
        Err(resp) => return resp,
    };
    let bin_rev = match req.capture("bin_rev").and_then(|s| s.parse::<u64>().ok()) {
        Some(rev) => rev,
        None => return error_response(CoreError::bad_request("malformed revision")),
    };
    let name = req.capture("name").unwrap_or("").to_string();
    get_file(&ctx, &req, &path::binary_key(&coord, 0, &hash, bin_rev, &name)).await
}

async fn files_digest_listing(
    ctx: &AppContext,
    req: &RouteRequest,
    canonical_files: &[&str],
    key_of: impl Fn(&str) -> String,
) -> Response {
    let mut files = Map::new();
    for filename in canonical_files {
        let key = key_of(filename);
        if let Ok(bytes) = ctx.store.get(&key).await {
            let mut hasher = Md5::new();
            hasher.update(&bytes);
            files.insert((*filename).to_string(), json!({"md5": hex::encode(hasher.finalize())}));
        }
    }
    if files.is_empty() {
        return not_found_uri(&req.uri);
    }
    Json(json!({"files": files})).into_response()
}

async fn get_file(ctx: &AppContext, req: &RouteRequest, key: &str) -> Response {
    match ctx.store.get(key).await {
        Ok(bytes) => (StatusCode::OK, bytes).into_response(),
        Err(e) if e.kind == ErrorKind::NotFound => not_found_uri(&req.uri),
        Err(e) => error_response(e),
    }
}

/// The generic GET-file / PUT-file accessor every `download_urls`/
/// `upload_urls` response resolves to. Not part of the route table — it is
/// the dispatcher's fallback for any request the table doesn't claim.
pub async fn generic_get(ctx: &AppContext, key: &str, uri: &str) -> Response {
    match ctx.store.get(key).await {
        Ok(bytes) => (StatusCode::OK, bytes).into_response(),
        Err(e) if e.kind == ErrorKind::NotFound => not_found_uri(uri),
        Err(e) => error_response(e),
    }
}

pub async fn generic_put(ctx: &AppContext, key: &str, body: bytes::Bytes) -> Response {
    match ctx.store.put(key, body).await {
        Ok(()) => StatusCode::CREATED.into_response(),
        Err(e) => error_response(e),
    }
}
