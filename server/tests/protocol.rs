//! End-to-end tests: real HTTP requests against an in-process server backed
//! by a [`conan_core::blob::MemoryBlobStore`].

use conan_core::auth::AllowAll;
use conan_core::blob::{BlobStore, MemoryBlobStore};
use conan_http::AppContext;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

async fn spawn_server() -> (String, Arc<dyn BlobStore>) {
    let store: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
    let ctx =
        AppContext { store: Arc::clone(&store), auth: Arc::new(AllowAll), lock_ttl: Duration::from_secs(60) };
    let app = conan_http::router(ctx);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}"), store)
}

#[tokio::test]
async fn ping_reports_capabilities() {
    let (base, _store) = spawn_server().await;
    let client = reqwest::Client::new();

    let resp = client.get(format!("{base}/v1/ping")).send().await.unwrap();
    assert_eq!(resp.status(), 202);
    let capabilities = resp.headers().get("x-conan-server-capabilities").unwrap().to_str().unwrap().to_string();
    assert!(capabilities.contains("revisions"));
}

#[tokio::test]
async fn recipe_upload_then_download_round_trip() {
    let (base, store) = spawn_server().await;
    let client = reqwest::Client::new();

    // Seed the recipe's four canonical files directly — the generic file
    // accessor is exercised separately in generic_file_accessor_serves_uploaded_bytes.
    for filename in conan_core::PKG_SRC_LIST {
        store.put(&format!("zlib/1.2.11/_/_/0/export/{filename}"), bytes::Bytes::from_static(b"payload")).await.unwrap();
    }

    let resp = client.get(format!("{base}/v1/conans/zlib/1.2.11/_/_/download_urls")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    let urls = body.as_object().unwrap();
    assert_eq!(urls.len(), conan_core::PKG_SRC_LIST.len());
    for filename in conan_core::PKG_SRC_LIST {
        let url = urls.get(*filename).unwrap().as_str().unwrap();
        assert!(url.starts_with("http://"));
        assert!(url.contains("/zlib/1.2.11/_/_/0/export/"));
    }
}

#[tokio::test]
async fn incomplete_recipe_yields_404_on_download_urls() {
    let (base, store) = spawn_server().await;
    let client = reqwest::Client::new();

    // Only three of the four canonical files present.
    for filename in &conan_core::PKG_SRC_LIST[..3] {
        store.put(&format!("zlib/1.2.11/_/_/0/export/{filename}"), bytes::Bytes::from_static(b"x")).await.unwrap();
    }

    let resp = client.get(format!("{base}/v1/conans/zlib/1.2.11/_/_/download_urls")).send().await.unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn binary_search_exposes_conaninfo_as_json() {
    let (base, store) = spawn_server().await;
    let client = reqwest::Client::new();

    let conaninfo = "[settings]\nos=Linux\narch=x86_64\n\n[options]\nshared=False\n\n[recipe_hash]\nabc123hash\n";
    store
        .put("zlib/1.2.11/_/_/0/package/deadbeef00112233/0/conaninfo.txt", bytes::Bytes::from(conaninfo))
        .await
        .unwrap();

    let resp = client.get(format!("{base}/v1/conans/zlib/1.2.11/_/_/search")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    let pkg = &body["deadbeef00112233"];
    assert_eq!(pkg["settings"]["os"], "Linux");
    assert_eq!(pkg["options"]["shared"], "False");
    assert_eq!(pkg["recipe_hash"], "abc123hash");
}

#[tokio::test]
async fn upload_url_allocation_refuses_existing_coordinate() {
    let (base, store) = spawn_server().await;
    let client = reqwest::Client::new();

    store.put("zlib/1.2.11/_/_/0/export/conanfile.py", bytes::Bytes::from_static(b"x")).await.unwrap();

    let resp = client
        .put(format!("{base}/v1/conans/zlib/1.2.11/_/_/upload_urls"))
        .json(&json!({"conanfile.py": 10}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn upload_url_allocation_on_fresh_coordinate_returns_signed_urls() {
    let (base, _store) = spawn_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .put(format!("{base}/v1/conans/newlib/1.0.0/_/_/upload_urls"))
        .json(&json!({"conanfile.py": 123, "conanmanifest.txt": 45}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    let url = body["conanfile.py"].as_str().unwrap();
    assert!(url.contains("signature=0"));
}

#[tokio::test]
async fn generic_file_accessor_serves_uploaded_bytes() {
    let (base, _store) = spawn_server().await;
    let client = reqwest::Client::new();

    let put_resp = client
        .put(format!("{base}/newlib/1.0.0/_/_/0/export/conanfile.py"))
        .body("class Foo(object): pass")
        .send()
        .await
        .unwrap();
    assert_eq!(put_resp.status(), 201);

    let get_resp = client.get(format!("{base}/newlib/1.0.0/_/_/0/export/conanfile.py")).send().await.unwrap();
    assert_eq!(get_resp.status(), 200);
    assert_eq!(get_resp.text().await.unwrap(), "class Foo(object): pass");
}

#[tokio::test]
async fn recipe_download_url_is_a_literal_storage_path() {
    let (base, store) = spawn_server().await;
    let client = reqwest::Client::new();

    for filename in conan_core::PKG_SRC_LIST {
        store
            .put(&format!("zmqpp/4.2.0/_/_/0/export/{filename}"), bytes::Bytes::from_static(b"payload"))
            .await
            .unwrap();
    }

    let resp = client.get(format!("{base}/v1/conans/zmqpp/4.2.0/_/_/download_urls")).send().await.unwrap();
    let body: Value = resp.json().await.unwrap();
    let url = body["conanfile.py"].as_str().unwrap();
    assert!(url.ends_with("/zmqpp/4.2.0/_/_/0/export/conanfile.py"));

    // The returned URL resolves directly against the generic file accessor.
    let download = client.get(url).send().await.unwrap();
    assert_eq!(download.status(), 200);
    assert_eq!(download.bytes().await.unwrap(), bytes::Bytes::from_static(b"payload"));
}

#[tokio::test]
async fn unauthenticated_write_is_rejected_under_bearer_token_gate() {
    let store: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
    let ctx = AppContext {
        store,
        auth: Arc::new(conan_core::auth::BearerToken::new("secret")),
        lock_ttl: Duration::from_secs(60),
    };
    let app = conan_http::router(ctx);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let client = reqwest::Client::new();
    let resp = client
        .put(format!("http://{addr}/v1/conans/newlib/1.0.0/_/_/upload_urls"))
        .json(&json!({"conanfile.py": 1}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let resp = client
        .put(format!("http://{addr}/v1/conans/newlib/1.0.0/_/_/upload_urls"))
        .bearer_auth("secret")
        .json(&json!({"conanfile.py": 1}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    // Reads never require the token.
    let resp = client.get(format!("http://{addr}/v1/ping")).send().await.unwrap();
    assert_eq!(resp.status(), 202);
}
