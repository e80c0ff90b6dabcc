//! `conan-server` binary — thin CLI shell over [`conan_core`] and
//! [`conan_http`].

use clap::{CommandFactory, Parser, Subcommand};
use conan_core::auth::{AllowAll, AuthGate, BearerToken};
use conan_core::blob::{BlobStore, FsBlobStore};
use conan_http::AppContext;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// HTTP server implementing the Conan package repository protocol.
#[derive(Parser)]
#[command(name = "conan-server", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Address to bind the HTTP listener to.
    #[arg(long, default_value = "127.0.0.1:9300")]
    bind: std::net::SocketAddr,

    /// Directory backing the filesystem blob store.
    #[arg(long, default_value = "./data")]
    storage_root: PathBuf,

    /// Require this bearer token for uploads; reads stay open. Omit to allow
    /// every request (local development default).
    #[arg(long)]
    bearer_token: Option<String>,

    /// Advisory storage lock TTL, in seconds.
    #[arg(long, default_value_t = 3600)]
    lock_ttl_secs: u64,

    /// Increase log verbosity (info by default; -v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("received SIGINT, shutting down"),
            _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.expect("failed to listen for Ctrl+C");
        info!("received Ctrl+C, shutting down");
    }
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "conan_server=info,conan_http=info,conan_core=info",
        1 => "conan_server=debug,conan_http=debug,conan_core=debug",
        _ => "conan_server=trace,conan_http=trace,conan_core=trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default_level.into()))
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Some(Commands::Completions { shell }) = &cli.command {
        clap_complete::generate(*shell, &mut Cli::command(), "conan-server", &mut std::io::stdout());
        return;
    }

    init_tracing(cli.verbose);

    let store: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(&cli.storage_root));
    let auth: Arc<dyn AuthGate> = match &cli.bearer_token {
        Some(token) => Arc::new(BearerToken::new(token.clone())),
        None => Arc::new(AllowAll),
    };

    let ctx =
        AppContext { store, auth, lock_ttl: Duration::from_secs(cli.lock_ttl_secs) };

    let app = conan_http::router(ctx)
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(cli.bind).await.unwrap_or_else(|e| {
        tracing::error!(addr = %cli.bind, error = %e, "could not bind listener");
        std::process::exit(1);
    });

    info!(addr = %cli.bind, storage_root = %cli.storage_root.display(), "conan-server listening");
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await.unwrap();
}
