//! `licensing-service` CLI: `generate-keys` prints a fresh X25519 keypair for
//! provisioning a license or the server identity; `serve` runs the HTTP wire
//! handler with the cleanup driver attached.

use std::net::SocketAddr;
use std::sync::Arc;

use base64::Engine as _;
use clap::{Parser, Subcommand};
use licensing_core::cleanup;
use licensing_core::crypto::KeyPair;
use licensing_core::store::sqlite::SqliteStore;
use licensing_core::{Config, Engine};
use licensing_server::{build_router, AppState};
use licensing_service::logging;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a fresh X25519 keypair (id/key) for a license or the server identity
    GenerateKeys,
    /// Run the license-session HTTP server
    Serve,
}

fn print_keypair() {
    let pair = KeyPair::generate();
    let public = pair.public_bytes();
    let secret = pair.secret_bytes();
    println!("id (public):");
    println!("  hex:    {}", hex::encode(public));
    println!("  base64: {}", base64::engine::general_purpose::STANDARD.encode(public));
    println!();
    println!("key (secret):");
    println!("  hex:    {}", hex::encode(secret));
    println!("  base64: {}", base64::engine::general_purpose::STANDARD.encode(secret));
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::GenerateKeys => {
            print_keypair();
            Ok(())
        }
        Commands::Serve => serve().await,
    }
}

async fn serve() -> anyhow::Result<()> {
    let config = Config::load()?;
    logging::init_logging(&config.log_level);

    let store = SqliteStore::connect(&config.db_path).await?;
    let cleanup_interval = config.cleanup_interval;
    let listen_addr: SocketAddr = config.http_listen.parse()?;
    let engine = Arc::new(Engine::new(store, config));

    let cancel = CancellationToken::new();
    let cleanup_engine = engine.clone();
    let cleanup_cancel = cancel.clone();
    let cleanup_task = tokio::spawn(async move {
        cleanup::run(
            cleanup_engine.store(),
            cleanup_interval,
            cleanup_cancel,
            Box::new(|msg, err| match err {
                Some(e) => tracing::warn!(error = %e, "{msg}"),
                None => tracing::info!("{msg}"),
            }),
        )
        .await;
    });

    let app = build_router(AppState { engine });
    tracing::info!(%listen_addr, "licensing server starting");
    let listener = tokio::net::TcpListener::bind(listen_addr).await?;

    let shutdown_cancel = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            shutdown_cancel.cancel();
        })
        .await?;

    cancel.cancel();
    let _ = cleanup_task.await;
    Ok(())
}
