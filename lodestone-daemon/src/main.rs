//! Lodestone daemon (`lodestoned`)
//!
//! Headless agent that runs the per-area stores and serves the message
//! transport for peers, clients and subscribers.

use clap::Parser;
use lodestone_store::{server, Config, KvStore};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "lodestoned", version, about = "Lodestone KV store daemon")]
struct Args {
    /// Path to the JSON config file.
    #[arg(long, env = "OPENR_CONFIG")]
    config: String,

    /// Listen address override (defaults to the config's listen_addr,
    /// then 0.0.0.0:9090).
    #[arg(long)]
    listen: Option<String>,

    /// Verbose logging (-v for debug, -vv for trace)
    #[arg(long, short, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let config = Config::load(&args.config).map_err(|e| anyhow::anyhow!("{e}"))?;
    let listen = args
        .listen
        .or_else(|| config.listen_addr.clone())
        .unwrap_or_else(|| "0.0.0.0:9090".to_string());

    tracing::info!(
        "lodestoned v{} starting as {} ({} areas)",
        env!("CARGO_PKG_VERSION"),
        config.node_name,
        config.areas.len()
    );

    let store = KvStore::spawn(&config).map_err(|e| anyhow::anyhow!("{e}"))?;
    let handle = store.handle();

    let listener = tokio::net::TcpListener::bind(&listen).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    let server_task = tokio::spawn(server::serve(listener, handle));

    shutdown_signal().await;
    tracing::info!("shutdown signal received...");

    server_task.abort();
    store.shutdown().await;
    tracing::info!("daemon stopped");
    Ok(())
}

fn init_tracing(verbosity: u8) {
    let mut filter = EnvFilter::from_default_env();

    // Only apply defaults if RUST_LOG is not set
    if std::env::var("RUST_LOG").is_err() {
        let level = match verbosity {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        filter = filter.add_directive(level.parse().expect("static directive"));
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigint = signal(SignalKind::interrupt()).expect("Failed to install SIGINT handler");
        let mut sigterm =
            signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");
        tokio::select! {
            _ = sigint.recv() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to listen for Ctrl+C");
    }
}
