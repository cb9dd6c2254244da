use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use remote_server::config::load_config;
use remote_server::state::{AppState, TracingParticipant};
use vfs_core::providers::local_disk::LocalDiskProvider;

#[derive(Parser, Debug)]
struct Args {
    /// Path to a `config.toml`; defaults are used for anything it omits
    /// or if the file is missing.
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "remote_server=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = load_config(&args.config);

    std::fs::create_dir_all(&config.data_root)?;

    let provider: Arc<dyn vfs_core::FileSystemProvider> = Arc::new(LocalDiskProvider::new(config.data_root.clone()));
    let state = AppState::new(provider, "disk", Duration::from_millis(config.participant_timeout_ms));
    state.participants.register(Arc::new(TracingParticipant)).await;

    let app = remote_server::build_router(state);

    tracing::info!(addr = %config.bind_addr, data_root = %config.data_root.display(), "starting server");
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
