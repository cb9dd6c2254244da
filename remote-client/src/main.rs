use std::path::PathBuf;

use clap::Parser;
use fuser::MountOption;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use remote_client::config::load_config;
use remote_client::fs::{FsWrapper, RemoteFS};

#[derive(Parser, Debug)]
struct Args {
    /// Where to mount the remote filesystem.
    mountpoint: PathBuf,

    /// Path to a `config.toml`; defaults are used for anything it omits
    /// or if the file is missing.
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Overrides `server_url` from the config file.
    #[arg(long)]
    server_url: Option<String>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "remote_client=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let mut config = load_config(&args.config);
    if let Some(server_url) = args.server_url {
        config.server_url = server_url;
    }

    tracing::info!(mountpoint = %args.mountpoint.display(), server_url = %config.server_url, "mounting remote filesystem");

    let filesystem = RemoteFS::new(config);
    let wrapper = FsWrapper::new(filesystem);
    let options = vec![MountOption::AutoUnmount, MountOption::FSName("remotefs".to_string())];

    fuser::mount2(wrapper, &args.mountpoint, &options)?;
    Ok(())
}
