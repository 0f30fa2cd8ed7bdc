use clap::Parser;
use redecoin::{Node, Result};
use tracing::{error, info};
use tracing_subscriber::{
    filter::{EnvFilter, LevelFilter},
    fmt,
    prelude::*,
};

#[derive(Debug, Parser)]
#[command(name = "redecoin", about = "Peer-to-peer blockchain node")]
struct Opt {
    #[arg(long, default_value = "localhost", help = "Host the node advertises")]
    host: String,
    #[arg(long, default_value_t = 5000, help = "Port to listen on")]
    port: u16,
    #[arg(long, num_args = 0.., help = "Bootstrap peer addresses (host:port)")]
    bootstrap: Vec<String>,
    #[arg(long, help = "Wallet name receiving mining rewards")]
    wallet: Option<String>,
}

/// Initialize logging with functional configuration
fn initialize_logging() {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(fmt::layer().with_filter(filter))
        .init();
}

async fn run(opt: Opt) -> Result<()> {
    let node = Node::new(&opt.host, opt.port, opt.wallet);
    node.start().await?;

    for bootstrap in &opt.bootstrap {
        if node.connect_to_peer(bootstrap).await {
            info!(peer = %bootstrap, "connected to bootstrap peer");
        } else {
            error!(peer = %bootstrap, "failed to connect to bootstrap peer");
        }
    }

    if node.peer_count() > 0 {
        node.sync_blockchain().await;
    }

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    node.stop();
    Ok(())
}

#[tokio::main]
async fn main() {
    initialize_logging();

    let opt = Opt::parse();
    if let Err(e) = run(opt).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
