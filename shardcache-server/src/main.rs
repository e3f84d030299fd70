//! Shardcache node process
//!
//! Starts one cache node, optionally joining an existing cluster:
//!
//!   shardcache-server --addr 127.0.0.1:7000
//!   shardcache-server --addr 127.0.0.1:7001 --join 127.0.0.1:7000

use anyhow::Result;
use clap::Parser;
use shardcache_core::{Server, ServerConfig};
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "shardcache-server")]
#[command(about = "Distributed TTL key-value cache node")]
struct Args {
    /// Listen address for this node
    #[arg(short, long, default_value = "127.0.0.1:7000")]
    addr: String,

    /// Address of an existing node to join the cluster through
    #[arg(short, long)]
    join: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    let env_filter = EnvFilter::new(format!(
        "shardcache_server={},shardcache_core={}",
        log_level, log_level
    ));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!("starting cache node on {}", args.addr);

    let server = Server::bind(ServerConfig::new(args.addr.clone())).await?;
    let handle = server.handle();

    if let Some(peer) = &args.join {
        info!("joining cluster via {}", peer);
        server.join_cluster(peer);
    }

    let mut server_task = tokio::spawn(server.serve());

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("received shutdown signal, stopping node");
            handle.stop();
            let _ = (&mut server_task).await;
        }
        result = &mut server_task => {
            match result {
                Ok(Ok(())) => info!("server exited"),
                Ok(Err(e)) => info!("server error: {:?}", e),
                Err(e) => info!("server task error: {}", e),
            }
        }
    }

    info!("node stopped");
    Ok(())
}
