use std::sync::Arc;

use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use trellis_gateway::acme::ChallengeStore;
use trellis_gateway::pipeline::InMemoryRegistry;
use trellis_gateway::server::{self, EdgeServer};
use trellis_gateway::{Config, Mux};

#[derive(Parser, Debug)]
#[command(name = "trellis-gateway")]
struct Args {
    #[arg(short, long)]
    config: String,
    /// Override the configured listen port
    #[arg(short, long)]
    port: Option<u16>,
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).ok();

    let config = Config::from_file(&args.config)?;
    let port = args.port.unwrap_or(config.listen.port);

    let mux = Arc::new(Mux::new());
    mux.reload(&config);

    // Pipelines are registered by the embedding runtime; a bare gateway
    // answers 503 for matched routes until some are added.
    let registry = Arc::new(InMemoryRegistry::new());
    let acme = Arc::new(ChallengeStore::new());

    let edge = Arc::new(EdgeServer::new(Arc::clone(&mux), registry, acme));

    let metrics_port = config.metrics.port;
    tokio::spawn(async move {
        if let Err(err) = server::run_metrics(metrics_port).await {
            tracing::error!("metrics listener failed: {}", err);
        }
    });

    tokio::select! {
        result = Arc::clone(&edge).run(port) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
        }
    }

    mux.close();
    Ok(())
}
