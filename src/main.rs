use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use minihyperproxy::api::build_router;
use minihyperproxy::{PortConfig, Supervisor};
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "Control plane for a fleet of HTTP reverse proxies and multi-hop tunnels")]
struct Args {
    #[arg(long, env = "CONTROL_PLANE_LISTEN", default_value = "0.0.0.0:7052")]
    listen: SocketAddr,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .compact()
        .init();

    let supervisor = Arc::new(Supervisor::new(PortConfig::from_env()));
    let router = build_router(supervisor);

    let listener = std::net::TcpListener::bind(args.listen)
        .with_context(|| format!("failed to bind control plane listener on {}", args.listen))?;
    listener
        .set_nonblocking(true)
        .context("failed to configure control plane listener")?;

    info!(listen = %args.listen, "control plane ready");

    let server = hyper::Server::from_tcp(listener)
        .context("failed to start control plane server")?
        .serve(router.into_make_service());

    let graceful = server.with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
    });

    graceful
        .await
        .context("control plane server exited with error")
}
