use clap::Parser;
use rendezvous_server::{Args, SignalingServer};
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

fn setup_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rendezvous_server=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_file(false)
                .with_target(false),
        )
        .init();
}

#[tokio::main]
async fn main() {
    setup_logging();
    let args = Args::parse();

    info!("Rendezvous Signaling Server: {}", args.host);

    let liveness = args.liveness();
    let mut builder = SignalingServer::builder(args.host)
        .liveness_window(liveness.window)
        .sweep_interval(liveness.sweep_interval)
        .buffer_size(args.buffer_size);
    if args.cors {
        builder = builder.cors();
    }
    if args.trace {
        builder = builder.trace();
    }
    let server = builder.build();

    let shutdown = server.shutdown_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received ctrl-c, shutting down");
                shutdown.cancel();
            }
            Err(e) => warn!("unable to listen for ctrl-c: {e}"),
        }
    });

    server
        .serve()
        .await
        .expect("Unable to run signaling server, is it already running?")
}
