use crate::sweeper::LivenessPolicy;
use clap::Parser;
use std::{net::SocketAddr, time::Duration};

#[derive(Parser, Debug)]
#[command(
    name = "rendezvous_server",
    rename_all = "kebab-case",
    rename_all_env = "screaming-snake"
)]
pub struct Args {
    /// Address to listen on
    #[arg(default_value = "0.0.0.0:8080", env)]
    pub host: SocketAddr,

    /// Seconds a peer may stay silent before it is evicted
    #[arg(long, default_value_t = 120, env)]
    pub liveness_window: u64,

    /// Seconds between liveness sweeps
    #[arg(long, default_value_t = 5, env)]
    pub sweep_interval: u64,

    /// Websocket read and write buffer size in bytes
    #[arg(long, default_value_t = crate::DEFAULT_BUFFER_SIZE, env)]
    pub buffer_size: usize,

    /// Allow cross-origin requests from anywhere
    #[arg(long, env)]
    pub cors: bool,

    /// Log every HTTP request
    #[arg(long, env)]
    pub trace: bool,
}

impl Args {
    pub fn liveness(&self) -> LivenessPolicy {
        LivenessPolicy {
            window: Duration::from_secs(self.liveness_window),
            sweep_interval: Duration::from_secs(self.sweep_interval),
        }
    }
}
