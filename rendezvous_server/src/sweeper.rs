use crate::registry::PeerRegistry;
use std::time::Duration;
use tokio::{
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// How long a peer may stay silent, and how often that is checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessPolicy {
    pub window: Duration,
    pub sweep_interval: Duration,
}

impl Default for LivenessPolicy {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(120),
            sweep_interval: Duration::from_secs(5),
        }
    }
}

/// Periodically evict peers that stopped sending frames, until `shutdown` fires.
pub(crate) fn spawn_sweeper(
    registry: PeerRegistry,
    policy: LivenessPolicy,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        // interval panics on a zero period
        let period = policy.sweep_interval.max(Duration::from_millis(1));
        let mut ticks = time::interval_at(Instant::now() + period, period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticks.tick() => {
                    let evicted = registry.sweep(Instant::now(), policy.window);
                    if !evicted.is_empty() {
                        info!("evicted {} silent peers: {evicted:?}", evicted.len());
                    }
                }
            }
        }
        debug!("liveness sweeper stopped");
    })
}
