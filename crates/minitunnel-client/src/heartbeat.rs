//! Periodic keepalive from the agent

use minitunnel_proto::TunnelMessage;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, trace};

/// Interval between heartbeats
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Queue a heartbeat on `outgoing` every `period`, starting one period from now
///
/// Heartbeats go through the same queue as responses so that frames never
/// interleave on the stream. Returns once the queue's receiver is gone.
pub async fn run_heartbeat(outgoing: mpsc::Sender<TunnelMessage>, period: Duration) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if outgoing.send(TunnelMessage::Heartbeat {}).await.is_err() {
            debug!("Heartbeat stopped: writer is gone");
            return;
        }
        trace!("Queued heartbeat");
    }
}
