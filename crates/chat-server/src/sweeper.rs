//! Periodic liveness sweep driver.

use std::time::Duration;

use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::hub::HubHandle;

/// Why the sweeper stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweeperExit {
    /// The hub stopped accepting commands.
    HubClosed,
    /// The sweeper was cancelled externally.
    Cancelled,
}

/// Ask the hub for a sweep every `interval`. The first sweep happens one full
/// interval after start.
pub async fn run_sweeper(
    hub: HubHandle,
    interval: Duration,
    cancel: CancellationToken,
) -> SweeperExit {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Skip the immediate first tick
    let _ = ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match hub.sweep().await {
                    Ok(report) => debug!(
                        pinged = report.pinged.len(),
                        evicted = report.evicted.len(),
                        purged = report.purged.len(),
                        digest = report.digest_published,
                        "liveness sweep done"
                    ),
                    Err(_) => {
                        info!("hub closed, sweeper stopping");
                        return SweeperExit::HubClosed;
                    }
                }
            }
            () = cancel.cancelled() => {
                return SweeperExit::Cancelled;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chat_auth::TokenTable;
    use chat_core::Envelope;

    use crate::hub::{outbound_queue, Hub, HubConfig, Outgoing};
    use crate::sink::LogSink;

    fn spawn_hub(config: HubConfig, cancel: &CancellationToken) -> HubHandle {
        let resolver = Arc::new(TokenTable::new([("tok-A".to_string(), "alice".to_string())]));
        let (hub, _task) = Hub::new(config, resolver, Arc::new(LogSink)).spawn(cancel.child_token());
        hub
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_cancelled() {
        let cancel = CancellationToken::new();
        let hub = spawn_hub(HubConfig::default(), &cancel);
        let stop = CancellationToken::new();
        let handle = tokio::spawn(run_sweeper(hub, Duration::from_secs(100), stop.clone()));

        stop.cancel();
        assert_eq!(handle.await.unwrap(), SweeperExit::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_stops_when_hub_closes() {
        let cancel = CancellationToken::new();
        let hub = spawn_hub(HubConfig::default(), &cancel);
        cancel.cancel();

        let exit = run_sweeper(hub, Duration::from_secs(1), CancellationToken::new()).await;
        assert_eq!(exit, SweeperExit::HubClosed);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_pings_silent_sessions() {
        let cancel = CancellationToken::new();
        let config = HubConfig {
            silent_after: Duration::from_secs(10),
            dead_after: Duration::from_secs(100),
            ..HubConfig::default()
        };
        let hub = spawn_hub(config, &cancel);
        let (tx, mut rx) = outbound_queue(16);
        let _ = hub.attach("tok-A", tx).await.unwrap();

        let stop = CancellationToken::new();
        let sweeper = tokio::spawn(run_sweeper(hub.clone(), Duration::from_secs(15), stop.clone()));

        // Roster from the attach, then the first ping after one interval.
        let mut saw_ping = false;
        while let Some(item) = rx.recv().await {
            if let Outgoing::Frame(frame) = item {
                if let Ok(Envelope::Ping(ping)) = Envelope::decode(&frame) {
                    assert_eq!(ping.ping, 1);
                    saw_ping = true;
                    break;
                }
            }
        }
        assert!(saw_ping);
        stop.cancel();
        assert_eq!(sweeper.await.unwrap(), SweeperExit::Cancelled);
    }
}
