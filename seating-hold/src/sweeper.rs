use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::manager::HoldManager;

/// Runs `sweep_expired` every `every` until `shutdown` flips to true.
///
/// A failed sweep is logged and retried on the next tick.
pub fn spawn_sweeper(
    manager: Arc<HoldManager>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(interval_secs = every.as_secs(), "Hold sweeper started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match manager.sweep_expired().await {
                        Ok(0) => debug!("Sweep found nothing to expire"),
                        Ok(count) => debug!(count, "Sweep expired holds"),
                        Err(e) => error!(error = %e, "Hold sweep failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Hold sweeper stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::HoldConfig;
    use chrono::Duration as ChronoDuration;
    use seating_core::{ManualClock, NoopEventSink, SeatKey, SessionId};
    use seating_store::MemoryHoldStore;

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_expires_and_stops() {
        let clock = ManualClock::default();
        let manager = Arc::new(HoldManager::new(
            Arc::new(MemoryHoldStore::new()),
            Arc::new(clock.clone()),
            Arc::new(NoopEventSink),
            HoldConfig::default(),
        ));
        let seat = SeatKey::new(1, "A1");
        let session = SessionId::parse("sweeper").unwrap();
        manager.acquire_hold(&seat, &session).await.unwrap();

        let (tx, rx) = watch::channel(false);
        let handle = spawn_sweeper(manager.clone(), Duration::from_secs(60), rx);

        clock.advance(ChronoDuration::seconds(901));
        tokio::time::sleep(Duration::from_secs(61)).await;

        assert!(manager.session_holds(&session).await.unwrap().is_empty());
        let other = SessionId::parse("other").unwrap();
        assert!(manager.acquire_hold(&seat, &other).await.is_ok());

        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
