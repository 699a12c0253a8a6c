use seating_hold::spawn_sweeper;
use seating_store::app_config::Config;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::state::AppState;

/// Starts the background loops. Each exits once `shutdown` flips to true.
pub fn spawn_workers(state: &AppState, config: &Config, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();

    // Redis expires holds itself; the in-process store needs a sweeper.
    if state.holds.ttl_native() {
        info!("Store expires holds natively, sweeper not started");
    } else {
        handles.push(spawn_sweeper(
            state.holds.clone(),
            config.seating.sweep_interval(),
            shutdown.clone(),
        ));
    }

    if config.dynamic_pricing.enabled {
        handles.push(spawn_recompute(
            state.clone(),
            config.dynamic_pricing.recompute_interval(),
            shutdown,
        ));
    }

    handles
}

fn spawn_recompute(state: AppState, every: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick fires immediately; nothing is quoted yet at startup.
        ticker.tick().await;
        info!(interval_secs = every.as_secs(), "Price recompute worker started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let priced = state.pricing.recompute_all().await;
                    debug!(priced, "Scheduled price recompute finished");
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Price recompute worker stopped");
    })
}
