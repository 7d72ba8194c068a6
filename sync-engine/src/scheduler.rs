//! Background scheduling: the backup timer, the sync ticker and the settings
//! listener, each on its own task.

use crate::engine::Engine;
use crate::settings::EngineSettings;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// The backup timer never fires sooner than this.
pub const MIN_BACKUP_DELAY: Duration = Duration::from_secs(1);

/// Time until the next scheduled backup: the interval minus the time since
/// the newest backup, never less than [`MIN_BACKUP_DELAY`].
pub fn next_backup_delay(
    latest: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    interval: chrono::Duration,
) -> Duration {
    let Some(latest) = latest else {
        return MIN_BACKUP_DELAY;
    };

    (interval - (now - latest))
        .to_std()
        .map(|left| left.max(MIN_BACKUP_DELAY))
        .unwrap_or(MIN_BACKUP_DELAY)
}

pub struct Scheduler {
    engine: Arc<Engine>,
    sync_interval: Duration,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(engine: Arc<Engine>, sync_interval: Duration) -> Self {
        Self {
            engine,
            sync_interval,
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
        }
    }

    /// Spawn the background tasks. The sync ticker runs a first pass right
    /// away. Settings published on `settings` are applied as they arrive.
    pub fn start(&mut self, settings: Option<watch::Receiver<EngineSettings>>) {
        self.tasks.push(tokio::spawn(run_backup_timer(
            self.engine.clone(),
            self.cancel.clone(),
        )));
        self.tasks.push(tokio::spawn(run_sync_ticker(
            self.engine.clone(),
            self.sync_interval,
            self.cancel.clone(),
        )));
        if let Some(rx) = settings {
            self.tasks.push(tokio::spawn(run_settings_listener(
                self.engine.clone(),
                rx,
                self.cancel.clone(),
            )));
        }
        tracing::info!(sync_interval = ?self.sync_interval, "Scheduler started");
    }

    /// Signal every task to stop and wait for them. A task busy with a
    /// backend call finishes that call first.
    pub async fn stop(self) {
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Scheduler task ended abnormally");
            }
        }
        tracing::info!("Scheduler stopped");
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

async fn run_backup_timer(engine: Arc<Engine>, cancel: CancellationToken) {
    engine.reset_backup_timer().await;

    loop {
        let delay = engine
            .time_until_next_backup()
            .await
            .max(MIN_BACKUP_DELAY);

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = engine.timer_reset().notified() => continue,
            _ = tokio::time::sleep(delay) => {
                tracing::info!("Performing scheduled backup");
                if let Err(e) = engine.perform_backup(None).await {
                    tracing::error!(error = %e, "Error performing scheduled backup");
                }
                engine.reset_backup_timer().await;
            }
        }
    }
    tracing::info!("Stopping backup scheduler");
}

async fn run_sync_ticker(engine: Arc<Engine>, every: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                tracing::debug!("Performing scheduled backup sync");
                if let Err(e) = engine.reconcile().await {
                    tracing::error!(error = %e, "Error performing backup sync");
                }
            }
        }
    }
    tracing::info!("Stopping sync scheduler");
}

async fn run_settings_listener(
    engine: Arc<Engine>,
    mut rx: watch::Receiver<EngineSettings>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = rx.changed() => {
                if changed.is_err() {
                    tracing::debug!("Settings channel closed");
                    break;
                }
                let settings = rx.borrow_and_update().clone();
                engine.apply_settings(settings).await;
            }
        }
    }
}
