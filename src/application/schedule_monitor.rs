use crate::application::NowProvider;
use crate::domain::reminders::{ReminderNotification, ReminderScanner};
use crate::domain::schedule::{ScheduleSnapshot, WallClock, snapshot};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::notifier::NotificationSink;
use crate::infrastructure::schedule_store::ScheduleStore;
use chrono::Utc;
use chrono_tz::Tz;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::MissedTickBehavior;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonitorTick {
    pub snapshot: ScheduleSnapshot,
    pub reminders: Vec<ReminderNotification>,
}

/// Keeps one owner's "what is happening now" view current and fires
/// block-start reminders.
pub struct ScheduleMonitor<S, N>
where
    S: ScheduleStore + ?Sized,
    N: NotificationSink + ?Sized,
{
    owner: String,
    store: Arc<S>,
    notifier: Arc<N>,
    timezone: Tz,
    now_provider: NowProvider,
    scanner: Mutex<ReminderScanner>,
    snapshot_tx: watch::Sender<ScheduleSnapshot>,
}

impl<S, N> ScheduleMonitor<S, N>
where
    S: ScheduleStore + ?Sized,
    N: NotificationSink + ?Sized,
{
    pub fn new(owner: impl Into<String>, store: Arc<S>, notifier: Arc<N>, timezone: Tz) -> Self {
        let now_provider: NowProvider = Arc::new(Utc::now);
        let now = WallClock::from_datetime(&now_provider().with_timezone(&timezone));
        let (snapshot_tx, _) = watch::channel(ScheduleSnapshot::empty(now));
        Self {
            owner: owner.into(),
            store,
            notifier,
            timezone,
            now_provider,
            scanner: Mutex::new(ReminderScanner::new()),
            snapshot_tx,
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn wall_clock(&self) -> WallClock {
        WallClock::from_datetime(&(self.now_provider)().with_timezone(&self.timezone))
    }

    pub fn subscribe(&self) -> watch::Receiver<ScheduleSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn current(&self) -> ScheduleSnapshot {
        self.snapshot_tx.borrow().clone()
    }

    /// Recomputes statuses without scanning reminders.
    pub fn refresh(&self) -> Result<ScheduleSnapshot, InfraError> {
        let now = self.wall_clock();
        let blocks = self.store.list_by_day(&self.owner, now.day)?;
        let view = snapshot(&blocks, now);
        self.snapshot_tx.send_replace(view.clone());
        Ok(view)
    }

    /// One schedule tick: recompute, scan reminders, deliver them.
    /// Delivery failures are logged and do not fail the tick.
    pub async fn tick(&self) -> Result<MonitorTick, InfraError> {
        let now = self.wall_clock();
        let blocks = self.store.list_by_day(&self.owner, now.day)?;
        let reminders = {
            let mut scanner = self
                .scanner
                .lock()
                .map_err(|error| InfraError::store(format!("reminder scanner lock poisoned: {error}")))?;
            scanner.scan(&blocks, now)
        };

        for reminder in &reminders {
            if let Err(error) = self.notifier.notify(&self.owner, reminder).await {
                log::warn!(
                    "reminder delivery failed for {} block {}: {error}",
                    self.owner,
                    reminder.block_id
                );
            }
        }

        let view = snapshot(&blocks, now);
        self.snapshot_tx.send_replace(view.clone());
        Ok(MonitorTick {
            snapshot: view,
            reminders,
        })
    }

    /// Ticks every `period` and refreshes on store changes for today until
    /// `shutdown` flips to true or its sender is dropped.
    pub async fn run(&self, period: Duration, mut shutdown: watch::Receiver<bool>) -> Result<(), InfraError> {
        let mut changes = self.store.subscribe(&self.owner)?;
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        log::info!("schedule monitor started for {}", self.owner);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(error) = self.tick().await {
                        log::error!("schedule tick failed for {}: {error}", self.owner);
                    }
                }
                change = changes.recv() => match change {
                    Ok(change) if change.day != self.wall_clock().day => {}
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {
                        if let Err(error) = self.refresh() {
                            log::error!("schedule refresh failed for {}: {error}", self.owner);
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        log::warn!("change feed closed for {}", self.owner);
                        break;
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        log::info!("schedule monitor stopped for {}", self.owner);
        Ok(())
    }
}
