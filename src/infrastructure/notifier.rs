use crate::domain::reminders::ReminderNotification;
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use std::sync::Mutex;

/// Destination for block-start reminders. Delivery failures are reported but
/// never retried by the caller.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, owner: &str, notification: &ReminderNotification) -> Result<(), InfraError>;
}

/// Writes reminders to the process log.
#[derive(Debug, Clone, Default)]
pub struct LogNotificationSink;

#[async_trait]
impl NotificationSink for LogNotificationSink {
    async fn notify(&self, owner: &str, notification: &ReminderNotification) -> Result<(), InfraError> {
        log::info!(
            "reminder for {owner} at {}: {}",
            notification.start_time,
            notification.body()
        );
        Ok(())
    }
}

/// Keeps delivered reminders in memory so callers can drain them.
#[derive(Debug, Default)]
pub struct RecordingNotificationSink {
    delivered: Mutex<Vec<(String, ReminderNotification)>>,
}

impl RecordingNotificationSink {
    pub fn delivered(&self) -> Vec<(String, ReminderNotification)> {
        self.delivered
            .lock()
            .map(|delivered| delivered.clone())
            .unwrap_or_default()
    }

    pub fn drain(&self) -> Vec<(String, ReminderNotification)> {
        self.delivered
            .lock()
            .map(|mut delivered| std::mem::take(&mut *delivered))
            .unwrap_or_default()
    }
}

#[async_trait]
impl NotificationSink for RecordingNotificationSink {
    async fn notify(&self, owner: &str, notification: &ReminderNotification) -> Result<(), InfraError> {
        let mut delivered = self
            .delivered
            .lock()
            .map_err(|error| InfraError::store(format!("notification lock poisoned: {error}")))?;
        delivered.push((owner.to_string(), notification.clone()));
        Ok(())
    }
}
