use crate::domain::models::DayOfWeek;
use crate::infrastructure::error::InfraError;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangeKind {
    Inserted { count: usize },
    Updated { block_ids: Vec<String> },
    Deleted { count: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduleChange {
    pub owner: String,
    pub day: DayOfWeek,
    #[serde(flatten)]
    pub kind: ChangeKind,
}

/// Per-owner publish/subscribe channel for schedule mutations.
#[derive(Debug, Default)]
pub struct ChangeFeed {
    channels: Mutex<HashMap<String, broadcast::Sender<ScheduleChange>>>,
}

impl ChangeFeed {
    pub fn subscribe(&self, owner: &str) -> Result<broadcast::Receiver<ScheduleChange>, InfraError> {
        let mut channels = self
            .channels
            .lock()
            .map_err(|error| InfraError::store(format!("change feed lock poisoned: {error}")))?;
        let sender = channels
            .entry(owner.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        Ok(sender.subscribe())
    }

    /// Returns the number of subscribers reached. No subscribers is not an error.
    pub fn publish(&self, change: ScheduleChange) -> usize {
        let Ok(channels) = self.channels.lock() else {
            return 0;
        };
        channels
            .get(&change.owner)
            .and_then(|sender| sender.send(change).ok())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inserted(owner: &str, count: usize) -> ScheduleChange {
        ScheduleChange {
            owner: owner.to_string(),
            day: DayOfWeek::MONDAY,
            kind: ChangeKind::Inserted { count },
        }
    }

    #[tokio::test]
    async fn subscribers_receive_only_their_owner_changes() {
        let feed = ChangeFeed::default();
        let mut alice = feed.subscribe("alice").expect("subscribe alice");
        let mut bob = feed.subscribe("bob").expect("subscribe bob");

        assert_eq!(feed.publish(inserted("alice", 2)), 1);
        assert_eq!(alice.recv().await.expect("alice change"), inserted("alice", 2));
        assert!(matches!(
            bob.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn every_subscriber_gets_its_own_copy() {
        let feed = ChangeFeed::default();
        let mut first = feed.subscribe("alice").expect("subscribe first");
        let mut second = feed.subscribe("alice").expect("subscribe second");
        assert_eq!(feed.publish(inserted("alice", 1)), 2);
        assert_eq!(first.recv().await.expect("first"), inserted("alice", 1));
        assert_eq!(second.recv().await.expect("second"), inserted("alice", 1));
    }

    #[test]
    fn publish_without_subscribers_is_silent() {
        let feed = ChangeFeed::default();
        assert_eq!(feed.publish(inserted("nobody", 1)), 0);
    }
}
