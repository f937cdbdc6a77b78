use crate::domain::actor::UserId;
use crate::domain::ports::{EventKind, Notifier};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Writes each event to the `tracing` log instead of delivering it.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, user_id: UserId, kind: EventKind, payload: serde_json::Value) -> Result<()> {
        tracing::info!(user_id, event = %kind, %payload, "notification");
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentNotification {
    pub user_id: UserId,
    pub kind: EventKind,
    pub payload: serde_json::Value,
}

/// Keeps every event in memory so tests can assert on them.
#[derive(Debug, Default, Clone)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<SentNotification>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<SentNotification> {
        self.sent.lock().await.clone()
    }

    pub async fn sent_to(&self, user_id: UserId) -> Vec<EventKind> {
        self.sent
            .lock()
            .await
            .iter()
            .filter(|n| n.user_id == user_id)
            .map(|n| n.kind)
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, user_id: UserId, kind: EventKind, payload: serde_json::Value) -> Result<()> {
        self.sent.lock().await.push(SentNotification {
            user_id,
            kind,
            payload,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recording_notifier() {
        let notifier = RecordingNotifier::new();
        notifier
            .notify(3, EventKind::TaskAssigned, serde_json::json!({"task_id": 1}))
            .await
            .unwrap();
        assert_eq!(notifier.sent_to(3).await, vec![EventKind::TaskAssigned]);
        assert!(notifier.sent_to(4).await.is_empty());
    }
}
