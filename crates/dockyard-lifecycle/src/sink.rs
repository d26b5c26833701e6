//! Notification delivery.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tracing::info;

use dockyard_queue::Notification;

/// Where notification-lane jobs end up. Errors make the queue retry.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, notification: &Notification) -> anyhow::Result<()>;
}

/// Writes every notification to the log.
#[derive(Debug, Default)]
pub struct LogNotificationSink;

#[async_trait]
impl NotificationSink for LogNotificationSink {
    async fn deliver(&self, n: &Notification) -> anyhow::Result<()> {
        info!(
            kind = %n.kind,
            user_id = %n.user_id,
            subscription_id = n.subscription_id.as_deref().unwrap_or("-"),
            instance_id = n.instance_id.as_deref().unwrap_or("-"),
            detail = %n.detail,
            "notification"
        );
        Ok(())
    }
}

/// Keeps delivered notifications in memory.
#[derive(Debug, Default)]
pub struct MemoryNotificationSink {
    delivered: Mutex<Vec<Notification>>,
}

impl MemoryNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delivered(&self) -> Vec<Notification> {
        self.delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl NotificationSink for MemoryNotificationSink {
    async fn deliver(&self, n: &Notification) -> anyhow::Result<()> {
        self.delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(n.clone());
        Ok(())
    }
}
