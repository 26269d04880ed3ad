use tokio::sync::broadcast;

use crate::collaborators::{NotificationEvent, NotificationSink};

const NOTIFICATION_CHANNEL_CAPACITY: usize = 64;

/// Logs every event and fans it out to any live subscribers.
#[derive(Debug, Clone)]
pub struct BroadcastNotificationSink {
    sender: broadcast::Sender<NotificationEvent>,
}

impl Default for BroadcastNotificationSink {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastNotificationSink {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(NOTIFICATION_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NotificationEvent> {
        self.sender.subscribe()
    }
}

impl NotificationSink for BroadcastNotificationSink {
    fn notify(&self, event: NotificationEvent) {
        tracing::info!(event = event.as_str(), "notification");
        // No subscribers is fine.
        let _ = self.sender.send(event);
    }
}
