use crate::domain::jobs::PipelineEvent;
use tokio::sync::broadcast;

#[derive(Debug)]
pub struct EventHub {
    sender: broadcast::Sender<PipelineEvent>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHub {
    pub fn new() -> Self {
        // Listeners only log; a lagging one skips events rather than blocking workers.
        let (sender, _) = broadcast::channel(256);
        Self { sender }
    }

    /// Publish to every current subscriber. Returns how many received it.
    pub fn publish(&self, event: PipelineEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_without_subscribers_is_dropped() {
        let hub = EventHub::new();
        assert_eq!(hub.publish(PipelineEvent::ImagesDeleted { count: 1 }), 0);
    }

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let hub = EventHub::new();
        let mut rx = hub.subscribe();
        assert_eq!(hub.publish(PipelineEvent::ImagesDeleted { count: 3 }), 1);
        assert_eq!(
            rx.recv().await.unwrap(),
            PipelineEvent::ImagesDeleted { count: 3 }
        );
    }
}
