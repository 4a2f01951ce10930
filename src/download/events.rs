use serde::{Serialize, Serializer};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::broadcast;
use url::Url;

const EVENT_CAPACITY: usize = 256;

/// Lifecycle event published when event broadcasting is enabled
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DownloadEvent {
    /// Transfer handed to the executor. `attempt` is the retry count (0 on first submit).
    Queued {
        url: Url,
        attempt: u32,
        #[serde(rename = "delay_secs", serialize_with = "serialize_secs")]
        delay: Duration,
    },
    /// Record deleted from the store
    Removed { url: Url },
    /// File placed at its final location
    Finished { url: Url, location: PathBuf },
    /// Fraction of bytes received, `0.0..=1.0`
    Progress { url: Url, fraction: f32 },
    /// Download gave up, or the transfer reported an error
    Failed { url: Url, reason: String },
}

impl DownloadEvent {
    pub fn url(&self) -> &Url {
        match self {
            Self::Queued { url, .. }
            | Self::Removed { url }
            | Self::Finished { url, .. }
            | Self::Progress { url, .. }
            | Self::Failed { url, .. } => url,
        }
    }
}

fn serialize_secs<S: Serializer>(delay: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(delay.as_secs())
}

/// Broadcast channel for [`DownloadEvent`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DownloadEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DownloadEvent> {
        self.sender.subscribe()
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn emit(&self, event: DownloadEvent) {
        tracing::trace!(?event, "event");
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url() -> Url {
        Url::parse("https://x/file.bin").unwrap()
    }

    #[tokio::test]
    async fn test_subscriber_receives_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.emit(DownloadEvent::Removed { url: url() });
        assert_eq!(rx.recv().await.unwrap(), DownloadEvent::Removed { url: url() });
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new();
        bus.emit(DownloadEvent::Removed { url: url() });
    }

    #[test]
    fn test_queued_serializes_delay_in_seconds() {
        let event = DownloadEvent::Queued {
            url: url(),
            attempt: 2,
            delay: Duration::from_secs(20),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            serde_json::json!({
                "event": "queued",
                "url": "https://x/file.bin",
                "attempt": 2,
                "delay_secs": 20,
            })
        );
        assert_eq!(event.url().as_str(), "https://x/file.bin");
    }
}
