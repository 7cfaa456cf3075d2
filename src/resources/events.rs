use crate::resources::{HandleId, ResourceKind};
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;

/// Cache notifications, delivered to every subscriber in publish order
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CacheEvent {
    /// A resource finished finalize and is ready to use
    Added { id: HandleId, kind: ResourceKind },
    /// A handle was renamed or its metadata edited
    Changed { id: HandleId },
    /// A resource was unloaded (the handle may still be registered)
    Removed { id: HandleId, kind: ResourceKind },
    /// A consumer hit a handle with nothing attached
    NeedsReload { id: HandleId },
    /// A background load or finalize failed
    LoadFailed { id: HandleId, reason: String },
    /// Load count went from zero to one
    LoadingStarted,
    /// Load count returned to zero
    LoadingFinished,
}

impl CacheEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            CacheEvent::Added { .. } => "Added",
            CacheEvent::Changed { .. } => "Changed",
            CacheEvent::Removed { .. } => "Removed",
            CacheEvent::NeedsReload { .. } => "NeedsReload",
            CacheEvent::LoadFailed { .. } => "LoadFailed",
            CacheEvent::LoadingStarted => "LoadingStarted",
            CacheEvent::LoadingFinished => "LoadingFinished",
        }
    }
}

/// Fan-out of cache events over channels
#[derive(Debug, Default)]
pub struct EventHub {
    subscribers: Mutex<Vec<Sender<CacheEvent>>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<CacheEvent> {
        let (sender, receiver) = channel::unbounded();
        self.subscribers.lock().push(sender);
        receiver
    }

    /// Send to all live subscribers; dropped receivers are pruned
    pub fn publish(&self, event: CacheEvent) {
        let mut subscribers = self.subscribers.lock();
        if subscribers.is_empty() {
            return;
        }
        tracing::trace!(event = event.event_name(), "publishing cache event");
        subscribers.retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_to_multiple_subscribers() {
        let hub = EventHub::new();
        let first = hub.subscribe();
        let second = hub.subscribe();

        hub.publish(CacheEvent::LoadingStarted);
        hub.publish(CacheEvent::LoadingFinished);

        for receiver in [first, second] {
            let events: Vec<_> = receiver.try_iter().collect();
            assert_eq!(
                events,
                vec![CacheEvent::LoadingStarted, CacheEvent::LoadingFinished]
            );
        }
    }

    #[test]
    fn test_dropped_subscribers_are_pruned() {
        let hub = EventHub::new();
        let kept = hub.subscribe();
        drop(hub.subscribe());
        assert_eq!(hub.subscriber_count(), 2);

        hub.publish(CacheEvent::LoadingStarted);
        assert_eq!(hub.subscriber_count(), 1);
        assert_eq!(kept.try_recv(), Ok(CacheEvent::LoadingStarted));
    }
}
