use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use super::base::{PipelineEvent, PipelineEventKind};


pub type EventHandler = Arc<dyn Fn(PipelineEvent) + Send + Sync>;


/// Fire-and-forget observer registry. Handlers run on spawned tasks so a slow
/// or panicking observer never reaches the publisher.
pub struct EventBus {
    handlers: RwLock<HashMap<PipelineEventKind, Vec<EventHandler>>>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }


    pub fn register(&self, kind: PipelineEventKind, handler: EventHandler) {
        self.handlers.write().entry(kind).or_default().push(handler);
        debug!("Registered handler for event type: {}", kind);
    }


    pub fn emit(&self, event: PipelineEvent) {
        let handlers = {
            let guard = self.handlers.read();
            match guard.get(&event.kind) {
                Some(handlers) => handlers.clone(),
                None => {
                    debug!("No handlers for event type: {}", event.kind);
                    return;
                }
            }
        };

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!("No runtime available, dropping event {}", event.kind);
            return;
        };

        for handler in handlers {
            let event = event.clone();
            runtime.spawn(async move {
                handler(event);
            });
        }
    }


    pub fn handler_count(&self, kind: PipelineEventKind) -> usize {
        self.handlers.read().get(&kind).map_or(0, Vec::len)
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
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_event_bus() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);

        let handler: EventHandler = Arc::new(move |_event| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        });

        bus.register(PipelineEventKind::DeletionSucceeded, handler);

        bus.emit(PipelineEvent::new(PipelineEventKind::DeletionSucceeded, json!({"post_id": "p1"})));
        bus.emit(PipelineEvent::new(PipelineEventKind::DeletionFailed, json!({})));

        tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(bus.handler_count(PipelineEventKind::DeletionSucceeded), 1);
        assert_eq!(bus.handler_count(PipelineEventKind::AlertRaised), 0);
    }

    #[test]
    fn test_emit_without_runtime_is_a_no_op() {
        let bus = EventBus::new();
        bus.register(PipelineEventKind::AlertRaised, Arc::new(|_| {}));
        bus.emit(PipelineEvent::new(PipelineEventKind::AlertRaised, serde_json::Value::Null));
    }

    #[test]
    fn test_kind_string_form() {
        assert_eq!(PipelineEventKind::DeletionQueued.to_string(), "deletion.queued");
        assert_eq!(
            "bulk.completed".parse::<PipelineEventKind>().unwrap(),
            PipelineEventKind::BulkCompleted
        );
    }
}
