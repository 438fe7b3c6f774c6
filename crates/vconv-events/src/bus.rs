//! Broadcast-backed event bus.

use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::event::TaskEvent;

/// Events buffered per subscriber before the oldest are dropped.
pub const DEFAULT_BUS_CAPACITY: usize = 256;

/// Fan-out channel for task lifecycle events.
///
/// Cloning is cheap; all clones publish into the same channel. The
/// subscriber registry lives inside the broadcast channel and is never
/// held across a publish, so a dead or slow subscriber cannot block the
/// others.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<TaskEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event to all current subscribers.
    ///
    /// Best-effort: an empty subscriber set is not an error, and the
    /// result is deliberately ignored by callers on the write path.
    pub fn publish(&self, event: TaskEvent) {
        let receivers = self.tx.receiver_count();
        if receivers == 0 {
            trace!(task_id = %event.task_id(), "no subscribers, dropping event");
            return;
        }
        debug!(
            task_id = %event.task_id(),
            action = ?event.action,
            receivers,
            "publishing task event"
        );
        let _ = self.tx.send(event);
    }

    /// Subscribe to the firehose. Callers filter per-task topics themselves.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::TaskAction;
    use uuid::Uuid;
    use vconv_models::{TaskDescriptor, TaskStatus};

    fn event(action: TaskAction) -> TaskEvent {
        TaskEvent::new(
            action,
            TaskDescriptor {
                task_id: Uuid::new_v4(),
                video_path: "/movies/a.mp4".into(),
                dest_path: None,
                worker_id: 1,
                worker_name: "w1".into(),
                progress: 0.0,
                status: TaskStatus::Running,
                error_message: None,
                elapsed_time: 0,
                remaining_time: None,
            },
        )
    }

    #[tokio::test]
    async fn test_subscriber_receives_published_events() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.publish(event(TaskAction::Created));
        bus.publish(event(TaskAction::Updated));

        assert_eq!(rx.recv().await.unwrap().action, TaskAction::Created);
        assert_eq!(rx.recv().await.unwrap().action, TaskAction::Updated);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_noop() {
        let bus = EventBus::default();
        // Must not panic or block
        bus.publish(event(TaskAction::Completed));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_events_arrive_in_publish_order() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        let first = event(TaskAction::Created);
        let first_id = first.task_id();
        bus.publish(first);
        let second = event(TaskAction::Failed);
        let second_id = second.task_id();
        bus.publish(second);

        assert_eq!(rx.recv().await.unwrap().task_id(), first_id);
        assert_eq!(rx.recv().await.unwrap().task_id(), second_id);
    }
}
