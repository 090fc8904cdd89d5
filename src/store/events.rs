//! Job change notifications: broadcast fan-out to observers.

use tokio::sync::broadcast;
use tracing::trace;

use crate::jobs::model::JobEvent;

/// Default broadcast channel capacity.
const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Publish/subscribe channel owned by a Job Store.
#[derive(Debug, Clone)]
pub struct JobEventBus {
    tx: broadcast::Sender<JobEvent>,
}

impl JobEventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to every subsequent job mutation.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: JobEvent) {
        trace!(job_id = %event.job_id(), status = %event.status(), "Publishing job event");
        // No subscribers is fine
        let _ = self.tx.send(event);
    }
}

impl Default for JobEventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::jobs::model::JobStatus;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = JobEventBus::default();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        let id = Uuid::new_v4();
        bus.publish(JobEvent::JobCreated {
            job_id: id,
            status: JobStatus::Pending,
        });

        assert_eq!(rx1.recv().await.unwrap().job_id(), id);
        assert_eq!(rx2.recv().await.unwrap().status(), JobStatus::Pending);
    }

    #[test]
    fn publish_without_subscribers_is_harmless() {
        let bus = JobEventBus::new(4);
        bus.publish(JobEvent::JobUpdated {
            job_id: Uuid::nil(),
            status: JobStatus::Failed,
        });
    }
}
