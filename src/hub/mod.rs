//! Update Hub (C7): broadcasts job/step lifecycle events to WebSocket
//! subscribers. Grounded on `channels/web/sse.rs`'s `SseManager` —
//! bounded `broadcast::Sender`, drop-on-full semantics via `send`'s
//! ignored error, and the `CountedStream`-style connection counter that
//! decrements on drop.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::model::{JobStatus, JobStepStatus};
use crate::store::JobStore;

/// One message pushed down every open `/ws` connection (spec §4.7).
#[derive(Debug, Clone, Serialize)]
pub struct HubEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: Value,
    pub ts: DateTime<Utc>,
}

pub struct Hub {
    tx: broadcast::Sender<HubEvent>,
    connection_count: Arc<AtomicU64>,
}

impl Hub {
    pub fn new(buffer: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer);
        Self {
            tx,
            connection_count: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Publish an event to every subscriber. A full subscriber buffer or
    /// zero subscribers are both fine — slow or absent clients never
    /// block the engine.
    pub fn publish(&self, event_type: &str, data: Value) {
        let event = HubEvent {
            event_type: event_type.to_string(),
            data,
            ts: Utc::now(),
        };
        let _ = self.tx.send(event);
    }

    pub fn connection_count(&self) -> u64 {
        self.connection_count.load(Ordering::Relaxed)
    }

    /// Subscribe, incrementing the connection counter. The counter
    /// decrements automatically when the returned handle is dropped.
    pub fn subscribe(&self) -> HubSubscription {
        self.connection_count.fetch_add(1, Ordering::Relaxed);
        HubSubscription {
            rx: self.tx.subscribe(),
            counter: Arc::clone(&self.connection_count),
        }
    }

    /// Spawn the background job streamer: polls the job store on an
    /// interval and emits `job_update`/`job_step_update` events for
    /// anything that changed since the last poll (spec §4.7).
    pub fn spawn_job_streamer(
        self: &Arc<Self>,
        job_store: Arc<dyn JobStore>,
        poll_interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let hub = Arc::clone(self);
        tokio::spawn(async move { hub.run_job_streamer(job_store, poll_interval).await })
    }

    async fn run_job_streamer(&self, job_store: Arc<dyn JobStore>, poll_interval: Duration) {
        let mut last_job_status: HashMap<Uuid, JobStatus> = HashMap::new();
        let mut last_step_status: HashMap<Uuid, JobStepStatus> = HashMap::new();

        loop {
            tokio::time::sleep(poll_interval).await;

            let jobs = match job_store.list_jobs().await {
                Ok(jobs) => jobs,
                Err(e) => {
                    tracing::warn!(error = %e, "job streamer failed to list jobs");
                    continue;
                }
            };

            for job in &jobs {
                if last_job_status.get(&job.id) != Some(&job.status) {
                    last_job_status.insert(job.id, job.status);
                    self.publish(
                        "job_update",
                        serde_json::json!({ "job_id": job.id, "status": job.status.as_str() }),
                    );
                }

                let steps = match job_store.list_steps(job.id).await {
                    Ok(steps) => steps,
                    Err(e) => {
                        tracing::warn!(error = %e, job_id = %job.id, "job streamer failed to list steps");
                        continue;
                    }
                };
                for step in &steps {
                    if last_step_status.get(&step.id) != Some(&step.status) {
                        last_step_status.insert(step.id, step.status);
                        self.publish(
                            "job_step_update",
                            serde_json::json!({
                                "job_id": job.id,
                                "step_id": step.id,
                                "status": step.status.as_str(),
                            }),
                        );
                    }
                }
            }
        }
    }
}

/// A subscription handle. Decrements the hub's connection counter on drop,
/// mirroring `CountedStream`'s drop-based bookkeeping.
pub struct HubSubscription {
    rx: broadcast::Receiver<HubEvent>,
    counter: Arc<AtomicU64>,
}

impl HubSubscription {
    pub async fn recv(&mut self) -> Option<HubEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for HubSubscription {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_without_subscribers_does_not_panic() {
        let hub = Hub::new(16);
        hub.publish("job_update", serde_json::json!({ "job_id": Uuid::new_v4() }));
    }

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let hub = Hub::new(16);
        let mut sub = hub.subscribe();
        assert_eq!(hub.connection_count(), 1);

        hub.publish("job_update", serde_json::json!({ "status": "completed" }));
        let event = sub.recv().await.unwrap();
        assert_eq!(event.event_type, "job_update");
    }

    #[tokio::test]
    async fn connection_count_decrements_on_drop() {
        let hub = Hub::new(16);
        {
            let _sub = hub.subscribe();
            assert_eq!(hub.connection_count(), 1);
        }
        assert_eq!(hub.connection_count(), 0);
    }
}
