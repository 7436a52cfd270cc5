use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::models::RequestId;

/// The minimal description of a job handed to the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub id: RequestId,
    pub command: String,
    pub input_params: Vec<String>,
    pub num_required_input_params: u32,
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("job queue is closed")]
    Closed,
}

/// Fire-and-forget hand-off of jobs to whatever executes them.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: JobDescriptor) -> Result<(), QueueError>;
}

/// Queue backed by a bounded tokio channel, drained by [`crate::runtime::Worker`].
#[derive(Clone)]
pub struct ChannelQueue {
    tx: mpsc::Sender<JobDescriptor>,
}

impl ChannelQueue {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<JobDescriptor>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl JobQueue for ChannelQueue {
    async fn enqueue(&self, job: JobDescriptor) -> Result<(), QueueError> {
        tracing::debug!(request_id = job.id, "Enqueueing job");
        self.tx.send(job).await.map_err(|_| QueueError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(id: RequestId) -> JobDescriptor {
        JobDescriptor {
            id,
            command: "echo {1}".to_string(),
            input_params: vec!["hi".to_string()],
            num_required_input_params: 1,
        }
    }

    #[test]
    fn descriptor_wire_shape() {
        let value = serde_json::to_value(job(9)).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "id": 9,
                "command": "echo {1}",
                "input_params": ["hi"],
                "num_required_input_params": 1
            })
        );
    }

    #[tokio::test]
    async fn jobs_arrive_in_order() {
        let (queue, mut rx) = ChannelQueue::new(4);
        queue.enqueue(job(1)).await.unwrap();
        queue.enqueue(job(2)).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().id, 1);
        assert_eq!(rx.recv().await.unwrap().id, 2);
    }

    #[tokio::test]
    async fn enqueue_fails_once_receiver_is_gone() {
        let (queue, rx) = ChannelQueue::new(1);
        drop(rx);
        assert!(matches!(queue.enqueue(job(1)).await, Err(QueueError::Closed)));
    }
}
