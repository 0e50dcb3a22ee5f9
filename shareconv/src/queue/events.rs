//! Queue event stream.

use parking_lot::Mutex;
use serde::Serialize;
use std::path::PathBuf;
use tokio::sync::broadcast;

use super::job::{Job, JobStatus};

/// Default capacity of the event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Per-job record, published whenever one of its fields changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEvent {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dest_path: Option<PathBuf>,
    pub status: JobStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&Job> for JobEvent {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.clone(),
            dest_path: job.dest_path.clone(),
            status: job.status,
            progress: job.progress,
            speed: job.speed.clone(),
            error: job.error.clone(),
        }
    }
}

/// Events published by the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum QueueEvent {
    Job(JobEvent),
    Paused,
    Resumed,
    /// No queued or running jobs remain after at least one ran.
    Idle,
}

impl QueueEvent {
    pub fn job(&self) -> Option<&JobEvent> {
        match self {
            Self::Job(event) => Some(event),
            _ => None,
        }
    }
}

/// Broadcast sender that can be closed explicitly.
pub(crate) struct EventEmitter {
    tx: Mutex<Option<broadcast::Sender<QueueEvent>>>,
}

impl EventEmitter {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx: Mutex::new(Some(tx)),
        }
    }

    pub(crate) fn emit(&self, event: QueueEvent) {
        if let Some(tx) = self.tx.lock().as_ref() {
            // No subscribers is fine.
            let _ = tx.send(event);
        }
    }

    /// Subscribe to future events. After [`close`](Self::close) the receiver
    /// reports `Closed` straight away.
    pub(crate) fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        match self.tx.lock().as_ref() {
            Some(tx) => tx.subscribe(),
            None => broadcast::channel(1).1,
        }
    }

    pub(crate) fn close(&self) {
        self.tx.lock().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::RecvError;

    #[test]
    fn test_event_json_shape() {
        let mut job = Job::new("/in/a.mov");
        job.status = JobStatus::Processing;
        job.progress = 12;
        job.speed = Some("1.1x".to_string());
        job.dest_path = Some(PathBuf::from("/out/a.mp4"));

        let json = serde_json::to_value(QueueEvent::Job(JobEvent::from(&job))).unwrap();
        assert_eq!(json["type"], "job");
        assert_eq!(json["id"], "/in/a.mov");
        assert_eq!(json["destPath"], "/out/a.mp4");
        assert_eq!(json["status"], "processing");
        assert_eq!(json["progress"], 12);
        assert_eq!(json["speed"], "1.1x");

        let json = serde_json::to_value(QueueEvent::Paused).unwrap();
        assert_eq!(json["type"], "paused");
    }

    #[tokio::test]
    async fn test_close_ends_subscriptions() {
        let emitter = EventEmitter::new(8);
        let mut rx = emitter.subscribe();

        emitter.emit(QueueEvent::Idle);
        emitter.close();
        emitter.emit(QueueEvent::Paused);

        assert_eq!(rx.recv().await.unwrap(), QueueEvent::Idle);
        assert!(matches!(rx.recv().await, Err(RecvError::Closed)));
        assert!(matches!(emitter.subscribe().recv().await, Err(RecvError::Closed)));
    }
}
