//! Scheduling notifications.
//!
//! Events are informational. Recording never blocks the decision loop and
//! never fails it.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};

use fleet_core::Instance;

pub const REASON_SCHEDULED: &str = "Scheduled";
pub const REASON_FAILED_SCHEDULING: &str = "FailedScheduling";
pub const REASON_FAILED_BINDING: &str = "FailedBinding";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    Normal,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulingEvent {
    pub instance_uid: String,
    pub instance_name: String,
    pub event_type: EventType,
    pub reason: String,
    pub message: String,
}

impl SchedulingEvent {
    pub fn new(
        instance: &Instance,
        event_type: EventType,
        reason: &str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            instance_uid: instance.meta.uid.clone(),
            instance_name: instance.meta.name.clone(),
            event_type,
            reason: reason.to_string(),
            message: message.into(),
        }
    }
}

pub trait EventRecorder: Send + Sync {
    fn record(&self, event: SchedulingEvent);
}

/// Writes events to the tracing subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogRecorder;

impl EventRecorder for LogRecorder {
    fn record(&self, event: SchedulingEvent) {
        match event.event_type {
            EventType::Normal => info!(
                instance = %event.instance_uid,
                name = %event.instance_name,
                reason = %event.reason,
                "{}", event.message
            ),
            EventType::Warning => warn!(
                instance = %event.instance_uid,
                name = %event.instance_name,
                reason = %event.reason,
                "{}", event.message
            ),
        }
    }
}

/// Forwards events into a bounded channel, dropping them when it is full.
#[derive(Debug)]
pub struct ChannelRecorder {
    tx: mpsc::Sender<SchedulingEvent>,
    dropped: AtomicU64,
}

impl ChannelRecorder {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<SchedulingEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx,
                dropped: AtomicU64::new(0),
            },
            rx,
        )
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl EventRecorder for ChannelRecorder {
    fn record(&self, event: SchedulingEvent) {
        if self.tx.try_send(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_recorder_forwards_events() {
        let (recorder, mut rx) = ChannelRecorder::new(4);
        let inst = Instance::new("web-0", "small").with_uid("u1");
        recorder.record(SchedulingEvent::new(
            &inst,
            EventType::Normal,
            REASON_SCHEDULED,
            "assigned to fleet-a",
        ));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.instance_uid, "u1");
        assert_eq!(event.instance_name, "web-0");
        assert_eq!(event.reason, REASON_SCHEDULED);
        assert_eq!(recorder.dropped(), 0);
    }

    #[test]
    fn channel_recorder_drops_when_full() {
        let (recorder, _rx) = ChannelRecorder::new(1);
        let inst = Instance::new("web-0", "small").with_uid("u1");
        for _ in 0..3 {
            recorder.record(SchedulingEvent::new(
                &inst,
                EventType::Warning,
                REASON_FAILED_BINDING,
                "conflict",
            ));
        }
        assert_eq!(recorder.dropped(), 2);
    }

    #[test]
    fn log_recorder_accepts_both_types() {
        let inst = Instance::new("web-0", "small").with_uid("u1");
        LogRecorder.record(SchedulingEvent::new(&inst, EventType::Normal, REASON_SCHEDULED, "ok"));
        LogRecorder.record(SchedulingEvent::new(
            &inst,
            EventType::Warning,
            REASON_FAILED_BINDING,
            "failed",
        ));
    }
}
