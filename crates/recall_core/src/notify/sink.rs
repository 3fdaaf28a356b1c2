//! Delivery sink contract and built-in sinks.

use crate::model::task::TaskId;
use log::info;
use std::collections::VecDeque;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Mutex;

/// One due reminder handed to a delivery collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueNotice {
    pub task_id: TaskId,
    pub task_name: String,
    /// Unix epoch milliseconds.
    pub due_at: i64,
}

/// Failure reported by a delivery collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryError {
    pub message: String,
}

impl DeliveryError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Display for DeliveryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "notification delivery failed: {}", self.message)
    }
}

impl Error for DeliveryError {}

/// Renders due reminders (OS toast, UI badge, terminal line, ...).
///
/// Called from the timer thread; implementations should return promptly.
pub trait NotificationSink: Send + Sync {
    fn deliver(&self, notice: &DueNotice) -> Result<(), DeliveryError>;
}

/// Sink that only records reminders in the core log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn deliver(&self, notice: &DueNotice) -> Result<(), DeliveryError> {
        info!(
            "event=notice_deliver module=notify status=ok sink=log task_id={} due_at={}",
            notice.task_id, notice.due_at
        );
        Ok(())
    }
}

/// Bounded in-memory queue drained by a polling presentation layer.
#[derive(Debug)]
pub struct QueueSink {
    pending: Mutex<VecDeque<DueNotice>>,
    capacity: usize,
}

impl QueueSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    /// Removes and returns all queued reminders in delivery order.
    pub fn drain(&self) -> Vec<DueNotice> {
        match self.pending.lock() {
            Ok(mut pending) => pending.drain(..).collect(),
            Err(poisoned) => poisoned.into_inner().drain(..).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.pending.lock().map_or(0, |pending| pending.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl NotificationSink for QueueSink {
    fn deliver(&self, notice: &DueNotice) -> Result<(), DeliveryError> {
        let mut pending = self
            .pending
            .lock()
            .map_err(|_| DeliveryError::new("notice queue lock is poisoned"))?;
        // A full queue rejects; the timer retries the notice later.
        if pending.len() >= self.capacity {
            return Err(DeliveryError::new(format!(
                "notice queue is full ({} pending)",
                pending.len()
            )));
        }
        pending.push_back(notice.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{DueNotice, NotificationSink, QueueSink};
    use uuid::Uuid;

    fn notice(due_at: i64) -> DueNotice {
        DueNotice {
            task_id: Uuid::new_v4(),
            task_name: "Traits".to_string(),
            due_at,
        }
    }

    #[test]
    fn queue_sink_drains_in_order() {
        let sink = QueueSink::new(8);
        sink.deliver(&notice(1)).unwrap();
        sink.deliver(&notice(2)).unwrap();

        let drained: Vec<i64> = sink.drain().into_iter().map(|n| n.due_at).collect();
        assert_eq!(drained, vec![1, 2]);
        assert!(sink.is_empty());
    }

    #[test]
    fn queue_sink_rejects_when_full() {
        let sink = QueueSink::new(1);
        sink.deliver(&notice(1)).unwrap();
        let err = sink.deliver(&notice(2)).unwrap_err();
        assert!(err.message.contains("full"));
        assert_eq!(sink.len(), 1);
    }
}
