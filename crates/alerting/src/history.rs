use std::collections::VecDeque;

use eyre::Result;
use tracing::debug;

use crate::{Alert, AlertSink, Annotations};

/// Enough for a handler to recognise repeats across consecutive cycles.
pub const KEEP_MAX_SENT_ALERTS: usize = 10;

/// FIFO of the annotations of recently sent alerts.
///
/// Owned by a single handler; the oldest entry is evicted once the capacity is exceeded.
#[derive(Debug, Clone)]
pub struct SentAlerts {
    capacity: usize,
    sent: VecDeque<Annotations>,
}

impl Default for SentAlerts {
    fn default() -> Self {
        Self::with_capacity(KEEP_MAX_SENT_ALERTS)
    }
}

impl SentAlerts {
    /// History keeping at most `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self { capacity, sent: VecDeque::with_capacity(capacity + 1) }
    }

    /// Whether an alert with the same annotations was sent recently.
    pub fn is_sent(&self, alert: &Alert) -> bool {
        self.sent.contains(&alert.annotations)
    }

    /// Record a sent alert.
    pub fn remember(&mut self, alert: &Alert) {
        self.sent.push_back(alert.annotations.clone());
        while self.sent.len() > self.capacity {
            self.sent.pop_front();
        }
    }

    /// Send `alert` unless a duplicate was sent recently. Returns whether it was sent.
    pub async fn send_once(&mut self, sink: &dyn AlertSink, alert: Alert) -> Result<bool> {
        if self.is_sent(&alert) {
            debug!(alertname = %alert.labels.alertname, "Alert already sent");
            return Ok(false);
        }
        sink.send_alerts(vec![alert.clone()]).await?;
        self.remember(&alert);
        Ok(true)
    }

    /// Number of remembered alerts.
    pub fn len(&self) -> usize {
        self.sent.len()
    }

    /// Whether nothing was sent yet.
    pub fn is_empty(&self) -> bool {
        self.sent.is_empty()
    }
}
