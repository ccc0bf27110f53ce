use std::{fmt::Debug, sync::Mutex};

use async_trait::async_trait;
use eyre::Result;
use network::{HttpProvider, RequestPolicy};
use prometheus::HistogramVec;
use reqwest::Url;
use tracing::{info, warn};

use crate::Alert;

const ALERTS: &str = "api/v2/alerts";

/// Destination of alerts.
#[async_trait]
pub trait AlertSink: Send + Sync + Debug {
    /// Deliver a batch of alerts.
    async fn send_alerts(&self, alerts: Vec<Alert>) -> Result<()>;
}

/// Alertmanager API client.
///
/// Every alert is tagged with the `network` label. In dry-run mode alerts are
/// only logged.
#[derive(Debug, Clone)]
pub struct AlertmanagerClient {
    provider: Option<HttpProvider>,
    network: String,
    dry_run: bool,
}

impl AlertmanagerClient {
    /// Create a client. `hosts` may be empty only in dry-run mode.
    pub fn new(
        hosts: Vec<Url>,
        policy: RequestPolicy,
        metrics: Option<HistogramVec>,
        network: String,
        dry_run: bool,
    ) -> Result<Self> {
        let provider = if hosts.is_empty() && dry_run {
            None
        } else {
            Some(HttpProvider::new("AlertmanagerClient", hosts, policy, metrics)?)
        };
        Ok(Self { provider, network, dry_run })
    }
}

#[async_trait]
impl AlertSink for AlertmanagerClient {
    async fn send_alerts(&self, mut alerts: Vec<Alert>) -> Result<()> {
        for alert in &mut alerts {
            alert.labels.extra.insert("network".to_owned(), self.network.clone());
        }
        let body = serde_json::to_value(&alerts)?;

        match (&self.provider, self.dry_run) {
            (Some(provider), false) => {
                info!(count = alerts.len(), alerts = %body, "Sending alerts");
                provider.post_json(ALERTS, ALERTS, &body).await?;
            }
            _ => {
                warn!(alerts = %body, "Dry run mode enabled. No alerts will be sent");
            }
        }
        Ok(())
    }
}

/// Sink collecting alerts in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    alerts: Mutex<Vec<Alert>>,
}

impl MemorySink {
    /// Alerts received so far.
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().map(|alerts| alerts.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl AlertSink for MemorySink {
    async fn send_alerts(&self, alerts: Vec<Alert>) -> Result<()> {
        self.alerts.lock().map_err(|_| eyre::eyre!("alert sink poisoned"))?.extend(alerts);
        Ok(())
    }
}
