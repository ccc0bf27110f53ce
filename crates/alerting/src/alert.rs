use std::collections::BTreeMap;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

/// Alerts resolve on their own shortly after firing.
const ALERT_LIFETIME: ChronoDuration = ChronoDuration::seconds(5);

/// Alert severity label.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Needs immediate attention
    Critical,
    /// Informational
    Info,
}

/// Alert labels, used by the routing service.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Labels {
    /// Alert name, suffixed with the creation time in milliseconds
    pub alertname: String,
    /// Severity
    pub severity: Severity,
    /// Additional routing labels
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

/// Human-readable alert content. Two alerts with equal annotations are duplicates.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
pub struct Annotations {
    /// One line summary
    pub summary: String,
    /// Markdown description
    pub description: String,
}

/// An alert in the Alertmanager `POST /api/v2/alerts` format.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    /// Firing time
    #[serde(with = "utc_z")]
    pub starts_at: DateTime<Utc>,
    /// Resolution time
    #[serde(with = "utc_z")]
    pub ends_at: DateTime<Utc>,
    /// Labels
    pub labels: Labels,
    /// Annotations
    pub annotations: Annotations,
}

/// Builds alerts of one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertBuilder {
    name: &'static str,
    severity: Severity,
}

impl AlertBuilder {
    /// Builder for alerts named `name`.
    pub const fn new(name: &'static str, severity: Severity) -> Self {
        Self { name, severity }
    }

    /// Alert name without the timestamp suffix.
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Build an alert firing now.
    pub fn build(
        &self,
        summary: impl Into<String>,
        description: impl Into<String>,
        extra: &BTreeMap<String, String>,
    ) -> Alert {
        self.build_at(Utc::now(), summary, description, extra)
    }

    /// Build an alert firing at `now`.
    pub fn build_at(
        &self,
        now: DateTime<Utc>,
        summary: impl Into<String>,
        description: impl Into<String>,
        extra: &BTreeMap<String, String>,
    ) -> Alert {
        Alert {
            starts_at: now,
            ends_at: now + ALERT_LIFETIME,
            labels: Labels {
                alertname: format!("{}{}", self.name, now.timestamp_millis()),
                severity: self.severity,
                extra: extra.clone(),
            },
            annotations: Annotations {
                summary: summary.into(),
                description: description.into(),
            },
        }
    }
}

/// ISO-8601 UTC timestamps with a `Z` suffix.
mod utc_z {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    const FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

    pub(super) fn serialize<S: Serializer>(
        value: &DateTime<Utc>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&value.format(FORMAT))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw).map(|dt| dt.with_timezone(&Utc)).map_err(D::Error::custom)
    }
}
