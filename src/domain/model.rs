use crate::utils::error::FailureKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One item to migrate: a blob, a table, or a search artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationUnit {
    pub key: String,
    pub group: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl MigrationUnit {
    pub fn new(key: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            group: group.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(name.into(), value);
        self
    }

    pub fn metadata_str(&self, name: &str) -> Option<&str> {
        self.metadata.get(name).and_then(|v| v.as_str())
    }
}

/// What an adapter reports for a unit that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    Copied { amount: u64 },
    AlreadyPresent { existing_size: Option<u64> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CopyOutcome {
    Succeeded {
        amount: u64,
        duration_seconds: f64,
    },
    Skipped {
        reason: String,
        existing_size: Option<u64>,
    },
    Failed {
        reason: String,
        kind: FailureKind,
    },
}

impl CopyOutcome {
    pub fn is_succeeded(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Succeeded { .. } => "succeeded",
            Self::Skipped { .. } => "skipped",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Unit of the `amount` carried by `Succeeded` outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Bytes,
    Entities,
    Artifacts,
}

impl MetricKind {
    pub fn describe(&self, amount: u64) -> String {
        match self {
            Self::Bytes => format!("{:.2} KB", amount as f64 / 1024.0),
            Self::Entities => format!("{} entities", amount),
            Self::Artifacts => format!("{} artifact(s)", amount),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitReport {
    pub unit: MigrationUnit,
    pub outcome: CopyOutcome,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub total: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub resource: String,
    pub source: String,
    pub destination: String,
    pub metric: MetricKind,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub total_duration_seconds: f64,
    pub counts: OutcomeCounts,
    pub total_transferred: u64,
    pub average_throughput: f64,
    pub outcomes: Vec<UnitReport>,
}
