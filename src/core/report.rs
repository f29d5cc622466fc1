use crate::core::runner::RunConfiguration;
use crate::core::Storage;
use crate::domain::model::{BatchReport, CopyOutcome, MetricKind, OutcomeCounts, UnitReport};
use crate::utils::error::Result;
use chrono::{DateTime, Utc};
use std::time::Duration;

impl BatchReport {
    pub(crate) fn assemble(
        config: &RunConfiguration,
        metric: MetricKind,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        elapsed: Duration,
        outcomes: Vec<UnitReport>,
    ) -> Self {
        let mut report = Self {
            resource: config.resource.clone(),
            source: config.source.clone(),
            destination: config.destination.clone(),
            metric,
            start_time,
            end_time,
            total_duration_seconds: elapsed.as_secs_f64(),
            counts: OutcomeCounts::default(),
            total_transferred: 0,
            average_throughput: 0.0,
            outcomes,
        };
        report.recompute();
        report
    }

    /// Appends the outcomes of a later phase of the same migration.
    pub fn absorb(&mut self, later: BatchReport) {
        self.end_time = later.end_time;
        self.total_duration_seconds += later.total_duration_seconds;
        self.outcomes.extend(later.outcomes);
        self.recompute();
    }

    fn recompute(&mut self) {
        let mut counts = OutcomeCounts {
            total: self.outcomes.len(),
            ..OutcomeCounts::default()
        };
        let mut transferred = 0u64;
        let mut busy_seconds = 0f64;

        for entry in &self.outcomes {
            match &entry.outcome {
                CopyOutcome::Succeeded {
                    amount,
                    duration_seconds,
                } => {
                    counts.succeeded += 1;
                    transferred += amount;
                    busy_seconds += duration_seconds;
                }
                CopyOutcome::Skipped { .. } => counts.skipped += 1,
                CopyOutcome::Failed { .. } => counts.failed += 1,
            }
        }

        self.counts = counts;
        self.total_transferred = transferred;
        self.average_throughput = if transferred > 0 && busy_seconds > 0.0 {
            transferred as f64 / busy_seconds
        } else {
            0.0
        };
    }

    pub fn has_failures(&self) -> bool {
        self.counts.failed > 0
    }

    pub fn failures(&self) -> impl Iterator<Item = &UnitReport> {
        self.outcomes.iter().filter(|o| o.outcome.is_failed())
    }

    /// `<prefix>-migration-results-<start time>.json`, with `:` and `.`
    /// replaced so the name is valid on every filesystem.
    pub fn file_name(&self, prefix: &str) -> String {
        let stamp = self
            .start_time
            .to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
            .replace([':', '.'], "-");
        format!("{}-migration-results-{}.json", prefix, stamp)
    }

    /// Human-readable summary, one line per entry.
    pub fn summary_lines(&self) -> Vec<String> {
        let minutes = (self.total_duration_seconds / 60.0).floor();
        let seconds = self.total_duration_seconds % 60.0;
        let mut lines = vec![
            "=== Migration Summary ===".to_string(),
            format!("Resource: {}", self.resource),
            format!("Migration completed at: {}", self.end_time.to_rfc3339()),
            format!("Total migration time: {}m {:.2}s", minutes, seconds),
            format!("Total units processed: {}", self.counts.total),
            format!("Successful: {}", self.counts.succeeded),
            format!("Skipped (already exists): {}", self.counts.skipped),
            format!("Failed: {}", self.counts.failed),
            format!(
                "Total transferred: {}",
                self.metric.describe(self.total_transferred)
            ),
        ];

        if self.average_throughput > 0.0 {
            lines.push(format!(
                "Average throughput: {:.2} {}/second",
                self.average_throughput,
                match self.metric {
                    MetricKind::Bytes => "bytes",
                    MetricKind::Entities => "entities",
                    MetricKind::Artifacts => "artifacts",
                }
            ));
        }

        let sections: [(&str, fn(&CopyOutcome) -> bool); 3] = [
            ("=== Successful Migrations ===", CopyOutcome::is_succeeded),
            ("=== Skipped Migrations (Already Exist) ===", CopyOutcome::is_skipped),
            ("=== Failed Migrations ===", CopyOutcome::is_failed),
        ];

        for (title, wanted) in sections {
            let mut entries = self.outcomes.iter().filter(|o| wanted(&o.outcome)).peekable();
            if entries.peek().is_none() {
                continue;
            }
            lines.push(String::new());
            lines.push(title.to_string());
            for entry in entries {
                lines.push(self.describe_entry(entry));
            }
        }

        lines
    }

    fn describe_entry(&self, entry: &UnitReport) -> String {
        let label = format!("  {} [{}]", entry.unit.key, entry.unit.group);
        match &entry.outcome {
            CopyOutcome::Succeeded {
                amount,
                duration_seconds,
            } => format!(
                "{}: {} in {:.2}s",
                label,
                self.metric.describe(*amount),
                duration_seconds
            ),
            CopyOutcome::Skipped { existing_size, .. } => match existing_size {
                Some(size) => format!("{}: {}", label, self.metric.describe(*size)),
                None => label,
            },
            CopyOutcome::Failed { reason, .. } => format!("{}: {}", label, reason),
        }
    }
}

/// Writes the report as pretty JSON and returns the file name used.
pub async fn persist_report<S: Storage>(
    storage: &S,
    report: &BatchReport,
    prefix: &str,
) -> Result<String> {
    let file_name = report.file_name(prefix);
    let json = serde_json::to_vec_pretty(report)?;

    tracing::debug!("Writing report ({} bytes) to {}", json.len(), file_name);
    storage.write_file(&file_name, &json).await?;

    Ok(file_name)
}
