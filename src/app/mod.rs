// Application jobs: one orchestration per resource type.

pub mod blob_migration;
pub mod search_migration;
pub mod table_migration;

use crate::config::cli::LocalStorage;
use crate::config::toml_config::RunSettings;
use crate::core::report::persist_report;
use crate::core::runner::RunConfiguration;
use crate::domain::model::{BatchReport, MigrationUnit};
use crate::utils::error::Result;

/// Run-wide switches shared by every job.
#[derive(Debug, Clone, Default)]
pub struct JobOptions {
    pub run: RunSettings,
    pub dry_run: bool,
}

impl JobOptions {
    pub fn new(run: RunSettings, dry_run: bool) -> Self {
        Self { run, dry_run }
    }

    pub(crate) fn run_configuration(
        &self,
        resource: &str,
        source: String,
        destination: String,
    ) -> RunConfiguration {
        RunConfiguration::new(resource, self.run.concurrency)
            .with_endpoints(source, destination)
            .with_unit_timeout(self.run.unit_timeout())
            .with_monitor(self.run.monitor)
    }

    /// Writes the report under `run.report_dir` and wraps it up as the job result.
    pub(crate) async fn finish(&self, report: BatchReport, prefix: &str) -> Result<JobOutcome> {
        let storage = LocalStorage::new(&self.run.report_dir);
        let file_name = persist_report(&storage, &report, prefix).await?;
        let report_path = storage.resolve(&file_name).display().to_string();

        tracing::info!("Detailed results saved to: {}", report_path);
        Ok(JobOutcome::Finished {
            report,
            report_path,
        })
    }
}

#[derive(Debug)]
pub enum JobOutcome {
    /// Dry run: the units that would have been copied.
    Planned(Vec<MigrationUnit>),
    Finished {
        report: BatchReport,
        report_path: String,
    },
}

impl JobOutcome {
    pub fn has_failures(&self) -> bool {
        match self {
            JobOutcome::Planned(_) => false,
            JobOutcome::Finished { report, .. } => report.has_failures(),
        }
    }
}

/// First 20 characters followed by `...`, for logging credentials.
pub fn mask_secret(secret: &str) -> String {
    let shown: String = secret.chars().take(20).collect();
    format!("{}...", shown)
}

pub(crate) fn log_planned_units(units: &[MigrationUnit]) {
    tracing::info!("Dry run: {} unit(s) would be migrated", units.len());
    for unit in units {
        tracing::info!("  {} [{}]", unit.key, unit.group);
    }
}

/// Manifests are resolved against the working directory; absolute paths
/// are used as-is.
pub(crate) fn manifest_storage() -> LocalStorage {
    LocalStorage::new(".")
}
