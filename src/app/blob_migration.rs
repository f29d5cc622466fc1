use crate::adapters::blob::{BlobCopier, BlobCopyOptions};
use crate::adapters::http::{Credential, ServiceEndpoint};
use crate::app::{log_planned_units, manifest_storage, mask_secret, JobOptions, JobOutcome};
use crate::config::toml_config::BlobSettings;
use crate::core::manifest::load_blob_manifest;
use crate::core::runner::BatchRunner;
use crate::utils::error::Result;
use crate::utils::validation::Validate;
use reqwest::Client;
use std::time::Duration;

pub const REPORT_PREFIX: &str = "blob";

pub async fn run(client: &Client, settings: &BlobSettings, options: &JobOptions) -> Result<JobOutcome> {
    tracing::info!("=== Azure Blob Storage Migration ===");
    settings.validate()?;

    let units = load_blob_manifest(
        &manifest_storage(),
        &settings.manifest,
        &settings.manifest_rules(),
    )
    .await?;

    let source = ServiceEndpoint::new(
        &settings.source_url(),
        Credential::Sas(settings.source_sas.clone()),
    )?;
    let destination = ServiceEndpoint::new(
        &settings.destination_url(),
        Credential::Sas(settings.destination_sas.clone()),
    )?;

    tracing::info!("=== Configuration Summary ===");
    tracing::info!("Source:");
    tracing::info!("  Storage Account: {}", source.display());
    tracing::info!("  SAS Token: {}", mask_secret(&settings.source_sas));
    tracing::info!("Destination:");
    tracing::info!("  Storage Account: {}", destination.display());
    tracing::info!("  SAS Token: {}", mask_secret(&settings.destination_sas));
    tracing::info!("Total blobs to migrate: {}", units.len());
    tracing::info!("Max concurrent migrations: {}", options.run.concurrency);

    if options.dry_run {
        log_planned_units(&units);
        return Ok(JobOutcome::Planned(units));
    }

    let runner = BatchRunner::new(options.run_configuration(
        REPORT_PREFIX,
        source.display(),
        destination.display(),
    ));
    let copier = BlobCopier::new(
        client.clone(),
        source,
        destination,
        BlobCopyOptions {
            blob_suffix: settings.blob_suffix.clone(),
            poll_interval: Duration::from_millis(settings.copy_poll_interval_ms),
            skip_existing: options.run.skip_existing,
            ..BlobCopyOptions::default()
        },
    );

    let report = runner.run(&units, &copier).await?;
    options.finish(report, REPORT_PREFIX).await
}
