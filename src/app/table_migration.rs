use crate::adapters::http::{Credential, ServiceEndpoint};
use crate::adapters::provision::{StorageAccountProvisioner, StorageAccountSpec};
use crate::adapters::table::{TableCopier, TableCopyOptions};
use crate::app::{log_planned_units, manifest_storage, JobOptions, JobOutcome};
use crate::config::toml_config::{ProvisionSettings, TableSettings};
use crate::core::manifest::load_table_manifest;
use crate::core::runner::BatchRunner;
use crate::utils::error::Result;
use crate::utils::validation::Validate;
use reqwest::Client;

pub const REPORT_PREFIX: &str = "table";

fn credential(sas: &str, access_token: &str) -> Credential {
    if sas.is_empty() {
        Credential::Bearer(access_token.to_string())
    } else {
        Credential::Sas(sas.to_string())
    }
}

async fn ensure_destination_account(
    client: &Client,
    settings: &TableSettings,
    provision: &ProvisionSettings,
) -> Result<()> {
    let management = ServiceEndpoint::new(
        &provision.management_endpoint,
        Credential::Bearer(settings.access_token.clone()),
    )?;
    let spec = StorageAccountSpec {
        subscription_id: provision.subscription_id.clone(),
        resource_group: provision.resource_group.clone(),
        account_name: settings.destination_account.clone(),
        location: provision.location.clone(),
    };

    StorageAccountProvisioner::new(client.clone(), management)
        .ensure_exists(&spec)
        .await?;
    Ok(())
}

pub async fn run(client: &Client, settings: &TableSettings, options: &JobOptions) -> Result<JobOutcome> {
    tracing::info!("=== Azure Table Storage Migration ===");
    settings.validate()?;

    let units = load_table_manifest(&manifest_storage(), &settings.manifest).await?;

    let source = ServiceEndpoint::new(
        &settings.source_url(),
        credential(&settings.source_sas, &settings.access_token),
    )?;
    let destination = ServiceEndpoint::new(
        &settings.destination_url(),
        credential(&settings.destination_sas, &settings.access_token),
    )?;

    tracing::info!("=== Configuration Summary ===");
    tracing::info!("Source:");
    if !settings.source_subscription_id.is_empty() {
        tracing::info!("  Subscription ID: {}", settings.source_subscription_id);
        tracing::info!("  Resource Group: {}", settings.source_resource_group);
    }
    tracing::info!("  Storage Account: {}", source.display());
    tracing::info!("Destination:");
    if let Some(provision) = &settings.provision {
        tracing::info!("  Subscription ID: {}", provision.subscription_id);
        tracing::info!("  Resource Group: {}", provision.resource_group);
        tracing::info!("  Location: {}", provision.location);
    }
    tracing::info!("  Storage Account: {}", destination.display());
    tracing::info!(
        "Tables to migrate: {}",
        units.iter().map(|u| u.key.as_str()).collect::<Vec<_>>().join(", ")
    );
    tracing::info!("Max concurrent migrations: {}", options.run.concurrency);

    if options.dry_run {
        log_planned_units(&units);
        return Ok(JobOutcome::Planned(units));
    }

    if let Some(provision) = &settings.provision {
        ensure_destination_account(client, settings, provision).await?;
    }

    let runner = BatchRunner::new(options.run_configuration(
        REPORT_PREFIX,
        source.display(),
        destination.display(),
    ));
    let copier = TableCopier::new(
        client.clone(),
        source,
        destination,
        TableCopyOptions {
            page_size: settings.page_size,
            skip_existing: options.run.skip_existing,
        },
    );

    let report = runner.run(&units, &copier).await?;
    options.finish(report, REPORT_PREFIX).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sas_wins_over_bearer_token() {
        assert!(matches!(credential("sv=1", "token"), Credential::Sas(_)));
        assert!(matches!(credential("", "token"), Credential::Bearer(_)));
    }
}
