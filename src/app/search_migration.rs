use crate::adapters::http::{Credential, ServiceEndpoint};
use crate::adapters::search::{enumerate_artifacts, ArtifactKind, SearchArtifactCopier, SearchService};
use crate::adapters::secrets::{EnvSecrets, KeyVaultSecrets, SecretSource};
use crate::app::{log_planned_units, JobOptions, JobOutcome};
use crate::config::toml_config::SearchSettings;
use crate::core::runner::BatchRunner;
use crate::core::UnitCopier;
use crate::domain::model::{BatchReport, MigrationUnit};
use crate::utils::error::Result;
use crate::utils::validation::Validate;
use chrono::Utc;
use reqwest::Client;
use std::time::Duration;

pub const REPORT_PREFIX: &str = "search";

/// Secrets the target side needs before any artifact is written.
#[derive(Debug, Clone)]
pub struct TargetSecrets {
    pub admin_key: String,
    pub connection_string: String,
}

/// Explicit settings win; otherwise the Key Vault when configured, else the
/// environment.
pub async fn resolve_target_secrets(client: &Client, settings: &SearchSettings) -> Result<TargetSecrets> {
    let store: Box<dyn SecretSource> = match &settings.key_vault {
        Some(vault) => Box::new(KeyVaultSecrets::new(
            client.clone(),
            ServiceEndpoint::new(&vault.url, Credential::Bearer(vault.access_token.clone()))?,
        )),
        None => Box::new(EnvSecrets),
    };
    let (key_name, connection_name) = match &settings.key_vault {
        Some(vault) => (
            vault.target_key_secret.as_str(),
            vault.connection_string_secret.as_str(),
        ),
        None => ("TargetSearchServiceKey", "StorageConnectionString"),
    };

    let admin_key = match settings.target_key.as_str() {
        "" => store.secret(key_name).await?,
        key => key.to_string(),
    };
    let connection_string = match settings.connection_string.as_str() {
        "" => store.secret(connection_name).await?,
        value => value.to_string(),
    };

    Ok(TargetSecrets {
        admin_key,
        connection_string,
    })
}

pub async fn run(client: &Client, settings: &SearchSettings, options: &JobOptions) -> Result<JobOutcome> {
    tracing::info!("Starting Azure Cognitive Search migration...");
    settings.validate()?;

    let mut source = SearchService::new(
        client.clone(),
        ServiceEndpoint::new(
            &settings.source_endpoint,
            Credential::ApiKey(settings.source_key.clone()),
        )?,
    );
    if !settings.api_version.is_empty() {
        source = source.with_api_version(&settings.api_version);
    }

    tracing::info!("Source: {}", source.display());
    tracing::info!("Target: {}", settings.target_endpoint);

    // Every listing has to succeed before anything is written.
    let mut phases: Vec<(ArtifactKind, Vec<MigrationUnit>)> = Vec::new();
    for kind in ArtifactKind::PHASES {
        let units = enumerate_artifacts(&source, kind).await?;
        phases.push((kind, units));
    }

    if options.dry_run {
        let units: Vec<MigrationUnit> = phases.into_iter().flat_map(|(_, units)| units).collect();
        log_planned_units(&units);
        return Ok(JobOutcome::Planned(units));
    }

    let secrets = resolve_target_secrets(client, settings).await?;
    let mut target = SearchService::new(
        client.clone(),
        ServiceEndpoint::new(
            &settings.target_endpoint,
            Credential::ApiKey(secrets.admin_key.clone()),
        )?,
    );
    if !settings.api_version.is_empty() {
        target = target.with_api_version(&settings.api_version);
    }
    tracing::info!("✓ Search clients initialized successfully");

    let runner = BatchRunner::new(options.run_configuration(
        REPORT_PREFIX,
        source.display(),
        target.display(),
    ));
    let copier = SearchArtifactCopier::new(
        target.clone(),
        Some(secrets.connection_string),
        options.run.skip_existing,
    );

    let started = Utc::now();
    let mut merged = BatchReport::assemble(
        runner.config(),
        copier.metric(),
        started,
        started,
        Duration::ZERO,
        Vec::new(),
    );
    for (kind, units) in &phases {
        tracing::info!("=== Migrating {} ===", kind.collection());
        merged.absorb(runner.run(units, &copier).await?);
    }

    verify_target(&target).await;

    options.finish(merged, REPORT_PREFIX).await
}

/// Lists what the target holds after the run. Listing errors are logged only.
pub async fn verify_target(target: &SearchService) {
    tracing::info!("=== Verifying Migration ===");
    for kind in ArtifactKind::PHASES {
        match target.list_names(kind).await {
            Ok(names) => {
                tracing::info!("{}:", kind.collection());
                for name in names {
                    tracing::info!("  - {}", name);
                }
            }
            Err(e) => tracing::warn!("Could not list {} on target: {}", kind.collection(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_explicit_secrets_skip_lookup() {
        let settings = SearchSettings {
            target_key: "admin".to_string(),
            connection_string: "AccountName=dst".to_string(),
            ..SearchSettings::default()
        };

        let secrets = resolve_target_secrets(&Client::new(), &settings).await.unwrap();

        assert_eq!(secrets.admin_key, "admin");
        assert_eq!(secrets.connection_string, "AccountName=dst");
    }

    #[tokio::test]
    async fn test_missing_secret_in_environment_is_fatal() {
        std::env::remove_var("TARGET_SEARCH_SERVICE_KEY");
        let settings = SearchSettings {
            connection_string: "AccountName=dst".to_string(),
            ..SearchSettings::default()
        };

        let err = resolve_target_secrets(&Client::new(), &settings)
            .await
            .unwrap_err();

        assert!(err.is_fatal());
        assert!(err.to_string().contains("TARGET_SEARCH_SERVICE_KEY"));
    }
}
