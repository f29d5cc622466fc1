use crate::adapters::http::{self, ServiceEndpoint};
use crate::utils::error::{MigrationError, Result};
use reqwest::{Client, Method};
use serde_json::{json, Value};
use std::time::Duration;

pub const STORAGE_MANAGEMENT_API_VERSION: &str = "2023-01-01";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageAccountSpec {
    pub subscription_id: String,
    pub resource_group: String,
    pub account_name: String,
    pub location: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionStatus {
    Existing,
    Created,
}

/// Makes sure the destination storage account exists before a table run.
pub struct StorageAccountProvisioner {
    client: Client,
    management: ServiceEndpoint,
    poll_interval: Duration,
    max_polls: u32,
}

impl StorageAccountProvisioner {
    pub fn new(client: Client, management: ServiceEndpoint) -> Self {
        Self {
            client,
            management,
            poll_interval: Duration::from_secs(5),
            max_polls: 120,
        }
    }

    pub fn with_polling(mut self, interval: Duration, max_polls: u32) -> Self {
        self.poll_interval = interval;
        self.max_polls = max_polls;
        self
    }

    fn account_url(&self, spec: &StorageAccountSpec) -> url::Url {
        self.management.url(
            &[
                "subscriptions",
                spec.subscription_id.as_str(),
                "resourceGroups",
                spec.resource_group.as_str(),
                "providers",
                "Microsoft.Storage",
                "storageAccounts",
                spec.account_name.as_str(),
            ],
            &[("api-version", STORAGE_MANAGEMENT_API_VERSION)],
        )
    }

    /// Returns the account's provisioning state, or `None` when it does not exist.
    async fn lookup(&self, spec: &StorageAccountSpec) -> Result<Option<String>> {
        let response = self
            .management
            .request(&self.client, Method::GET, self.account_url(spec))
            .send()
            .await?;

        match http::check(response, &account_label(spec)).await {
            Ok(response) => {
                let body: Value = response.json().await?;
                Ok(Some(provisioning_state(&body)))
            }
            Err(MigrationError::UnitNotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create(&self, spec: &StorageAccountSpec) -> Result<String> {
        let body = json!({
            "location": spec.location,
            "kind": "StorageV2",
            "sku": { "name": "Standard_LRS" },
            "properties": {
                "minimumTlsVersion": "TLS1_2",
                "allowBlobPublicAccess": false,
                "supportsHttpsTrafficOnly": true
            }
        });

        let response = self
            .management
            .request(&self.client, Method::PUT, self.account_url(spec))
            .json(&body)
            .send()
            .await?;
        let response = http::check(response, &account_label(spec)).await?;

        // 202 carries no body while the account is still being created.
        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(String::new());
        }
        let body: Value = serde_json::from_str(&text)?;
        Ok(provisioning_state(&body))
    }

    async fn wait_until_succeeded(&self, spec: &StorageAccountSpec) -> Result<()> {
        for _ in 0..self.max_polls {
            tokio::time::sleep(self.poll_interval).await;
            match self.lookup(spec).await?.as_deref() {
                Some("Succeeded") => return Ok(()),
                Some("Failed") => {
                    return Err(MigrationError::transfer(
                        account_label(spec),
                        "provisioning failed",
                    ))
                }
                state => tracing::debug!("  Provisioning state: {:?}", state),
            }
        }
        Err(MigrationError::UnitTimeout {
            resource: account_label(spec),
            seconds: self.poll_interval.as_secs() * self.max_polls as u64,
        })
    }

    pub async fn ensure_exists(&self, spec: &StorageAccountSpec) -> Result<ProvisionStatus> {
        self.ensure(spec).await.map_err(|e| {
            MigrationError::config(format!(
                "Could not provision destination storage account '{}': {}",
                spec.account_name, e
            ))
        })
    }

    async fn ensure(&self, spec: &StorageAccountSpec) -> Result<ProvisionStatus> {
        tracing::info!("Checking if storage account '{}' exists...", spec.account_name);

        if self.lookup(spec).await?.is_some() {
            tracing::info!("✓ Storage account '{}' already exists", spec.account_name);
            return Ok(ProvisionStatus::Existing);
        }

        tracing::info!(
            "Creating storage account '{}' in {} ({})...",
            spec.account_name,
            spec.resource_group,
            spec.location
        );

        if self.create(spec).await? != "Succeeded" {
            self.wait_until_succeeded(spec).await?;
        }

        tracing::info!("✓ Storage account '{}' created", spec.account_name);
        Ok(ProvisionStatus::Created)
    }
}

fn account_label(spec: &StorageAccountSpec) -> String {
    format!("storage account '{}'", spec.account_name)
}

fn provisioning_state(body: &Value) -> String {
    body.pointer("/properties/provisioningState")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}
