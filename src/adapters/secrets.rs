use crate::adapters::http::{self, ServiceEndpoint};
use crate::utils::error::{MigrationError, Result};
use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::Deserialize;

pub const KEY_VAULT_API_VERSION: &str = "7.4";

/// Resolves named secrets before a run starts.
#[async_trait]
pub trait SecretSource: Send + Sync {
    async fn secret(&self, name: &str) -> Result<String>;
}

/// Reads secrets from the process environment.
///
/// `SearchServiceAdminKey` is looked up as `SEARCH_SERVICE_ADMIN_KEY`.
#[derive(Debug, Default, Clone)]
pub struct EnvSecrets;

pub fn env_name(secret: &str) -> String {
    let mut name = String::with_capacity(secret.len() + 4);
    let mut previous_lower = false;
    for c in secret.chars() {
        if c == '-' || c == '.' || c == ' ' {
            name.push('_');
            previous_lower = false;
            continue;
        }
        if c.is_uppercase() && previous_lower {
            name.push('_');
        }
        previous_lower = c.is_lowercase() || c.is_ascii_digit();
        name.extend(c.to_uppercase());
    }
    name
}

#[async_trait]
impl SecretSource for EnvSecrets {
    async fn secret(&self, name: &str) -> Result<String> {
        let variable = env_name(name);
        match std::env::var(&variable) {
            Ok(value) if !value.trim().is_empty() => {
                tracing::info!("✓ Retrieved '{}' from environment variable {}", name, variable);
                Ok(value)
            }
            _ => Err(MigrationError::config(format!(
                "{} environment variable is not set",
                variable
            ))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SecretBundle {
    value: Option<String>,
}

/// Key Vault secrets read over REST with a bearer token.
pub struct KeyVaultSecrets {
    client: Client,
    vault: ServiceEndpoint,
}

impl KeyVaultSecrets {
    pub fn new(client: Client, vault: ServiceEndpoint) -> Self {
        Self { client, vault }
    }

    async fn fetch(&self, name: &str) -> Result<String> {
        let url = self.vault.url(
            &["secrets", name],
            &[("api-version", KEY_VAULT_API_VERSION)],
        );
        let response = self
            .vault
            .request(&self.client, Method::GET, url)
            .send()
            .await?;
        let response = http::check(response, &format!("secret '{}'", name)).await?;
        let bundle: SecretBundle = response.json().await?;

        bundle
            .value
            .filter(|v| !v.is_empty())
            .ok_or_else(|| MigrationError::config(format!("Secret '{}' has no value", name)))
    }
}

#[async_trait]
impl SecretSource for KeyVaultSecrets {
    async fn secret(&self, name: &str) -> Result<String> {
        tracing::info!("Retrieving '{}' from Key Vault...", name);
        match self.fetch(name).await {
            Ok(value) => {
                tracing::info!("✓ Retrieved '{}' from Key Vault", name);
                Ok(value)
            }
            Err(e @ MigrationError::ConfigError { .. }) => Err(e),
            Err(e) => Err(MigrationError::config(format!(
                "Could not read secret '{}' from {}: {}",
                name,
                self.vault.display(),
                e
            ))),
        }
    }
}
