use crate::core::manifest::CsvManifestRules;
use crate::utils::error::{MigrationError, Result};
use crate::utils::validation::{
    validate_file_extension, validate_non_empty_string, validate_path, validate_positive_number,
    validate_range, validate_required_field, validate_resolved, validate_url, Validate,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MigrationConfig {
    #[serde(default)]
    pub run: RunSettings,
    pub blob: Option<BlobSettings>,
    pub table: Option<TableSettings>,
    pub search: Option<SearchSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    pub concurrency: usize,
    /// 0 表示不限制單一項目的執行時間
    pub unit_timeout_seconds: u64,
    pub request_timeout_seconds: u64,
    pub report_dir: String,
    pub skip_existing: bool,
    pub monitor: bool,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            concurrency: 5,
            unit_timeout_seconds: 0,
            request_timeout_seconds: 300,
            report_dir: ".".to_string(),
            skip_existing: true,
            monitor: false,
        }
    }
}

impl RunSettings {
    pub fn unit_timeout(&self) -> Option<Duration> {
        (self.unit_timeout_seconds > 0).then(|| Duration::from_secs(self.unit_timeout_seconds))
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_seconds > 0).then(|| Duration::from_secs(self.request_timeout_seconds))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlobSettings {
    pub manifest: String,
    pub source_account: String,
    pub destination_account: String,
    pub source_sas: String,
    pub destination_sas: String,
    /// Overrides `https://<account>.blob.core.windows.net`.
    pub source_endpoint: String,
    pub destination_endpoint: String,
    pub blob_suffix: String,
    pub key_column: String,
    pub group_column: String,
    pub excluded_groups: Vec<String>,
    pub placeholder_keys: Vec<String>,
    pub copy_poll_interval_ms: u64,
}

impl Default for BlobSettings {
    fn default() -> Self {
        let rules = CsvManifestRules::default();
        Self {
            manifest: "./AthenaTableData.csv".to_string(),
            source_account: String::new(),
            destination_account: String::new(),
            source_sas: String::new(),
            destination_sas: String::new(),
            source_endpoint: String::new(),
            destination_endpoint: String::new(),
            blob_suffix: ".json".to_string(),
            key_column: rules.key_column,
            group_column: rules.group_column,
            excluded_groups: rules.excluded_groups,
            placeholder_keys: rules.placeholder_keys,
            copy_poll_interval_ms: 1000,
        }
    }
}

impl BlobSettings {
    pub fn manifest_rules(&self) -> CsvManifestRules {
        CsvManifestRules {
            key_column: self.key_column.clone(),
            group_column: self.group_column.clone(),
            excluded_groups: self.excluded_groups.clone(),
            placeholder_keys: self.placeholder_keys.clone(),
        }
    }

    pub fn source_url(&self) -> String {
        account_url(&self.source_endpoint, &self.source_account, "blob")
    }

    pub fn destination_url(&self) -> String {
        account_url(&self.destination_endpoint, &self.destination_account, "blob")
    }
}

impl Validate for BlobSettings {
    fn validate(&self) -> Result<()> {
        validate_path("blob.manifest", &self.manifest)?;
        validate_file_extension("blob.manifest", &self.manifest, &["csv"])?;
        validate_account("blob.source_account", &self.source_account, &self.source_endpoint)?;
        validate_account(
            "blob.destination_account",
            &self.destination_account,
            &self.destination_endpoint,
        )?;
        validate_resolved("blob.source_sas", &self.source_sas)?;
        validate_resolved("blob.destination_sas", &self.destination_sas)?;
        validate_url("blob.source_endpoint", &self.source_url())?;
        validate_url("blob.destination_endpoint", &self.destination_url())?;
        validate_non_empty_string("blob.key_column", &self.key_column)?;
        validate_non_empty_string("blob.group_column", &self.group_column)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TableSettings {
    pub manifest: String,
    pub source_subscription_id: String,
    pub source_resource_group: String,
    pub source_account: String,
    pub destination_account: String,
    pub source_endpoint: String,
    pub destination_endpoint: String,
    /// Used when non-empty; otherwise requests carry `access_token`.
    pub source_sas: String,
    pub destination_sas: String,
    pub access_token: String,
    pub page_size: usize,
    pub provision: Option<ProvisionSettings>,
}

impl Default for TableSettings {
    fn default() -> Self {
        Self {
            manifest: "./AthenaSchema.json".to_string(),
            source_subscription_id: String::new(),
            source_resource_group: String::new(),
            source_account: String::new(),
            destination_account: String::new(),
            source_endpoint: String::new(),
            destination_endpoint: String::new(),
            source_sas: String::new(),
            destination_sas: String::new(),
            access_token: String::new(),
            page_size: 100,
            provision: None,
        }
    }
}

impl TableSettings {
    pub fn source_url(&self) -> String {
        account_url(&self.source_endpoint, &self.source_account, "table")
    }

    pub fn destination_url(&self) -> String {
        account_url(&self.destination_endpoint, &self.destination_account, "table")
    }
}

impl Validate for TableSettings {
    fn validate(&self) -> Result<()> {
        validate_path("table.manifest", &self.manifest)?;
        validate_file_extension("table.manifest", &self.manifest, &["json"])?;
        validate_account("table.source_account", &self.source_account, &self.source_endpoint)?;
        validate_account(
            "table.destination_account",
            &self.destination_account,
            &self.destination_endpoint,
        )?;
        validate_url("table.source_endpoint", &self.source_url())?;
        validate_url("table.destination_endpoint", &self.destination_url())?;
        // Table service caps $top at 1000
        validate_range("table.page_size", self.page_size, 1, 1000)?;

        // 沒有 SAS 的一側需要 bearer token
        if self.source_sas.is_empty() || self.destination_sas.is_empty() {
            validate_resolved("table.access_token", &self.access_token)?;
        }

        if let Some(provision) = &self.provision {
            provision.validate()?;
            validate_resolved("table.access_token", &self.access_token)?;
        }
        Ok(())
    }
}

/// Destination storage account to create when it does not exist yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionSettings {
    pub subscription_id: String,
    pub resource_group: String,
    pub location: String,
    pub management_endpoint: String,
}

impl Default for ProvisionSettings {
    fn default() -> Self {
        Self {
            subscription_id: String::new(),
            resource_group: String::new(),
            location: "eastus".to_string(),
            management_endpoint: "https://management.azure.com".to_string(),
        }
    }
}

impl Validate for ProvisionSettings {
    fn validate(&self) -> Result<()> {
        validate_resolved("table.provision.subscription_id", &self.subscription_id)?;
        validate_resolved("table.provision.resource_group", &self.resource_group)?;
        validate_non_empty_string("table.provision.location", &self.location)?;
        validate_url(
            "table.provision.management_endpoint",
            &self.management_endpoint,
        )?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    pub source_endpoint: String,
    pub target_endpoint: String,
    pub source_key: String,
    /// Resolved from `key_vault`, or the environment, when empty.
    pub target_key: String,
    /// Resolved from `key_vault`, or the environment, when empty.
    pub connection_string: String,
    pub api_version: String,
    pub key_vault: Option<KeyVaultSettings>,
}

impl Validate for SearchSettings {
    fn validate(&self) -> Result<()> {
        validate_url("search.source_endpoint", &self.source_endpoint)?;
        validate_url("search.target_endpoint", &self.target_endpoint)?;
        validate_resolved("search.source_key", &self.source_key)?;

        // target_key 與 connection_string 留空時改由 Key Vault 或環境變數取得
        if let Some(vault) = &self.key_vault {
            vault.validate()?;
        }
        if self.target_key.contains("${") {
            validate_resolved("search.target_key", &self.target_key)?;
        }
        if self.connection_string.contains("${") {
            validate_resolved("search.connection_string", &self.connection_string)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyVaultSettings {
    pub url: String,
    pub access_token: String,
    pub target_key_secret: String,
    pub connection_string_secret: String,
}

impl Default for KeyVaultSettings {
    fn default() -> Self {
        Self {
            url: String::new(),
            access_token: String::new(),
            target_key_secret: "SearchServiceAdminKey".to_string(),
            connection_string_secret: "StorageAccountConnectionString".to_string(),
        }
    }
}

impl Validate for KeyVaultSettings {
    fn validate(&self) -> Result<()> {
        validate_url("search.key_vault.url", &self.url)?;
        validate_resolved("search.key_vault.access_token", &self.access_token)?;
        validate_non_empty_string("search.key_vault.target_key_secret", &self.target_key_secret)?;
        validate_non_empty_string(
            "search.key_vault.connection_string_secret",
            &self.connection_string_secret,
        )?;
        Ok(())
    }
}

fn account_url(endpoint: &str, account: &str, service: &str) -> String {
    if endpoint.is_empty() {
        format!("https://{}.{}.core.windows.net", account, service)
    } else {
        endpoint.to_string()
    }
}

fn validate_account(field: &str, account: &str, endpoint: &str) -> Result<()> {
    if endpoint.is_empty() {
        validate_resolved(field, account)?;
    }
    Ok(())
}

impl MigrationConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(|e| {
            MigrationError::config(format!(
                "Could not read config file '{}': {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        Ok(toml::from_str(&processed_content)?)
    }

    /// 替換環境變數 (例如 ${DEST_SAS})，未設定的變數保持原樣，交由驗證階段回報
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = Regex::new(r"\$\{([^}]+)\}")
            .map_err(|e| MigrationError::config(format!("Invalid substitution pattern: {}", e)))?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    /// Builds every section from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).unwrap_or_default();
        let number = |name: &str, default: u64| -> Result<u64> {
            match lookup(name) {
                Some(value) if !value.trim().is_empty() => {
                    value.trim().parse().map_err(|_| MigrationError::InvalidConfigValueError {
                        field: name.to_string(),
                        value: value.clone(),
                        reason: "Expected a non-negative integer".to_string(),
                    })
                }
                _ => Ok(default),
            }
        };

        let defaults = RunSettings::default();
        let run = RunSettings {
            concurrency: number("MAX_CONCURRENCY", defaults.concurrency as u64)? as usize,
            unit_timeout_seconds: number("UNIT_TIMEOUT_SECONDS", defaults.unit_timeout_seconds)?,
            request_timeout_seconds: number(
                "REQUEST_TIMEOUT_SECONDS",
                defaults.request_timeout_seconds,
            )?,
            report_dir: lookup("REPORT_DIR").unwrap_or(defaults.report_dir),
            skip_existing: defaults.skip_existing,
            monitor: defaults.monitor,
        };

        let blob = BlobSettings {
            manifest: lookup("BLOB_MANIFEST").unwrap_or_else(|| BlobSettings::default().manifest),
            source_account: var("SOURCE_STORAGE_ACCOUNT"),
            destination_account: var("DEST_STORAGE_ACCOUNT"),
            source_sas: var("SOURCE_SAS"),
            destination_sas: var("DEST_SAS"),
            ..BlobSettings::default()
        };

        let provision = lookup("DEST_SUBSCRIPTION_ID")
            .filter(|s| !s.is_empty())
            .map(|subscription_id| ProvisionSettings {
                subscription_id,
                resource_group: var("DEST_RESOURCE_GROUP"),
                location: lookup("DEST_LOCATION")
                    .filter(|l| !l.is_empty())
                    .unwrap_or_else(|| ProvisionSettings::default().location),
                ..ProvisionSettings::default()
            });

        let table = TableSettings {
            manifest: lookup("TABLE_MANIFEST")
                .unwrap_or_else(|| TableSettings::default().manifest),
            source_subscription_id: var("SOURCE_SUBSCRIPTION_ID"),
            source_resource_group: var("SOURCE_RESOURCE_GROUP"),
            source_account: var("SOURCE_STORAGE_ACCOUNT"),
            destination_account: var("DEST_STORAGE_ACCOUNT"),
            source_sas: var("SOURCE_TABLE_SAS"),
            destination_sas: var("DEST_TABLE_SAS"),
            access_token: var("AZURE_ACCESS_TOKEN"),
            provision,
            ..TableSettings::default()
        };

        let key_vault = lookup("KEY_VAULT_URL")
            .filter(|u| !u.is_empty())
            .map(|url| KeyVaultSettings {
                url,
                access_token: lookup("KEY_VAULT_ACCESS_TOKEN")
                    .unwrap_or_else(|| var("AZURE_ACCESS_TOKEN")),
                ..KeyVaultSettings::default()
            });

        let search = SearchSettings {
            source_endpoint: var("SOURCE_SEARCH_ENDPOINT"),
            target_endpoint: var("TARGET_SEARCH_ENDPOINT"),
            source_key: var("SOURCE_SEARCH_SERVICE_KEY"),
            target_key: var("TARGET_SEARCH_SERVICE_KEY"),
            connection_string: var("STORAGE_CONNECTION_STRING"),
            api_version: String::new(),
            key_vault,
        };

        Ok(Self {
            run,
            blob: Some(blob),
            table: Some(table),
            search: Some(search),
        })
    }

    pub fn blob(&self) -> Result<&BlobSettings> {
        let settings = validate_required_field("blob", &self.blob)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn table(&self) -> Result<&TableSettings> {
        let settings = validate_required_field("table", &self.table)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn search(&self) -> Result<&SearchSettings> {
        let settings = validate_required_field("search", &self.search)?;
        settings.validate()?;
        Ok(settings)
    }
}

impl Validate for MigrationConfig {
    fn validate(&self) -> Result<()> {
        validate_positive_number("run.concurrency", self.run.concurrency, 1)?;
        validate_path("run.report_dir", &self.run.report_dir)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_parse_blob_config() {
        let toml_content = r#"
[run]
concurrency = 8
unit_timeout_seconds = 120

[blob]
manifest = "./data/AthenaTableData.csv"
source_account = "srcacct"
destination_account = "dstacct"
source_sas = "sv=1&sig=a"
destination_sas = "sv=1&sig=b"
excluded_groups = ["ATS", "ARCHIVE"]
"#;

        let config = MigrationConfig::from_toml_str(toml_content).unwrap();
        let blob = config.blob().unwrap();

        assert_eq!(config.run.concurrency, 8);
        assert_eq!(config.run.unit_timeout(), Some(Duration::from_secs(120)));
        assert!(config.run.skip_existing);
        assert_eq!(blob.source_url(), "https://srcacct.blob.core.windows.net");
        assert_eq!(blob.blob_suffix, ".json");
        assert_eq!(blob.manifest_rules().excluded_groups, vec!["ATS", "ARCHIVE"]);
        assert!(config.table().is_err());
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("AZMIGRATE_TEST_DEST_SAS", "sv=2&sig=xyz");

        let toml_content = r#"
[blob]
source_account = "src"
destination_account = "dst"
source_sas = "sv=1"
destination_sas = "${AZMIGRATE_TEST_DEST_SAS}"
"#;

        let config = MigrationConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(config.blob().unwrap().destination_sas, "sv=2&sig=xyz");

        std::env::remove_var("AZMIGRATE_TEST_DEST_SAS");
    }

    #[test]
    fn test_unresolved_placeholder_fails_validation() {
        let toml_content = r#"
[blob]
source_account = "src"
destination_account = "dst"
source_sas = "${AZMIGRATE_TEST_NEVER_SET}"
destination_sas = "sv=1"
"#;

        let config = MigrationConfig::from_toml_str(toml_content).unwrap();
        let err = config.blob().unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("blob.source_sas"));
    }

    #[test]
    fn test_from_lookup_uses_script_variable_names() {
        let config = MigrationConfig::from_lookup(lookup_from(&[
            ("SOURCE_STORAGE_ACCOUNT", "srcacct"),
            ("DEST_STORAGE_ACCOUNT", "dstacct"),
            ("SOURCE_SAS", "sv=1"),
            ("DEST_SAS", "sv=2"),
            ("MAX_CONCURRENCY", "3"),
            ("AZURE_ACCESS_TOKEN", "token"),
            ("DEST_SUBSCRIPTION_ID", "sub"),
            ("DEST_RESOURCE_GROUP", "rg"),
        ]))
        .unwrap();

        assert_eq!(config.run.concurrency, 3);
        assert_eq!(config.blob().unwrap().destination_sas, "sv=2");

        let table = config.table().unwrap();
        assert_eq!(table.destination_url(), "https://dstacct.table.core.windows.net");
        let provision = table.provision.as_ref().unwrap();
        assert_eq!(provision.location, "eastus");
        assert_eq!(provision.resource_group, "rg");

        // search needs its own endpoints
        assert!(config.search().is_err());
    }

    #[test]
    fn test_from_lookup_rejects_bad_numbers() {
        let err = MigrationConfig::from_lookup(lookup_from(&[("MAX_CONCURRENCY", "many")]))
            .unwrap_err();
        assert!(matches!(err, MigrationError::InvalidConfigValueError { .. }));
    }

    #[test]
    fn test_zero_concurrency_is_rejected() {
        let config = MigrationConfig::from_toml_str("[run]\nconcurrency = 0\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_toml_is_fatal() {
        let err = MigrationConfig::from_toml_str("[run\nconcurrency = 5\n").unwrap_err();
        assert!(matches!(err, MigrationError::TomlError(_)));
        assert!(err.is_fatal());
        assert!(err.user_friendly_message().contains("not valid TOML"));
    }

    #[test]
    fn test_search_with_key_vault() {
        let toml_content = r#"
[search]
source_endpoint = "https://src.search.windows.net"
target_endpoint = "https://dst.search.windows.net"
source_key = "src-key"

[search.key_vault]
url = "https://vault.vault.azure.net"
access_token = "token"
"#;

        let config = MigrationConfig::from_toml_str(toml_content).unwrap();
        let search = config.search().unwrap();
        let vault = search.key_vault.as_ref().unwrap();
        assert_eq!(vault.target_key_secret, "SearchServiceAdminKey");
        assert!(search.target_key.is_empty());
    }

    #[test]
    fn test_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(b"[run]\nreport_dir = \"./reports\"\n")
            .unwrap();

        let config = MigrationConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(config.run.report_dir, "./reports");
        assert!(config.blob.is_none());
    }
}
