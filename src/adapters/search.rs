use crate::adapters::http::{self, ServiceEndpoint};
use crate::core::{MetricKind, MigrationUnit, Transfer, UnitCopier};
use crate::utils::error::{MigrationError, Result};
use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::Deserialize;
use serde_json::Value;

pub const SEARCH_API_VERSION: &str = "2023-11-01";

/// Metadata field holding the source definition of an enumerated artifact.
pub const DEFINITION_FIELD: &str = "definition";

const READ_ONLY_ANNOTATIONS: [&str; 2] = ["@odata.etag", "@odata.context"];
const INDEXER_RUNTIME_FIELDS: [&str; 3] = ["lastResult", "executionHistory", "status"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    DataSource,
    Index,
    Skillset,
    Indexer,
}

impl ArtifactKind {
    /// Dependency order: indexers reference data sources, indexes and skillsets.
    pub const PHASES: [ArtifactKind; 4] = [
        ArtifactKind::DataSource,
        ArtifactKind::Index,
        ArtifactKind::Skillset,
        ArtifactKind::Indexer,
    ];

    pub fn collection(self) -> &'static str {
        match self {
            ArtifactKind::DataSource => "datasources",
            ArtifactKind::Index => "indexes",
            ArtifactKind::Skillset => "skillsets",
            ArtifactKind::Indexer => "indexers",
        }
    }

    pub fn from_collection(collection: &str) -> Option<Self> {
        Self::PHASES
            .into_iter()
            .find(|kind| kind.collection() == collection)
    }

    pub fn label(self) -> &'static str {
        match self {
            ArtifactKind::DataSource => "data source",
            ArtifactKind::Index => "index",
            ArtifactKind::Skillset => "skillset",
            ArtifactKind::Indexer => "indexer",
        }
    }
}

#[derive(Debug, Deserialize)]
struct ArtifactList {
    #[serde(default)]
    value: Vec<Value>,
}

/// Management data plane of one search service.
#[derive(Debug, Clone)]
pub struct SearchService {
    client: Client,
    endpoint: ServiceEndpoint,
    api_version: String,
}

impl SearchService {
    pub fn new(client: Client, endpoint: ServiceEndpoint) -> Self {
        Self {
            client,
            endpoint,
            api_version: SEARCH_API_VERSION.to_string(),
        }
    }

    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = api_version.into();
        self
    }

    pub fn display(&self) -> String {
        self.endpoint.display()
    }

    pub async fn list(&self, kind: ArtifactKind) -> Result<Vec<Value>> {
        let url = self
            .endpoint
            .url(&[kind.collection()], &[("api-version", self.api_version.as_str())]);
        let response = self
            .endpoint
            .request(&self.client, Method::GET, url)
            .send()
            .await?;
        let response = http::check(response, kind.collection()).await?;
        let list: ArtifactList = response.json().await?;
        Ok(list.value)
    }

    pub async fn exists(&self, kind: ArtifactKind, name: &str) -> Result<bool> {
        let url = self.endpoint.url(
            &[kind.collection(), name],
            &[("api-version", self.api_version.as_str())],
        );
        let response = self
            .endpoint
            .request(&self.client, Method::GET, url)
            .send()
            .await?;

        match http::check(response, &resource(kind, name)).await {
            Ok(_) => Ok(true),
            Err(MigrationError::UnitNotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Create-or-update of a single artifact.
    pub async fn put(&self, kind: ArtifactKind, name: &str, definition: &Value) -> Result<()> {
        let url = self.endpoint.url(
            &[kind.collection(), name],
            &[("api-version", self.api_version.as_str())],
        );
        let response = self
            .endpoint
            .request(&self.client, Method::PUT, url)
            .header("Prefer", "return=minimal")
            .json(definition)
            .send()
            .await?;

        http::check(response, &resource(kind, name)).await?;
        Ok(())
    }

    pub async fn list_names(&self, kind: ArtifactKind) -> Result<Vec<String>> {
        Ok(self
            .list(kind)
            .await?
            .iter()
            .filter_map(artifact_name)
            .map(str::to_string)
            .collect())
    }
}

fn resource(kind: ArtifactKind, name: &str) -> String {
    format!("{} '{}'", kind.label(), name)
}

fn artifact_name(definition: &Value) -> Option<&str> {
    definition
        .get("name")
        .and_then(Value::as_str)
        .filter(|name| !name.is_empty())
}

/// One unit per named artifact of `kind` on the source service.
///
/// A listing failure is a configuration problem for the whole run, not a
/// per-unit failure.
pub async fn enumerate_artifacts(
    source: &SearchService,
    kind: ArtifactKind,
) -> Result<Vec<MigrationUnit>> {
    let definitions = source.list(kind).await.map_err(|e| {
        MigrationError::config(format!(
            "Could not list {} on source search service {}: {}",
            kind.collection(),
            source.display(),
            e
        ))
    })?;

    tracing::info!("Found {} {}(s)", definitions.len(), kind.label());

    Ok(definitions
        .into_iter()
        .filter_map(|definition| {
            let name = artifact_name(&definition)?.to_string();
            Some(
                MigrationUnit::new(name, kind.collection())
                    .with_metadata(DEFINITION_FIELD, definition),
            )
        })
        .collect())
}

fn strip_annotations(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for annotation in READ_ONLY_ANNOTATIONS {
                map.remove(annotation);
            }
            map.values_mut().for_each(strip_annotations);
        }
        Value::Array(items) => items.iter_mut().for_each(strip_annotations),
        _ => {}
    }
}

/// Prepares a source definition for the target service.
pub fn clean_definition(
    kind: ArtifactKind,
    definition: &Value,
    connection_string: Option<&str>,
) -> Value {
    let mut cleaned = definition.clone();
    strip_annotations(&mut cleaned);

    let Some(map) = cleaned.as_object_mut() else {
        return definition.clone();
    };

    match kind {
        ArtifactKind::DataSource => {
            if let Some(connection_string) = connection_string {
                let credentials = map
                    .entry("credentials")
                    .or_insert_with(|| Value::Object(Default::default()));
                if !credentials.is_object() {
                    *credentials = Value::Object(Default::default());
                }
                if let Some(credentials) = credentials.as_object_mut() {
                    credentials.insert(
                        "connectionString".to_string(),
                        Value::String(connection_string.to_string()),
                    );
                }
            }
        }
        ArtifactKind::Indexer => {
            for field in INDEXER_RUNTIME_FIELDS {
                map.remove(field);
            }
            if let Some(configuration) = map
                .get_mut("parameters")
                .and_then(|p| p.get_mut("configuration"))
                .and_then(Value::as_object_mut)
            {
                configuration.remove("queryTimeout");
            }
        }
        ArtifactKind::Index | ArtifactKind::Skillset => {}
    }

    cleaned
}

/// Recreates enumerated artifacts on the target service.
pub struct SearchArtifactCopier {
    target: SearchService,
    connection_string: Option<String>,
    skip_existing: bool,
}

impl SearchArtifactCopier {
    pub fn new(target: SearchService, connection_string: Option<String>, skip_existing: bool) -> Self {
        Self {
            target,
            connection_string,
            skip_existing,
        }
    }
}

#[async_trait]
impl UnitCopier for SearchArtifactCopier {
    fn metric(&self) -> MetricKind {
        MetricKind::Artifacts
    }

    async fn copy_one(&self, unit: &MigrationUnit) -> Result<Transfer> {
        let kind = ArtifactKind::from_collection(&unit.group).ok_or_else(|| {
            MigrationError::transfer(&unit.key, format!("unknown artifact collection '{}'", unit.group))
        })?;
        let definition = unit.metadata.get(DEFINITION_FIELD).ok_or_else(|| {
            MigrationError::transfer(resource(kind, &unit.key), "definition missing from enumeration")
        })?;

        tracing::debug!("Processing {}: {}", kind.label(), unit.key);

        if self.skip_existing && self.target.exists(kind, &unit.key).await? {
            return Ok(Transfer::AlreadyPresent { existing_size: None });
        }

        let cleaned = clean_definition(kind, definition, self.connection_string.as_deref());
        if kind == ArtifactKind::DataSource && self.connection_string.is_some() {
            tracing::info!("  Updated connection string for data source: {}", unit.key);
        }

        self.target.put(kind, &unit.key, &cleaned).await?;
        Ok(Transfer::Copied { amount: 1 })
    }
}
