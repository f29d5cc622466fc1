use crate::adapters::http::{self, ServiceEndpoint};
use crate::core::{MetricKind, MigrationUnit, Transfer, UnitCopier};
use crate::utils::error::{MigrationError, Result};
use async_trait::async_trait;
use futures::future::join_all;
use reqwest::{Client, Method, RequestBuilder};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashSet;

const NEXT_PARTITION_KEY: &str = "x-ms-continuation-NextPartitionKey";
const NEXT_ROW_KEY: &str = "x-ms-continuation-NextRowKey";
const MINIMAL_METADATA: &str = "application/json;odata=minimalmetadata";

pub type Entity = Map<String, Value>;

type EntityKey = (String, String);

#[derive(Debug, Clone)]
pub struct TableCopyOptions {
    /// Entities fetched per page; the entities of one page are written concurrently.
    pub page_size: usize,
    pub skip_existing: bool,
}

impl Default for TableCopyOptions {
    fn default() -> Self {
        Self {
            page_size: 100,
            skip_existing: true,
        }
    }
}

#[derive(Debug, Deserialize)]
struct EntityPage {
    #[serde(default)]
    value: Vec<Entity>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Continuation {
    partition_key: String,
    row_key: Option<String>,
}

/// Copies every entity of a table into the same-named destination table.
pub struct TableCopier {
    client: Client,
    source: ServiceEndpoint,
    destination: ServiceEndpoint,
    options: TableCopyOptions,
}

impl TableCopier {
    pub fn new(
        client: Client,
        source: ServiceEndpoint,
        destination: ServiceEndpoint,
        options: TableCopyOptions,
    ) -> Self {
        Self {
            client,
            source,
            destination,
            options,
        }
    }

    fn table_request(&self, endpoint: &ServiceEndpoint, method: Method, url: url::Url) -> RequestBuilder {
        endpoint
            .storage_request(&self.client, method, url)
            .header("DataServiceVersion", "3.0")
            .header("MaxDataServiceVersion", "3.0;NetFx")
            .header(reqwest::header::ACCEPT, MINIMAL_METADATA)
    }

    async fn list_page(
        &self,
        endpoint: &ServiceEndpoint,
        table: &str,
        top: usize,
        select: Option<&str>,
        continuation: Option<&Continuation>,
    ) -> Result<(Vec<Entity>, Option<Continuation>)> {
        let top = top.to_string();
        let mut query = vec![("$top", top.as_str())];
        if let Some(fields) = select {
            query.push(("$select", fields));
        }
        if let Some(next) = continuation {
            query.push(("NextPartitionKey", next.partition_key.as_str()));
            if let Some(row_key) = &next.row_key {
                query.push(("NextRowKey", row_key.as_str()));
            }
        }

        let collection = format!("{}()", table);
        let url = endpoint.url(&[collection.as_str()], &query);
        let response = self.table_request(endpoint, Method::GET, url).send().await?;
        let response = http::check(response, &format!("table '{}'", table)).await?;

        let next = http::header_str(&response, NEXT_PARTITION_KEY).map(|partition_key| Continuation {
            partition_key: partition_key.to_string(),
            row_key: http::header_str(&response, NEXT_ROW_KEY).map(str::to_string),
        });
        let page: EntityPage = response.json().await?;

        Ok((page.value, next))
    }

    /// Returns `true` when the table already existed in the destination.
    async fn create_destination_table(&self, table: &str) -> Result<bool> {
        let url = self.destination.url(&["Tables"], &[]);
        let response = self
            .table_request(&self.destination, Method::POST, url)
            .header("Prefer", "return-no-content")
            .json(&serde_json::json!({ "TableName": table }))
            .send()
            .await?;

        let resource = format!("table '{}'", table);
        match http::check_create(response, &resource, "TableAlreadyExists").await {
            Ok(_) => {
                tracing::info!("  Table '{}' created in destination", table);
                Ok(false)
            }
            Err(MigrationError::DestinationAlreadyExists { .. }) => {
                tracing::info!("  Table '{}' already exists in destination", table);
                Ok(true)
            }
            Err(e) => Err(e),
        }
    }

    /// Keys of every entity the destination table already holds.
    async fn destination_keys(&self, table: &str) -> Result<HashSet<EntityKey>> {
        let mut keys = HashSet::new();
        let mut continuation: Option<Continuation> = None;

        loop {
            let (entities, next) = self
                .list_page(
                    &self.destination,
                    table,
                    self.options.page_size,
                    Some("PartitionKey,RowKey"),
                    continuation.as_ref(),
                )
                .await?;
            for entity in &entities {
                keys.insert(entity_key(entity)?);
            }

            match next {
                Some(next) if Some(&next) != continuation.as_ref() => continuation = Some(next),
                _ => return Ok(keys),
            }
        }
    }

    async fn upsert(&self, table: &str, entity: &Entity) -> Result<()> {
        let partition_key = key_property(entity, "PartitionKey")?;
        let row_key = key_property(entity, "RowKey")?;
        let address = entity_address(table, partition_key, row_key);

        let url = self.destination.url(&[address.as_str()], &[]);
        let response = self
            .table_request(&self.destination, Method::PUT, url)
            .json(&writable_entity(entity))
            .send()
            .await?;

        http::check(response, &format!("entity {}", address)).await?;
        Ok(())
    }
}

/// Drops the read-only annotations and system properties the service
/// rejects or ignores on writes; `@odata.type` annotations are kept.
pub fn writable_entity(entity: &Entity) -> Entity {
    entity
        .iter()
        .filter(|(name, _)| {
            !name.starts_with("odata.") && *name != "Timestamp" && *name != "Timestamp@odata.type"
        })
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

fn entity_key(entity: &Entity) -> Result<EntityKey> {
    Ok((
        key_property(entity, "PartitionKey")?.to_string(),
        key_property(entity, "RowKey")?.to_string(),
    ))
}

fn key_property<'e>(entity: &'e Entity, name: &str) -> Result<&'e str> {
    entity
        .get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| MigrationError::transfer("entity", format!("missing {}", name)))
}

/// `Table(PartitionKey='..',RowKey='..')` with quotes doubled.
pub fn entity_address(table: &str, partition_key: &str, row_key: &str) -> String {
    format!(
        "{}(PartitionKey='{}',RowKey='{}')",
        table,
        partition_key.replace('\'', "''"),
        row_key.replace('\'', "''")
    )
}

#[async_trait]
impl UnitCopier for TableCopier {
    fn metric(&self) -> MetricKind {
        MetricKind::Entities
    }

    async fn copy_one(&self, unit: &MigrationUnit) -> Result<Transfer> {
        let table = unit.key.as_str();
        let resource = format!("table '{}'", table);

        // Probe the source first so a missing table or denied access fails fast.
        self.list_page(&self.source, table, 1, None, None)
            .await
            .map_err(|e| match e {
                MigrationError::UnitNotFound { .. } => {
                    MigrationError::not_found(&resource, "does not exist in source storage account")
                }
                MigrationError::UnitPermission { .. } => MigrationError::permission(
                    &resource,
                    "insufficient permissions in source storage account",
                ),
                other => other,
            })?;

        let pre_existing = self.create_destination_table(table).await?;

        // 只補寫目的端缺少的 entity，中斷過的表重跑時會收斂
        let present = if pre_existing && self.options.skip_existing {
            self.destination_keys(table).await?
        } else {
            HashSet::new()
        };

        tracing::debug!("  Reading entities of '{}' from source...", table);

        let mut copied = 0u64;
        let mut already = 0u64;
        let mut failures: Vec<String> = Vec::new();
        let mut continuation: Option<Continuation> = None;

        loop {
            let (entities, next) = self
                .list_page(
                    &self.source,
                    table,
                    self.options.page_size,
                    None,
                    continuation.as_ref(),
                )
                .await?;

            let mut missing = Vec::with_capacity(entities.len());
            for entity in &entities {
                match entity_key(entity) {
                    Ok(key) if present.contains(&key) => already += 1,
                    _ => missing.push(entity),
                }
            }

            let results = join_all(missing.into_iter().map(|entity| self.upsert(table, entity))).await;
            for result in results {
                match result {
                    Ok(()) => copied += 1,
                    Err(e) => failures.push(e.to_string()),
                }
            }

            tracing::debug!("  Copied {} entities of '{}'...", copied, table);

            match next {
                Some(next) if Some(&next) != continuation.as_ref() => continuation = Some(next),
                _ => break,
            }
        }

        if let Some(first) = failures.first() {
            return Err(MigrationError::transfer(
                resource,
                format!(
                    "{} of {} entities failed to copy; first error: {}",
                    failures.len(),
                    copied + failures.len() as u64,
                    first
                ),
            ));
        }

        if copied == 0 && already > 0 {
            return Ok(Transfer::AlreadyPresent {
                existing_size: Some(already),
            });
        }
        if already > 0 {
            tracing::info!("  {} entities of '{}' were already present", already, table);
        }

        Ok(Transfer::Copied { amount: copied })
    }
}
