use crate::core::{MigrationUnit, Storage};
use crate::utils::error::{MigrationError, Result};
use std::collections::HashSet;

/// Column layout and filtering rules for the blob CSV manifest.
#[derive(Debug, Clone)]
pub struct CsvManifestRules {
    pub key_column: String,
    pub group_column: String,
    pub excluded_groups: Vec<String>,
    pub placeholder_keys: Vec<String>,
}

impl Default for CsvManifestRules {
    fn default() -> Self {
        Self {
            key_column: "AthenaDbEntityName".to_string(),
            group_column: "Container".to_string(),
            excluded_groups: vec!["ATS".to_string()],
            placeholder_keys: vec!["NA".to_string()],
        }
    }
}

pub const TABLE_NAME_FIELD: &str = "TableName";

/// Keeps the first unit seen for every key, preserving input order.
pub fn dedupe_by_key(units: Vec<MigrationUnit>) -> Vec<MigrationUnit> {
    let mut seen = HashSet::new();
    units
        .into_iter()
        .filter(|unit| seen.insert(unit.key.clone()))
        .collect()
}

/// Parses the blob manifest: one unit per entity, grouped by container.
pub fn parse_blob_manifest(content: &str, rules: &CsvManifestRules) -> Result<Vec<MigrationUnit>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(content.as_bytes());

    let headers = reader.headers()?.clone();
    let column = |name: &str| headers.iter().position(|h| h == name);

    let (key_index, group_index) = match (column(&rules.key_column), column(&rules.group_column)) {
        (Some(key), Some(group)) => (key, group),
        _ => {
            return Err(MigrationError::manifest(format!(
                "Required columns {} or {} not found in CSV",
                rules.key_column, rules.group_column
            )))
        }
    };

    tracing::debug!(
        "Found column indexes: {}={}, {}={}",
        rules.key_column,
        key_index,
        rules.group_column,
        group_index
    );

    let mut units = Vec::new();
    let mut rows = 0usize;

    for record in reader.records() {
        let record = record?;
        if record.iter().all(|field| field.is_empty()) {
            continue;
        }
        rows += 1;

        let key = record.get(key_index).unwrap_or_default();
        let group = record.get(group_index).unwrap_or_default();

        if key.is_empty()
            || group.is_empty()
            || rules.excluded_groups.iter().any(|g| g == group)
            || rules.placeholder_keys.iter().any(|p| p == key)
        {
            continue;
        }

        let mut unit = MigrationUnit::new(key, group);
        for (index, (name, value)) in headers.iter().zip(record.iter()).enumerate() {
            if index != key_index && index != group_index && !name.is_empty() {
                unit.metadata
                    .insert(name.to_string(), serde_json::Value::String(value.to_string()));
            }
        }
        units.push(unit);
    }

    if rows == 0 {
        return Err(MigrationError::manifest("CSV file is empty or has no data rows"));
    }

    let units = dedupe_by_key(units);
    tracing::info!("Found {} blobs to migrate", units.len());
    Ok(units)
}

/// Parses the table schema manifest: one unit per distinct `TableName`.
pub fn parse_table_manifest(content: &str) -> Result<Vec<MigrationUnit>> {
    let document: serde_json::Value = serde_json::from_str(content)
        .map_err(|e| MigrationError::manifest(format!("Schema is not valid JSON: {}", e)))?;

    let entries = document
        .as_array()
        .ok_or_else(|| MigrationError::manifest("Schema must be a JSON array of objects"))?;

    let mut units = Vec::new();
    let mut carries_field = false;

    for entry in entries {
        let Some(object) = entry.as_object() else {
            continue;
        };
        let Some(name) = object.get(TABLE_NAME_FIELD) else {
            continue;
        };
        carries_field = true;

        let Some(name) = name.as_str().map(str::trim).filter(|n| !n.is_empty()) else {
            continue;
        };

        let mut unit = MigrationUnit::new(name, name);
        for (field, value) in object {
            if field != TABLE_NAME_FIELD {
                unit.metadata.insert(field.clone(), value.clone());
            }
        }
        units.push(unit);
    }

    if !entries.is_empty() && !carries_field {
        return Err(MigrationError::manifest(format!(
            "No entry in schema carries the required field {}",
            TABLE_NAME_FIELD
        )));
    }

    let units = dedupe_by_key(units);
    tracing::info!("Found {} unique tables in schema", units.len());
    Ok(units)
}

async fn read_manifest<S: Storage>(storage: &S, path: &str) -> Result<String> {
    let bytes = storage.read_file(path).await.map_err(|e| {
        MigrationError::manifest(format!("Could not read manifest '{}': {}", path, e))
    })?;
    String::from_utf8(bytes)
        .map_err(|_| MigrationError::manifest(format!("Manifest '{}' is not valid UTF-8", path)))
}

pub async fn load_blob_manifest<S: Storage>(
    storage: &S,
    path: &str,
    rules: &CsvManifestRules,
) -> Result<Vec<MigrationUnit>> {
    tracing::info!("Reading {}...", path);
    let content = read_manifest(storage, path).await?;
    parse_blob_manifest(&content, rules).map_err(into_manifest_error)
}

pub async fn load_table_manifest<S: Storage>(storage: &S, path: &str) -> Result<Vec<MigrationUnit>> {
    tracing::info!("Reading {}...", path);
    let content = read_manifest(storage, path).await?;
    parse_table_manifest(&content)
}

fn into_manifest_error(error: MigrationError) -> MigrationError {
    match error {
        MigrationError::CsvError(e) => MigrationError::manifest(format!("Malformed CSV: {}", e)),
        other => other,
    }
}
