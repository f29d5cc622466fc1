use crate::adapters::http::{self, ServiceEndpoint};
use crate::core::{MetricKind, MigrationUnit, Transfer, UnitCopier};
use crate::utils::error::{MigrationError, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct BlobCopyOptions {
    /// Appended to the unit key to form the blob name.
    pub blob_suffix: String,
    pub poll_interval: Duration,
    pub max_polls: u32,
    pub skip_existing: bool,
}

impl Default for BlobCopyOptions {
    fn default() -> Self {
        Self {
            blob_suffix: ".json".to_string(),
            poll_interval: Duration::from_secs(1),
            max_polls: 600,
            skip_existing: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct BlobProperties {
    content_length: Option<u64>,
    copy_status: Option<String>,
    copy_status_description: Option<String>,
}

/// Server-side copy of single blobs between two storage accounts.
pub struct BlobCopier {
    client: Client,
    source: ServiceEndpoint,
    destination: ServiceEndpoint,
    options: BlobCopyOptions,
}

impl BlobCopier {
    pub fn new(
        client: Client,
        source: ServiceEndpoint,
        destination: ServiceEndpoint,
        options: BlobCopyOptions,
    ) -> Self {
        Self {
            client,
            source,
            destination,
            options,
        }
    }

    pub fn blob_name(&self, unit: &MigrationUnit) -> String {
        format!("{}{}", unit.key, self.options.blob_suffix)
    }

    async fn container_exists(&self, endpoint: &ServiceEndpoint, container: &str) -> Result<bool> {
        let url = endpoint.url(&[container], &[("restype", "container")]);
        let response = endpoint
            .storage_request(&self.client, Method::HEAD, url)
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            _ => http::check(response, &format!("container '{}'", container))
                .await
                .map(|_| true),
        }
    }

    async fn ensure_destination_container(&self, container: &str) -> Result<()> {
        if self.container_exists(&self.destination, container).await? {
            tracing::debug!("  ✓ Container '{}' already exists in destination", container);
            return Ok(());
        }

        let url = self
            .destination
            .url(&[container], &[("restype", "container")]);
        let response = self
            .destination
            .storage_request(&self.client, Method::PUT, url)
            .send()
            .await?;

        let resource = format!("container '{}'", container);
        match http::check_create(response, &resource, "ContainerAlreadyExists").await {
            Ok(_) => {
                tracing::info!("  ✓ Container '{}' created in destination", container);
                Ok(())
            }
            // Created concurrently by a sibling unit.
            Err(MigrationError::DestinationAlreadyExists { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn properties(
        &self,
        endpoint: &ServiceEndpoint,
        container: &str,
        blob: &str,
    ) -> Result<Option<BlobProperties>> {
        let url = endpoint.url(&[container, blob], &[]);
        let response = endpoint
            .storage_request(&self.client, Method::HEAD, url)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = http::check(response, &format!("blob '{}'", blob)).await?;

        Ok(Some(BlobProperties {
            content_length: http::header_u64(&response, "content-length"),
            copy_status: http::header_str(&response, "x-ms-copy-status").map(str::to_string),
            copy_status_description: http::header_str(&response, "x-ms-copy-status-description")
                .map(str::to_string),
        }))
    }

    async fn start_copy(&self, container: &str, blob: &str) -> Result<Option<String>> {
        let source_url = self.source.url(&[container, blob], &[]);
        let url = self.destination.url(&[container, blob], &[]);

        let response = self
            .destination
            .storage_request(&self.client, Method::PUT, url)
            .header("x-ms-copy-source", source_url.as_str())
            .header(reqwest::header::CONTENT_LENGTH, 0)
            .send()
            .await?;

        let response = http::check(response, &format!("blob '{}'", blob)).await?;
        Ok(http::header_str(&response, "x-ms-copy-status").map(str::to_string))
    }

    async fn wait_for_copy(&self, container: &str, blob: &str, initial: Option<String>) -> Result<()> {
        let resource = format!("blob '{}'", blob);
        let mut status = initial;

        for _ in 0..=self.options.max_polls {
            match status.as_deref() {
                None | Some("success") => return Ok(()),
                Some("pending") => {}
                Some(other) => {
                    let description = self
                        .properties(&self.destination, container, blob)
                        .await?
                        .and_then(|p| p.copy_status_description)
                        .unwrap_or_default();
                    return Err(MigrationError::transfer(
                        resource,
                        format!("copy {} {}", other, description).trim_end().to_string(),
                    ));
                }
            }

            tokio::time::sleep(self.options.poll_interval).await;
            status = self
                .properties(&self.destination, container, blob)
                .await?
                .ok_or_else(|| {
                    MigrationError::transfer(&resource, "destination blob vanished during copy")
                })?
                .copy_status;
        }

        Err(MigrationError::transfer(
            resource,
            format!("copy still pending after {} polls", self.options.max_polls),
        ))
    }
}

#[async_trait]
impl UnitCopier for BlobCopier {
    fn metric(&self) -> MetricKind {
        MetricKind::Bytes
    }

    async fn copy_one(&self, unit: &MigrationUnit) -> Result<Transfer> {
        // Container names are case-insensitive at the service; always address the lowercase form.
        let container = unit.group.to_lowercase();
        let blob = self.blob_name(unit);

        tracing::debug!(
            "Copying blob: {} (container: {}, normalized: {})",
            blob,
            unit.group,
            container
        );

        if !self.container_exists(&self.source, &container).await? {
            return Err(MigrationError::not_found(
                format!("container '{}'", container),
                "does not exist in source storage account",
            ));
        }

        self.ensure_destination_container(&container).await?;

        let source = self
            .properties(&self.source, &container, &blob)
            .await?
            .ok_or_else(|| {
                MigrationError::not_found(
                    format!("blob '{}'", blob),
                    format!("does not exist in source container '{}'", container),
                )
            })?;

        if self.options.skip_existing {
            if let Some(existing) = self.properties(&self.destination, &container, &blob).await? {
                return Ok(Transfer::AlreadyPresent {
                    existing_size: existing.content_length,
                });
            }
        }

        tracing::debug!("  ⟳ Copying blob {}...", blob);
        let initial = self.start_copy(&container, &blob).await?;
        self.wait_for_copy(&container, &blob, initial).await?;

        let copied = self.properties(&self.destination, &container, &blob).await?;
        let amount = copied
            .and_then(|p| p.content_length)
            .or(source.content_length)
            .unwrap_or(0);

        Ok(Transfer::Copied { amount })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::http::Credential;
    use crate::core::runner::{BatchRunner, RunConfiguration};
    use crate::core::CopyOutcome;
    use crate::utils::error::FailureKind;
    use httpmock::prelude::*;
    use httpmock::Method::HEAD;

    fn copier(source: &MockServer, destination: &MockServer, skip_existing: bool) -> BlobCopier {
        BlobCopier::new(
            Client::new(),
            ServiceEndpoint::new(&source.base_url(), Credential::Sas("sig=src".to_string())).unwrap(),
            ServiceEndpoint::new(&destination.base_url(), Credential::Sas("sig=dst".to_string()))
                .unwrap(),
            BlobCopyOptions {
                poll_interval: Duration::from_millis(10),
                max_polls: 3,
                skip_existing,
                ..BlobCopyOptions::default()
            },
        )
    }

    fn unit() -> MigrationUnit {
        MigrationUnit::new("Customers", "Sales")
    }

    #[tokio::test]
    async fn test_missing_source_container_fails_unit() {
        let source = MockServer::start();
        let destination = MockServer::start();

        let container = source.mock(|when, then| {
            when.method(HEAD)
                .path("/sales")
                .query_param("restype", "container")
                .query_param("sig", "src");
            then.status(404);
        });

        let err = copier(&source, &destination, true)
            .copy_one(&unit())
            .await
            .unwrap_err();

        container.assert();
        assert!(matches!(err, MigrationError::UnitNotFound { .. }));
        assert!(err.to_string().contains("container 'sales'"));
    }

    #[tokio::test]
    async fn test_existing_destination_blob_is_skipped() {
        let source = MockServer::start();
        let destination = MockServer::start();

        source.mock(|when, then| {
            when.method(HEAD).path("/sales").query_param("restype", "container");
            then.status(200);
        });
        source.mock(|when, then| {
            when.method(HEAD).path("/sales/Customers.json");
            then.status(200);
        });
        destination.mock(|when, then| {
            when.method(HEAD).path("/sales").query_param("restype", "container");
            then.status(200);
        });
        destination.mock(|when, then| {
            when.method(HEAD).path("/sales/Customers.json");
            then.status(200);
        });
        let copy = destination.mock(|when, then| {
            when.method(PUT).path("/sales/Customers.json");
            then.status(202);
        });

        let transfer = copier(&source, &destination, true)
            .copy_one(&unit())
            .await
            .unwrap();

        assert!(matches!(transfer, Transfer::AlreadyPresent { .. }));
        copy.assert_hits(0);
    }

    fn source_with_blob() -> MockServer {
        let source = MockServer::start();
        source.mock(|when, then| {
            when.method(HEAD).path("/sales").query_param("restype", "container");
            then.status(200);
        });
        source.mock(|when, then| {
            when.method(HEAD).path("/sales/Customers.json");
            then.status(200);
        });
        source
    }

    #[tokio::test]
    async fn test_copy_creates_missing_destination_container() {
        let source = source_with_blob();
        let destination = MockServer::start();

        destination.mock(|when, then| {
            when.method(HEAD).path("/sales").query_param("restype", "container");
            then.status(404);
        });
        let create = destination.mock(|when, then| {
            when.method(PUT)
                .path("/sales")
                .query_param("restype", "container")
                .query_param("sig", "dst");
            then.status(201);
        });
        let copy = destination.mock(|when, then| {
            when.method(PUT)
                .path("/sales/Customers.json")
                .header_exists("x-ms-copy-source")
                .header("x-ms-version", crate::adapters::http::STORAGE_API_VERSION);
            then.status(202).header("x-ms-copy-status", "success");
        });
        let verify = destination.mock(|when, then| {
            when.method(HEAD).path("/sales/Customers.json");
            then.status(200);
        });

        let transfer = copier(&source, &destination, false)
            .copy_one(&unit())
            .await
            .unwrap();

        create.assert();
        copy.assert();
        verify.assert();
        assert!(matches!(transfer, Transfer::Copied { .. }));
    }

    #[tokio::test]
    async fn test_pending_copy_is_polled_until_success() {
        let source = source_with_blob();
        let destination = MockServer::start();

        destination.mock(|when, then| {
            when.method(HEAD).path("/sales").query_param("restype", "container");
            then.status(200);
        });
        let copy = destination.mock(|when, then| {
            when.method(PUT).path("/sales/Customers.json");
            then.status(202).header("x-ms-copy-status", "pending");
        });
        let poll = destination.mock(|when, then| {
            when.method(HEAD).path("/sales/Customers.json");
            then.status(200).header("x-ms-copy-status", "success");
        });

        let transfer = copier(&source, &destination, false)
            .copy_one(&unit())
            .await
            .unwrap();

        copy.assert();
        // One poll plus the final size lookup.
        poll.assert_hits(2);
        assert!(matches!(transfer, Transfer::Copied { .. }));
    }

    #[tokio::test]
    async fn test_failed_copy_status_fails_unit() {
        let source = source_with_blob();
        let destination = MockServer::start();

        destination.mock(|when, then| {
            when.method(HEAD).path("/sales").query_param("restype", "container");
            then.status(200);
        });
        destination.mock(|when, then| {
            when.method(PUT).path("/sales/Customers.json");
            then.status(202).header("x-ms-copy-status", "failed");
        });
        destination.mock(|when, then| {
            when.method(HEAD).path("/sales/Customers.json");
            then.status(200)
                .header("x-ms-copy-status", "failed")
                .header("x-ms-copy-status-description", "500 InternalError");
        });

        // Overwrite mode: the existing destination blob does not short-circuit.
        let err = copier(&source, &destination, false)
            .copy_one(&unit())
            .await
            .unwrap_err();

        assert!(matches!(err, MigrationError::UnitTransfer { .. }));
        assert!(err.to_string().contains("500 InternalError"));
    }

    fn destination_with_container() -> MockServer {
        let destination = MockServer::start();
        destination.mock(|when, then| {
            when.method(HEAD).path("/sales").query_param("restype", "container");
            then.status(200);
        });
        destination
    }

    #[tokio::test]
    async fn test_copy_conflict_is_reported_as_failure() {
        let source = source_with_blob();
        let destination = destination_with_container();

        destination.mock(|when, then| {
            when.method(HEAD).path("/sales/Customers.json");
            then.status(404);
        });
        destination.mock(|when, then| {
            when.method(PUT).path("/sales/Customers.json");
            then.status(409)
                .header("x-ms-error-code", "PendingCopyOperation")
                .body("PendingCopyOperation");
        });

        let report = BatchRunner::new(RunConfiguration::new("blob", 2))
            .run(&[unit()], &copier(&source, &destination, true))
            .await
            .unwrap();

        assert_eq!(report.counts.failed, 1);
        assert_eq!(report.counts.skipped, 0);
        match &report.outcomes[0].outcome {
            CopyOutcome::Failed { reason, kind } => {
                assert_eq!(*kind, FailureKind::Transfer);
                assert!(reason.contains("PendingCopyOperation"));
            }
            other => panic!("expected a failed copy, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_container_created_by_sibling_is_tolerated() {
        let source = source_with_blob();
        let destination = MockServer::start();

        destination.mock(|when, then| {
            when.method(HEAD).path("/sales").query_param("restype", "container");
            then.status(404);
        });
        destination.mock(|when, then| {
            when.method(PUT).path("/sales").query_param("restype", "container");
            then.status(409).header("x-ms-error-code", "ContainerAlreadyExists");
        });
        let copy = destination.mock(|when, then| {
            when.method(PUT).path("/sales/Customers.json");
            then.status(202).header("x-ms-copy-status", "success");
        });
        destination.mock(|when, then| {
            when.method(HEAD).path("/sales/Customers.json");
            then.status(404);
        });

        let transfer = copier(&source, &destination, true)
            .copy_one(&unit())
            .await
            .unwrap();

        copy.assert();
        assert!(matches!(transfer, Transfer::Copied { .. }));
    }

    #[tokio::test]
    async fn test_second_run_skips_blob_copied_by_first() {
        let source = source_with_blob();
        let destination = destination_with_container();
        let copier = copier(&source, &destination, true);

        let mut missing = destination.mock(|when, then| {
            when.method(HEAD).path("/sales/Customers.json");
            then.status(404);
        });
        let copy = destination.mock(|when, then| {
            when.method(PUT).path("/sales/Customers.json");
            then.status(202).header("x-ms-copy-status", "success");
        });

        let first = copier.copy_one(&unit()).await.unwrap();
        assert!(matches!(first, Transfer::Copied { .. }));
        missing.delete();

        destination.mock(|when, then| {
            when.method(HEAD).path("/sales/Customers.json");
            then.status(200);
        });

        let second = copier.copy_one(&unit()).await.unwrap();
        assert!(matches!(second, Transfer::AlreadyPresent { .. }));
        copy.assert_hits(1);
    }
}
