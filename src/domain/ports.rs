use crate::domain::model::{MetricKind, MigrationUnit, Transfer};
use crate::utils::error::Result;
use async_trait::async_trait;

pub trait Storage: Send + Sync {
    fn read_file(&self, path: &str) -> impl std::future::Future<Output = Result<Vec<u8>>> + Send;
    fn write_file(
        &self,
        path: &str,
        data: &[u8],
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// Copies one migration unit from source to destination.
///
/// Implementations check the destination first and return
/// [`Transfer::AlreadyPresent`] instead of rewriting an item that is already
/// there, which keeps repeated runs convergent.
#[async_trait]
pub trait UnitCopier: Send + Sync {
    fn metric(&self) -> MetricKind;

    async fn copy_one(&self, unit: &MigrationUnit) -> Result<Transfer>;
}

