pub mod manifest;
pub mod report;
pub mod runner;

pub use crate::domain::model::{BatchReport, CopyOutcome, MetricKind, MigrationUnit, Transfer};
pub use crate::domain::ports::{Storage, UnitCopier};
pub use crate::utils::error::Result;
