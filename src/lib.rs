pub mod adapters;
pub mod app;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::{CliConfig, Command, JobArgs};

pub use adapters::http::build_client;
pub use app::{JobOptions, JobOutcome};
pub use config::{cli::LocalStorage, toml_config::MigrationConfig};
pub use core::runner::{BatchRunner, RunConfiguration};
pub use domain::model::{BatchReport, CopyOutcome, MigrationUnit};
pub use utils::error::{MigrationError, Result};
