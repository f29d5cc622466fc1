use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Missing required configuration value: {field}")]
    MissingConfigError { field: String },

    #[error("Invalid value '{value}' for {field}: {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Manifest error: {message}")]
    ManifestError { message: String },

    #[error("{resource} not found: {message}")]
    UnitNotFound { resource: String, message: String },

    #[error("Insufficient permissions to access {resource}: {message}")]
    UnitPermission { resource: String, message: String },

    #[error("Transfer of {resource} failed: {message}")]
    UnitTransfer { resource: String, message: String },

    #[error("{resource} timed out after {seconds}s")]
    UnitTimeout { resource: String, seconds: u64 },

    #[error("{resource} already exists in destination")]
    DestinationAlreadyExists {
        resource: String,
        existing_size: Option<u64>,
    },

    #[error("HTTP request failed: {0}")]
    ApiError(#[from] reqwest::Error),

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, MigrationError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Manifest,
    Unit,
    Network,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// Failure category recorded on a `Failed` outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    NotFound,
    Permission,
    Transfer,
    Timeout,
    Panic,
}

impl MigrationError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }

    pub fn manifest(message: impl Into<String>) -> Self {
        Self::ManifestError {
            message: message.into(),
        }
    }

    pub fn not_found(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::UnitNotFound {
            resource: resource.into(),
            message: message.into(),
        }
    }

    pub fn permission(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::UnitPermission {
            resource: resource.into(),
            message: message.into(),
        }
    }

    pub fn transfer(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::UnitTransfer {
            resource: resource.into(),
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ConfigError { .. }
            | Self::MissingConfigError { .. }
            | Self::InvalidConfigValueError { .. }
            | Self::TomlError(_) => ErrorCategory::Configuration,
            Self::ManifestError { .. } | Self::CsvError(_) => ErrorCategory::Manifest,
            Self::UnitNotFound { .. }
            | Self::UnitPermission { .. }
            | Self::UnitTransfer { .. }
            | Self::UnitTimeout { .. }
            | Self::DestinationAlreadyExists { .. } => ErrorCategory::Unit,
            Self::ApiError(_) => ErrorCategory::Network,
            Self::IoError(_) | Self::SerializationError(_) => ErrorCategory::System,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.category() {
            ErrorCategory::Configuration => ErrorSeverity::Critical,
            ErrorCategory::Manifest => ErrorSeverity::High,
            ErrorCategory::Network | ErrorCategory::System => ErrorSeverity::Medium,
            ErrorCategory::Unit => ErrorSeverity::Low,
        }
    }

    /// Fatal errors abort a run before any unit is processed.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Configuration | ErrorCategory::Manifest
        )
    }

    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::UnitNotFound { .. } => FailureKind::NotFound,
            Self::UnitPermission { .. } => FailureKind::Permission,
            Self::UnitTimeout { .. } => FailureKind::Timeout,
            _ => FailureKind::Transfer,
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            Self::ConfigError { message } => format!("Configuration problem: {}", message),
            Self::MissingConfigError { field } => {
                format!("Required setting '{}' is not set", field)
            }
            Self::InvalidConfigValueError { field, reason, .. } => {
                format!("Setting '{}' is invalid: {}", field, reason)
            }
            Self::ManifestError { message } => format!("Manifest could not be used: {}", message),
            Self::TomlError(e) => format!("Config file is not valid TOML: {}", e),
            Self::CsvError(e) => format!("Manifest CSV could not be read: {}", e),
            Self::ApiError(e) => format!("Could not reach the service: {}", e),
            other => other.to_string(),
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Configuration => {
                "Check the config file and the environment variables it references"
            }
            ErrorCategory::Manifest => {
                "Check that the manifest exists and has the expected columns or fields"
            }
            ErrorCategory::Network => "Check network connectivity and the service endpoints",
            ErrorCategory::System => "Check file permissions and available disk space",
            ErrorCategory::Unit => "Inspect the failed units in the report and re-run",
        }
    }
}
