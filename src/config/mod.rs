pub mod cli;
pub mod toml_config;

#[cfg(feature = "cli")]
use clap::{Args, Parser, Subcommand};

#[cfg(feature = "cli")]
#[derive(Debug, Clone, Parser)]
#[command(name = "azmigrate")]
#[command(about = "Migrates Azure blobs, tables and search configuration between accounts")]
#[command(version)]
pub struct CliConfig {
    /// TOML config file; without it settings come from environment variables
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// .env file loaded before reading the configuration
    #[arg(long, global = true)]
    pub env_file: Option<String>,

    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, global = true, help = "Emit logs as JSON lines")]
    pub json_logs: bool,

    #[arg(long, global = true, help = "Log process CPU and memory after each batch")]
    pub monitor: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[cfg(feature = "cli")]
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Copy blobs listed in the CSV manifest
    Blobs(JobArgs),
    /// Copy tables listed in the JSON schema manifest
    Tables(JobArgs),
    /// Recreate search data sources, indexes, skillsets and indexers
    Search(JobArgs),
}

#[cfg(feature = "cli")]
impl Command {
    pub fn job_args(&self) -> &JobArgs {
        match self {
            Command::Blobs(args) | Command::Tables(args) | Command::Search(args) => args,
        }
    }
}

#[cfg(feature = "cli")]
#[derive(Debug, Clone, Default, Args)]
pub struct JobArgs {
    /// Units copied concurrently per batch
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Print the configuration and enumerated units without copying
    #[arg(long)]
    pub dry_run: bool,

    /// Directory the JSON report is written to
    #[arg(long)]
    pub report_dir: Option<String>,

    /// Rewrite items that already exist in the destination
    #[arg(long)]
    pub force: bool,

    /// Manifest path overriding the configured one
    #[arg(long)]
    pub manifest: Option<String>,
}

#[cfg(feature = "cli")]
impl JobArgs {
    /// Applies command-line overrides on top of the loaded configuration.
    pub fn apply(&self, config: &mut toml_config::MigrationConfig, command: &Command) {
        if let Some(concurrency) = self.concurrency {
            config.run.concurrency = concurrency;
        }
        if let Some(report_dir) = &self.report_dir {
            config.run.report_dir = report_dir.clone();
        }
        if self.force {
            config.run.skip_existing = false;
        }
        if let Some(manifest) = &self.manifest {
            match command {
                Command::Blobs(_) => {
                    if let Some(blob) = config.blob.as_mut() {
                        blob.manifest = manifest.clone();
                    }
                }
                Command::Tables(_) => {
                    if let Some(table) = config.table.as_mut() {
                        table.manifest = manifest.clone();
                    }
                }
                Command::Search(_) => {}
            }
        }
    }
}

#[cfg(all(test, feature = "cli"))]
mod tests {
    use super::*;
    use toml_config::MigrationConfig;

    #[test]
    fn test_parse_subcommand_with_global_flags() {
        let cli = CliConfig::try_parse_from([
            "azmigrate",
            "--config",
            "migrate.toml",
            "blobs",
            "--concurrency",
            "10",
            "--dry-run",
            "-v",
        ])
        .unwrap();

        assert_eq!(cli.config.as_deref(), Some("migrate.toml"));
        assert!(cli.verbose);
        assert!(matches!(cli.command, Command::Blobs(_)));
        assert_eq!(cli.command.job_args().concurrency, Some(10));
        assert!(cli.command.job_args().dry_run);
    }

    #[test]
    fn test_overrides_apply_to_config() {
        let cli =
            CliConfig::try_parse_from(["azmigrate", "tables", "--force", "--manifest", "s.json"])
                .unwrap();
        let mut config = MigrationConfig {
            table: Some(Default::default()),
            ..Default::default()
        };

        cli.command.job_args().apply(&mut config, &cli.command);

        assert!(!config.run.skip_existing);
        assert_eq!(config.table.unwrap().manifest, "s.json");
    }

    #[test]
    fn test_subcommand_is_required() {
        assert!(CliConfig::try_parse_from(["azmigrate"]).is_err());
    }
}
