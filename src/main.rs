use azmigrate::app::{blob_migration, search_migration, table_migration};
use azmigrate::utils::error::{ErrorSeverity, MigrationError};
use azmigrate::utils::{logger, validation::Validate};
use azmigrate::{build_client, CliConfig, Command, JobOptions, JobOutcome, MigrationConfig};
use clap::Parser;

fn load_env_file(cli: &CliConfig) -> azmigrate::Result<()> {
    match &cli.env_file {
        Some(path) => dotenvy::from_filename(path).map(|_| ()).map_err(|e| {
            MigrationError::config(format!("Could not load env file '{}': {}", path, e))
        }),
        None => {
            // .env 不存在時直接使用既有環境變數
            dotenvy::dotenv().ok();
            Ok(())
        }
    }
}

fn load_config(cli: &CliConfig) -> azmigrate::Result<MigrationConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            tracing::info!("Loading configuration from {}", path);
            MigrationConfig::from_file(path)?
        }
        None => {
            tracing::info!("Loading configuration from environment variables");
            MigrationConfig::from_env()?
        }
    };

    cli.command.job_args().apply(&mut config, &cli.command);
    if cli.monitor {
        config.run.monitor = true;
    }
    config.validate()?;
    Ok(config)
}

async fn execute(cli: &CliConfig) -> azmigrate::Result<JobOutcome> {
    let config = load_config(cli)?;
    if cli.verbose {
        tracing::debug!("Run settings: {:?}", config.run);
    }
    if config.run.monitor {
        tracing::info!("🔍 System monitoring enabled");
    }

    let client = build_client(config.run.request_timeout())?;
    let options = JobOptions::new(config.run.clone(), cli.command.job_args().dry_run);

    match &cli.command {
        Command::Blobs(_) => blob_migration::run(&client, config.blob()?, &options).await,
        Command::Tables(_) => table_migration::run(&client, config.table()?, &options).await,
        Command::Search(_) => search_migration::run(&client, config.search()?, &options).await,
    }
}

#[tokio::main]
async fn main() {
    let cli = CliConfig::parse();
    let env_result = load_env_file(&cli);

    // 初始化日誌
    if cli.json_logs {
        logger::init_json_logger(cli.verbose);
    } else {
        logger::init_cli_logger(cli.verbose);
    }

    tracing::info!("Starting azmigrate {}", env!("CARGO_PKG_VERSION"));

    let result = match env_result {
        Ok(()) => execute(&cli).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(JobOutcome::Planned(units)) => {
            println!("Dry run complete: {} unit(s) would be migrated", units.len());
        }
        Ok(JobOutcome::Finished {
            report,
            report_path,
        }) => {
            for line in report.summary_lines() {
                println!("{}", line);
            }
            println!();
            println!("📁 Detailed results saved to: {}", report_path);

            if report.has_failures() {
                tracing::warn!("⚠️ Migration finished with {} failed unit(s)", report.counts.failed);
                std::process::exit(1);
            }
            tracing::info!("✅ Migration completed successfully!");
        }
        Err(e) => {
            tracing::error!(
                "❌ Migration failed: {} (Category: {:?}, Severity: {:?})",
                e,
                e.category(),
                e.severity()
            );
            tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

            eprintln!("❌ {}", e.user_friendly_message());
            eprintln!("💡 建議: {}", e.recovery_suggestion());

            // 根據錯誤嚴重程度決定退出碼
            let exit_code = match e.severity() {
                ErrorSeverity::Low => 1,      // 單一項目錯誤未被收斂
                ErrorSeverity::Medium => 2,   // 網路或 I/O 錯誤，可重試
                ErrorSeverity::High => 1,     // 清單錯誤
                ErrorSeverity::Critical => 3, // 設定錯誤
            };
            std::process::exit(exit_code);
        }
    }
}
