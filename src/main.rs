use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use asset_ledger as ledger;
use ledger::queries::{LedgerAuditQuery, Query};

#[derive(Debug, Parser)]
#[command(name = "asset-ledger", about = "Asset inventory and allocation ledger")]
struct Cli {
    /// Print reports as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Apply pending schema migrations and exit
    Migrate,
    /// Check every pool against its counters and open custody records
    Audit,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = ledger::config::load_config().context("failed to load configuration")?;
    ledger::config::init_tracing(&cfg.log_level, cfg.log_json);

    let db_pool = ledger::db::establish_connection_from_app_config(&cfg)
        .await
        .context("failed to connect to the database")?;

    let command = cli.command.unwrap_or(Commands::Audit);
    if cfg.auto_migrate || matches!(command, Commands::Migrate) {
        ledger::db::run_migrations(&db_pool).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }

    match command {
        Commands::Migrate => {
            info!("Migrations applied");
        }
        Commands::Audit => {
            let report = LedgerAuditQuery.execute(&db_pool).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "checked {} pools, {} violations",
                    report.pools_checked,
                    report.violations.len()
                );
                for violation in &report.violations {
                    println!("  {:?}", violation);
                }
            }
            if !report.is_clean() {
                warn!(violations = report.violations.len(), "Ledger audit failed");
                bail!("ledger audit found {} violations", report.violations.len());
            }
            info!(pools = report.pools_checked, "Ledger audit clean");
        }
    }

    Ok(())
}
