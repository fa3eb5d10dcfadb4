pub mod create;
pub mod list;
pub mod rollback;

use bastionflow_cloud::{FileLedgerStore, RollbackReport, RollbackStatus};
use bastionflow_cloud_aws::{AwsProvider, AwsProviderConfig};
use bastionflow_config::Settings;
use colored::Colorize;
use std::path::PathBuf;

/// Settings merged with the global flags
pub struct Context {
    pub settings: Settings,
    pub state_dir: PathBuf,
    pub region: Option<String>,
}

impl Context {
    /// Flags and environment variables win over the settings file
    pub fn load(state_dir: Option<PathBuf>, region: Option<String>) -> anyhow::Result<Self> {
        let settings = bastionflow_config::load_settings()?;
        let state_dir = state_dir
            .or_else(|| settings.state_dir.clone())
            .unwrap_or_else(|| PathBuf::from("."));
        let region = region.or_else(|| settings.region.clone());
        Ok(Self {
            settings,
            state_dir,
            region,
        })
    }

    pub fn store(&self) -> FileLedgerStore {
        FileLedgerStore::new(&self.state_dir)
    }

    pub async fn provider(&self) -> anyhow::Result<AwsProvider> {
        let defaults = AwsProviderConfig::default();
        let config = AwsProviderConfig {
            region: self.region.clone(),
            resource_wait: self.settings.waiter.apply(defaults.resource_wait),
            database_wait: self.settings.database_waiter.apply(defaults.database_wait),
        };
        let provider = AwsProvider::connect(config).await?;
        tracing::debug!("Connected to AWS in {}", provider.region());
        Ok(provider)
    }
}

pub fn print_rollback_report(report: &RollbackReport) {
    println!();
    println!(
        "{}",
        format!("Rollback of '{}':", report.deployment_name).bold()
    );
    for entry in &report.entries {
        let line = format!("{} {}", entry.kind.label(), entry.id);
        match &entry.status {
            RollbackStatus::Deleted => println!("  {} {}", "✓".green(), line),
            RollbackStatus::AlreadyAbsent => {
                println!("  {} {} {}", "ℹ".blue(), line, "(already gone)".dimmed())
            }
            RollbackStatus::Failed { reason } => {
                println!("  {} {}: {}", "✗".red(), line, reason.red())
            }
        }
        for warning in &entry.warnings {
            println!("    {} {}", "⚠".yellow(), warning.yellow());
        }
    }

    let deleted = report.count(&RollbackStatus::Deleted);
    let absent = report.count(&RollbackStatus::AlreadyAbsent);
    println!();
    if report.is_success() {
        println!(
            "{}",
            format!(
                "✓ Rolled back '{}' ({} deleted, {} already gone, {}ms)",
                report.deployment_name, deleted, absent, report.duration_ms
            )
            .green()
            .bold()
        );
    } else {
        println!(
            "{}",
            format!(
                "⚠ Partially rolled back '{}': {} resource(s) could not be deleted",
                report.deployment_name,
                report.failed_count()
            )
            .yellow()
            .bold()
        );
        println!(
            "  {}",
            "The ledger was kept. Fix the problem and run rollback again.".dimmed()
        );
    }
}
