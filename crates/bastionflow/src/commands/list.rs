use super::Context;
use bastionflow_cloud::LedgerStatus;
use bastionflow_cloud::store::list_ledgers;
use colored::Colorize;

pub async fn handle(context: &Context) -> anyhow::Result<()> {
    let store = context.store();
    let listings = list_ledgers(&store).await?;

    if listings.is_empty() {
        println!(
            "{}",
            format!("ℹ No rollback ledgers in {}", context.state_dir.display()).dimmed()
        );
        return Ok(());
    }

    println!(
        "{}",
        format!("Rollback ledgers in {}:", context.state_dir.display()).bold()
    );
    println!();
    println!(
        "{:<24} {:<24} {:<10} {}",
        "DEPLOYMENT".bold(),
        "STATUS".bold(),
        "RESOURCES".bold(),
        "CREATED".bold()
    );
    for listing in &listings {
        match &listing.details {
            Ok(info) => {
                let status = info.status.to_string();
                let status = match info.status {
                    LedgerStatus::Complete => status.green(),
                    LedgerStatus::InProgress => status.blue(),
                    LedgerStatus::Failed | LedgerStatus::PartiallyRolledBack => status.yellow(),
                };
                println!(
                    "{:<24} {:<24} {:<10} {}",
                    info.deployment_name.cyan(),
                    status,
                    info.resource_count,
                    info.created_at.format("%Y-%m-%d %H:%M:%S UTC")
                );
            }
            Err(reason) => {
                println!(
                    "{:<24} {}",
                    listing.key.cyan(),
                    format!("unreadable: {}", reason).red()
                );
            }
        }
    }

    Ok(())
}
