use super::{Context, print_rollback_report};
use crate::prompt::StdinPrompt;
use bastionflow_cloud::store::list_ledgers;
use bastionflow_cloud::{InteractiveOutcome, Orchestrator, RollbackResult, RollbackTarget};
use colored::Colorize;
use std::path::PathBuf;

fn print_nothing_stored(context: &Context) {
    println!(
        "{}",
        format!("ℹ No rollback ledgers in {}", context.state_dir.display()).dimmed()
    );
}

pub async fn handle(
    context: &Context,
    name: Option<String>,
    file: Option<PathBuf>,
) -> anyhow::Result<()> {
    let store = context.store();
    // Nothing to pick from, so AWS is never contacted
    if name.is_none() && file.is_none() && list_ledgers(&store).await?.is_empty() {
        print_nothing_stored(context);
        return Ok(());
    }

    let provider = context.provider().await?;
    let orchestrator = Orchestrator::new(&provider, &store);
    let mut prompt = StdinPrompt;

    let target = match (name, file) {
        (Some(name), _) => {
            println!("{}", format!("Rolling back '{}'...", name).yellow());
            RollbackTarget::Name(name)
        }
        (None, Some(file)) => {
            println!(
                "{}",
                format!("Rolling back from {}...", file.display()).yellow()
            );
            RollbackTarget::File(file)
        }
        (None, None) => RollbackTarget::Interactive(&mut prompt),
    };

    match orchestrator.rollback(target).await? {
        RollbackResult::Single(report) => {
            print_rollback_report(&report);
            if !report.is_success() {
                anyhow::bail!("Rollback of '{}' is incomplete", report.deployment_name);
            }
        }
        RollbackResult::Interactive(InteractiveOutcome::NothingToRollBack) => {
            print_nothing_stored(context);
        }
        RollbackResult::Interactive(InteractiveOutcome::Cancelled) => {
            println!("{}", "Rollback cancelled.".yellow());
        }
        RollbackResult::Interactive(InteractiveOutcome::Completed(results)) => {
            let mut incomplete = Vec::new();
            for result in results {
                match result.outcome {
                    Ok(report) => {
                        print_rollback_report(&report);
                        if !report.is_success() {
                            incomplete.push(result.key);
                        }
                    }
                    Err(reason) => {
                        println!();
                        println!(
                            "{}",
                            format!("✗ Could not roll back '{}': {}", result.key, reason).red()
                        );
                        incomplete.push(result.key);
                    }
                }
            }
            if !incomplete.is_empty() {
                anyhow::bail!("Rollback incomplete for: {}", incomplete.join(", "));
            }
        }
    }

    Ok(())
}
