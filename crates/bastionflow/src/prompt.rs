use bastionflow_cloud::{LedgerListing, Prompt};
use colored::Colorize;
use std::io::{self, BufRead, Write};

/// Asks on the terminal which ledger to roll back
pub struct StdinPrompt;

impl Prompt for StdinPrompt {
    fn choose(&mut self, listings: &[LedgerListing]) -> io::Result<Option<String>> {
        println!("{}", "Stored rollback ledgers:".bold());
        for (index, listing) in listings.iter().enumerate() {
            let details = match &listing.details {
                Ok(info) => format!(
                    "{} resource(s), {}, created {}",
                    info.resource_count,
                    info.status,
                    info.created_at.format("%Y-%m-%d %H:%M:%S UTC")
                ),
                Err(reason) => format!("unreadable: {}", reason).red().to_string(),
            };
            println!(
                "  [{}] {} ({})",
                index + 1,
                listing.key.cyan(),
                details
            );
        }
        println!("  [a] all");
        println!("  [q] cancel");
        print!("Select: ");
        io::stdout().flush()?;

        let mut answer = String::new();
        if io::stdin().lock().read_line(&mut answer)? == 0 {
            println!();
            return Ok(None);
        }
        Ok(Some(answer))
    }
}
