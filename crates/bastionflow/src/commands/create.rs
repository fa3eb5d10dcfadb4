use super::{Context, print_rollback_report};
use crate::ip;
use bastionflow_cloud::workflow::bastion::{
    ANY_SOURCE, DEFAULT_DB_NAME, DEFAULT_DB_USERNAME, DEFAULT_VPC_CIDR, normalize_ssh_source,
};
use bastionflow_cloud::{
    BastionRequest, BastionWorkflow, ComputeProfile, CreateOptions, CreateOutcome, CreateReport,
    DatabaseProfile, Orchestrator,
};
use clap::Args;
use colored::Colorize;

#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Deployment name; also names the VPC and the rollback ledger
    #[arg(long, visible_alias = "vpc-name")]
    pub name: String,

    /// VPC CIDR block
    #[arg(long, default_value = DEFAULT_VPC_CIDR)]
    pub vpc_cidr: String,

    /// EC2 key pair to create or reuse
    #[arg(long)]
    pub key_pair_name: String,

    /// Name tag of the bastion instance
    #[arg(long, visible_alias = "ec2-instance-name")]
    pub instance_name: String,

    /// Initial database name
    #[arg(long, default_value = DEFAULT_DB_NAME)]
    pub db_name: String,

    /// Database master username
    #[arg(long, default_value = DEFAULT_DB_USERNAME)]
    pub db_username: String,

    /// Database master password
    #[arg(long, env = "BASTIONFLOW_DB_PASSWORD", hide_env_values = true)]
    pub db_password: String,

    /// IPv4 address or CIDR allowed to SSH to the bastion (default: this machine's public IP)
    #[arg(long)]
    pub allowed_ssh_ip: Option<String>,

    /// Delete everything created so far if a step fails
    #[arg(long)]
    pub auto_rollback: bool,
}

pub async fn handle(context: &Context, args: CreateArgs) -> anyhow::Result<()> {
    let allowed_ssh_cidr = match args.allowed_ssh_ip.as_deref() {
        Some(source) => normalize_ssh_source(source)?,
        None => ssh_source_from_public_ip().await,
    };

    let mut request = BastionRequest::new(
        args.key_pair_name,
        args.instance_name,
        args.db_password,
    );
    request.vpc_cidr = args.vpc_cidr;
    request.db_name = args.db_name;
    request.db_username = args.db_username;
    request.allowed_ssh_cidr = allowed_ssh_cidr;
    if let Some(key_dir) = &context.settings.key_dir {
        request.key_dir = key_dir.clone();
    }
    request.compute = context.settings.compute.apply(ComputeProfile::default());
    request.database = context.settings.database.apply(DatabaseProfile::default());

    let workflow = BastionWorkflow::new(request);
    workflow.validate()?;

    println!(
        "{}",
        format!("Creating deployment '{}'...", args.name).blue()
    );
    println!(
        "SSH allowed from: {}",
        workflow.request().allowed_ssh_cidr.cyan()
    );

    let provider = context.provider().await?;
    let store = context.store();
    let orchestrator = Orchestrator::new(&provider, &store);
    let options = CreateOptions {
        auto_rollback: args.auto_rollback,
    };

    let report = orchestrator.create(&workflow, &args.name, &options).await?;
    print_create_report(&report, &store.path_for(&report.deployment_name).display().to_string());

    if report.is_success() {
        Ok(())
    } else {
        anyhow::bail!("Deployment '{}' was not created", report.deployment_name)
    }
}

async fn ssh_source_from_public_ip() -> String {
    match ip::detect_public_ip().await {
        Some(addr) => format!("{}/32", addr),
        None => {
            println!(
                "{}",
                format!(
                    "⚠ Could not detect this machine's public IP; SSH will be open to {}",
                    ANY_SOURCE
                )
                .yellow()
            );
            ANY_SOURCE.to_string()
        }
    }
}

fn print_create_report(report: &CreateReport, ledger_path: &str) {
    if !report.resources.is_empty() {
        println!();
        println!("{}", "Resources:".bold());
        for record in &report.resources {
            println!("  {} {}", record.kind.label(), record.id.cyan());
        }
    }

    if let Some(failure) = &report.failure {
        println!();
        println!("{}", format!("✗ {}", failure).red().bold());
    }

    if let Some(rollback) = &report.rollback {
        print_rollback_report(rollback);
    }

    println!();
    match report.outcome {
        CreateOutcome::Complete => {
            println!(
                "{}",
                format!("✓ Deployment '{}' created", report.deployment_name)
                    .green()
                    .bold()
            );
            for (role, id) in &report.summary {
                println!("  {}: {}", role, id.cyan());
            }
            println!();
            println!("Rollback ledger: {}", ledger_path.cyan());
            println!(
                "Remove everything with: {} rollback --name {}",
                "bastion".cyan(),
                report.deployment_name
            );
        }
        CreateOutcome::FailedRolledBack => {
            println!(
                "{}",
                "ℹ Every resource created before the failure was deleted".dimmed()
            );
        }
        CreateOutcome::FailedPartiallyRolledBack | CreateOutcome::FailedRetained => {
            println!(
                "{}",
                format!("⚠ Resources were left behind. Ledger: {}", ledger_path).yellow()
            );
            println!(
                "  Clean up with: {} rollback --name {}",
                "bastion".cyan(),
                report.deployment_name
            );
        }
    }
}
