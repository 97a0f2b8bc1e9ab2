//! # tfctl
//!
//! Command-line interface for Terraform resources managed by the controller.
//!
//! ## Usage
//!
//! ```bash
//! # Approve the pending plan
//! tfctl approve --name helloworld --namespace flux-system
//!
//! # Throw the pending plan away and plan again
//! tfctl replan --name helloworld
//!
//! # Ask the controller to reconcile now
//! tfctl reconcile --name helloworld
//!
//! # Pause and resume reconciliation
//! tfctl suspend --name helloworld
//! tfctl resume --name helloworld
//!
//! # Inspect resources
//! tfctl list
//! tfctl status --name helloworld --output yaml
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use controller::constants::RECONCILE_REQUEST_ANNOTATION;
use controller::crd::{ConditionStatus, ConditionType, Reason, Terraform};
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::Client;
use serde_json::json;

const FIELD_MANAGER: &str = "tfctl";

/// Terraform controller CLI
#[derive(Parser)]
#[command(name = "tfctl")]
#[command(about = "Manage Terraform resources reconciled by the Terraform controller", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Kubernetes namespace
    #[arg(short, long, global = true, default_value = "flux-system")]
    namespace: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Approve a plan; defaults to the pending one
    Approve {
        #[arg(long)]
        name: String,
        /// Plan identifier to approve instead of the pending plan
        #[arg(long)]
        plan: Option<String>,
    },
    /// Discard the pending plan and request a new one
    Replan {
        #[arg(long)]
        name: String,
    },
    /// Request an immediate reconciliation
    Reconcile {
        #[arg(long)]
        name: String,
    },
    /// Stop reconciling a resource
    Suspend {
        #[arg(long)]
        name: String,
    },
    /// Resume reconciling a resource
    Resume {
        #[arg(long)]
        name: String,
    },
    /// List Terraform resources
    List {
        /// List across every namespace
        #[arg(short = 'A', long)]
        all_namespaces: bool,
    },
    /// Show the status of a Terraform resource
    Status {
        #[arg(long)]
        name: String,
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        output: OutputFormat,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Yaml,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tfctl=warn".into()),
        )
        .init();

    let cli = Cli::parse();
    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client. Ensure kubeconfig is configured.")?;
    let namespace = cli.namespace;
    let api: Api<Terraform> = Api::namespaced(client.clone(), &namespace);

    match cli.command {
        Commands::Approve { name, plan } => approve_command(&api, &namespace, &name, plan).await,
        Commands::Replan { name } => replan_command(&api, &namespace, &name).await,
        Commands::Reconcile { name } => {
            request_reconciliation(&api, &name).await?;
            println!("Reconciliation requested for {namespace}/{name}");
            Ok(())
        }
        Commands::Suspend { name } => set_suspend(&api, &namespace, &name, true).await,
        Commands::Resume { name } => set_suspend(&api, &namespace, &name, false).await,
        Commands::List { all_namespaces } => {
            let api = if all_namespaces { Api::all(client) } else { api };
            list_command(&api).await
        }
        Commands::Status { name, output } => status_command(&api, &namespace, &name, output).await,
    }
}

async fn get(api: &Api<Terraform>, namespace: &str, name: &str) -> Result<Terraform> {
    api.get(name)
        .await
        .with_context(|| format!("Failed to get Terraform '{namespace}/{name}'"))
}

async fn patch_spec(api: &Api<Terraform>, name: &str, spec: serde_json::Value) -> Result<()> {
    api.patch(
        name,
        &PatchParams::apply(FIELD_MANAGER),
        &Patch::Merge(json!({ "spec": spec })),
    )
    .await
    .with_context(|| format!("Failed to patch Terraform '{name}'"))?;
    Ok(())
}

async fn request_reconciliation(api: &Api<Terraform>, name: &str) -> Result<()> {
    let requested_at = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Nanos, true);
    let patch = json!({
        "metadata": { "annotations": { RECONCILE_REQUEST_ANNOTATION: requested_at } }
    });
    api.patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(patch))
        .await
        .with_context(|| format!("Failed to request reconciliation of '{name}'"))?;
    Ok(())
}

async fn approve_command(
    api: &Api<Terraform>,
    namespace: &str,
    name: &str,
    plan: Option<String>,
) -> Result<()> {
    let plan = match plan {
        Some(plan) => plan,
        None => {
            let pending = get(api, namespace, name).await?.status_or_default().plan.pending;
            if pending.is_empty() {
                bail!("Terraform '{namespace}/{name}' has no pending plan");
            }
            pending
        }
    };
    patch_spec(api, name, json!({ "approvePlan": plan })).await?;
    println!("Plan {plan} approved for {namespace}/{name}");
    Ok(())
}

/// Clears the pending plan and the last plan time so the next pass plans again
async fn replan_command(api: &Api<Terraform>, namespace: &str, name: &str) -> Result<()> {
    let terraform = get(api, namespace, name).await?;
    let mut status = terraform.status_or_default();
    if status.plan.pending.is_empty() {
        bail!("Terraform '{namespace}/{name}' has no pending plan to replace");
    }
    status.plan.pending.clear();
    status.last_plan_at = None;
    status.set_condition(
        ConditionType::Ready,
        ConditionStatus::False,
        Reason::ReplanRequested,
        "Replan requested",
    );
    api.patch_status(
        name,
        &PatchParams::apply(FIELD_MANAGER),
        &Patch::Merge(json!({ "status": status })),
    )
    .await
    .with_context(|| format!("Failed to clear the pending plan of '{namespace}/{name}'"))?;

    request_reconciliation(api, name).await?;
    println!("Replan requested for {namespace}/{name}");
    Ok(())
}

async fn set_suspend(api: &Api<Terraform>, namespace: &str, name: &str, suspend: bool) -> Result<()> {
    patch_spec(api, name, json!({ "suspend": suspend })).await?;
    if suspend {
        println!("Reconciliation suspended for {namespace}/{name}");
    } else {
        request_reconciliation(api, name).await?;
        println!("Reconciliation resumed for {namespace}/{name}");
    }
    Ok(())
}

async fn list_command(api: &Api<Terraform>) -> Result<()> {
    let terraforms = api
        .list(&ListParams::default())
        .await
        .context("Failed to list Terraform resources")?;
    if terraforms.items.is_empty() {
        println!("No Terraform resources found.");
        return Ok(());
    }

    println!(
        "{:<20} {:<30} {:<8} {:<10} {:<30} {}",
        "NAMESPACE", "NAME", "READY", "SUSPENDED", "PENDING PLAN", "MESSAGE"
    );
    for terraform in terraforms.items {
        let status = terraform.status_or_default();
        let ready = status.condition_of(ConditionType::Ready);
        println!(
            "{:<20} {:<30} {:<8} {:<10} {:<30} {}",
            terraform.namespace_or_default(),
            terraform.name(),
            ready.map_or("Unknown", |c| c.status.as_str()),
            terraform.spec.suspend,
            status.plan.pending,
            ready.and_then(|c| c.message.as_deref()).unwrap_or_default(),
        );
    }
    Ok(())
}

async fn status_command(
    api: &Api<Terraform>,
    namespace: &str,
    name: &str,
    output: OutputFormat,
) -> Result<()> {
    let terraform = get(api, namespace, name).await?;
    let status = terraform.status_or_default();

    if let OutputFormat::Yaml = output {
        print!("{}", serde_yaml::to_string(&status).context("Failed to render status")?);
        return Ok(());
    }

    println!("Terraform {namespace}/{name}");
    println!("  Source: {}/{}", terraform.spec.source_ref.kind, terraform.spec.source_ref.name);
    println!("  Approve plan: {}", terraform.spec.approve_plan);
    println!("  Suspended: {}", terraform.spec.suspend);
    println!("  Last applied revision: {}", status.last_applied_revision);
    println!("  Last planned revision: {}", status.last_planned_revision);
    println!("  Pending plan: {}", status.plan.pending);
    println!("  Failures: {}", status.reconciliation_failures);
    if !status.available_outputs.is_empty() {
        println!("  Outputs: {}", status.available_outputs.join(", "));
    }
    if !status.conditions.is_empty() {
        println!("\nConditions:");
        for condition in &status.conditions {
            println!("  {}: {}", condition.r#type, condition.status);
            if let Some(reason) = &condition.reason {
                println!("    Reason: {reason}");
            }
            if let Some(message) = &condition.message {
                println!("    Message: {message}");
            }
        }
    }
    Ok(())
}
