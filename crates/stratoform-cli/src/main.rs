//! `strato`: reconcile the AWS resources of a stack file.
//!
//! ```sh
//! strato --config stack.toml plan
//! strato --config stack.toml apply
//! strato --config stack.toml destroy --force
//! strato --config stack.toml rest-api orders
//! ```
//!
//! Run with `RUST_LOG=info` to see each lifecycle step.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use colored::Colorize;
use strato::{aws::Aws, config::StackConfig, Action, Plan, Store};

#[derive(Parser)]
#[command(name = "strato", version, about = "Reconcile declared AWS resources")]
struct Cli {
    /// Stack file declaring the provider and resources.
    #[arg(long, env = "STRATO_CONFIG", default_value = "stack.toml")]
    config: PathBuf,

    /// Directory for resource state files.
    #[arg(long, env = "STRATO_STATE_DIR", default_value = "state")]
    state_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show what would change without applying.
    Plan,
    /// Plan and apply changes.
    Apply,
    /// Tear down every stored resource.
    Destroy {
        #[clap(long, short, default_value = "false")]
        force: bool,
    },
    /// Print an existing API Gateway REST API, looked up by name.
    RestApi { name: String },
}

fn print_plan(plan: &Plan<Aws>) {
    println!("Plan:");
    if plan.actions.is_empty() {
        println!("  {}", "No changes.".dimmed());
    }
    for action in &plan.actions {
        let verb = action.action.to_string();
        let verb = match action.action {
            Action::Create => verb.green(),
            Action::Read => verb.dimmed(),
            Action::Import => verb.cyan(),
            Action::Update => verb.yellow(),
            Action::Replace => verb.magenta(),
            Action::Destroy => verb.red(),
        };
        let ty = action.type_name.as_deref().unwrap_or("unknown");
        let orphan = if action.is_orphan { " (orphan)" } else { "" };
        println!("  {verb} '{}' [{ty}]{orphan}", action.id);
    }
    for warning in &plan.warnings {
        println!("  {} {warning}", "WARNING:".yellow().bold());
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();

    let config = StackConfig::from_path(&cli.config)?;
    log::info!(
        "loaded {} resources from {:?}",
        config.resource.len(),
        cli.config
    );
    let aws = Aws::load(&config.provider).await?;
    let mut store = Store::new(&cli.state_dir, aws);
    strato::aws::register_all(&mut store);
    log::debug!("state directory is {:?}", cli.state_dir);

    match cli.command {
        Command::RestApi { name } => {
            let api = strato::aws::apigateway::rest_api_by_name(store.provider(), &name).await?;
            println!("{}", serde_json::to_string_pretty(&api)?);
        }
        Command::Plan => {
            config.declare(&mut store)?;
            let plan = store.plan()?;
            print_plan(&plan);
        }
        Command::Apply => {
            config.declare(&mut store)?;
            let plan = store.plan()?;
            print_plan(&plan);
            println!();
            println!("Applying...");
            if !plan.has_changes() {
                log::info!("nothing to change, refreshing stored state only");
            }
            store.apply(plan).await?;
            println!("{}", "Done.".green());
        }
        Command::Destroy { force } => {
            // Nothing is declared, so every stored resource is an orphan.
            let plan = store.plan()?;
            print_plan(&plan);
            if force {
                println!();
                println!("Applying...");
                store.apply(plan).await?;
                println!("{}", "Done.".green());
            } else {
                log::warn!("destroy without --force, nothing was deleted");
                println!();
                println!("Please call `destroy --force` to delete these resources.");
            }
        }
    }

    Ok(())
}
