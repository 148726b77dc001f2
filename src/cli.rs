//! Operational CLI: one subcommand per workflow, printing the boundary
//! response as JSON. The HTTP layer in front of this engine is out of scope;
//! this is the operator's way to drive the same code paths.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::adapters::PostgresStore;
use crate::domain::{with_status_hint, RequiredAction, WorkflowResponse};
use crate::engine::{PocketLifecycleController, WorkflowReport};
use crate::error::Result;

#[derive(Parser)]
#[command(
    name = "pockets",
    about = "Pocket basket execution and reconciliation engine",
    version
)]
pub struct Cli {
    /// Configuration directory
    #[arg(long, default_value = "config")]
    pub config_dir: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Compute buy requirements and classify the required action
    Reconcile {
        #[arg(long)]
        client: String,
        #[arg(long)]
        pocket: String,
        /// Version to reconcile against (defaults to the held version)
        #[arg(long)]
        version: Option<i32>,
        /// Lot size to reconcile against (defaults to the held lot size)
        #[arg(long)]
        lots: Option<i64>,
    },
    /// Buy lots of a pocket
    Buy {
        #[arg(long)]
        client: String,
        #[arg(long)]
        pocket: String,
        #[arg(long, default_value_t = 1)]
        lots: i64,
    },
    /// Sell lots of a held pocket
    Sell {
        #[arg(long)]
        client: String,
        #[arg(long)]
        pocket: String,
        #[arg(long, default_value_t = 1)]
        lots: i64,
    },
    /// Ledger-only exit: decrement the holding without placing orders
    Exit {
        #[arg(long)]
        client: String,
        #[arg(long)]
        pocket: String,
        #[arg(long, default_value_t = 1)]
        lots: i64,
    },
    /// Reconcile, then repair or rebalance the shortfall in one go
    Sync {
        #[arg(long)]
        client: String,
        #[arg(long)]
        pocket: String,
    },
    /// Recent transaction history for a client
    History {
        #[arg(long)]
        client: String,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Run database migrations and exit
    Migrate,
}

/// Dispatch a subcommand; returns the process exit code.
pub async fn run(
    command: Commands,
    controller: &PocketLifecycleController,
    store: &PostgresStore,
) -> Result<i32> {
    match command {
        Commands::Reconcile {
            client,
            pocket,
            version,
            lots,
        } => {
            let report = controller
                .compute_requirements(&client, &pocket, version, lots)
                .await;
            match report {
                Ok(report) => {
                    println!("{}", serde_json::to_string_pretty(&report)?);
                    Ok(0)
                }
                Err(e) => {
                    print_response(e.status_hint(), &WorkflowResponse::failure(e.to_string()))?;
                    Ok(1)
                }
            }
        }
        Commands::Buy {
            client,
            pocket,
            lots,
        } => {
            let result = controller.buy(&client, &pocket, lots).await;
            emit(result)
        }
        Commands::Sell {
            client,
            pocket,
            lots,
        } => {
            let result = controller.sell(&client, &pocket, lots).await;
            emit(result)
        }
        Commands::Exit {
            client,
            pocket,
            lots,
        } => {
            let result = controller.exit(&client, &pocket, lots).await;
            emit(result)
        }
        Commands::Sync { client, pocket } => {
            let requirements = match controller
                .compute_requirements(&client, &pocket, None, None)
                .await
            {
                Ok(requirements) => requirements,
                Err(e) => {
                    print_response(e.status_hint(), &WorkflowResponse::failure(e.to_string()))?;
                    return Ok(1);
                }
            };

            if requirements.action == RequiredAction::None {
                print_response(
                    200,
                    &WorkflowResponse::ok(requirements.message.clone(), &requirements),
                )?;
                return Ok(0);
            }

            let result = controller
                .manage_required_stocks(
                    &client,
                    &pocket,
                    requirements.action,
                    &requirements.requirements,
                )
                .await;
            emit(result)
        }
        Commands::History { client, limit } => {
            let transactions = store.recent_transactions(&client, limit).await?;
            println!("{}", serde_json::to_string_pretty(&transactions)?);
            Ok(0)
        }
        Commands::Migrate => {
            store.migrate().await?;
            Ok(0)
        }
    }
}

fn emit(result: Result<WorkflowReport>) -> Result<i32> {
    let (hint, response) = with_status_hint(result.map(WorkflowReport::into_response));
    let ok = response.status;
    print_response(hint, &response)?;
    Ok(if ok { 0 } else { 1 })
}

fn print_response(hint: u16, response: &WorkflowResponse) -> Result<()> {
    eprintln!("status hint: {}", hint);
    println!("{}", serde_json::to_string_pretty(response)?);
    Ok(())
}
