pub mod adapters;
pub mod cli;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;

pub use config::AppConfig;
pub use engine::{
    ExecutionOutcome, OrderOrchestrator, PocketLifecycleController, ReconciliationEngine,
    RequirementsReport, WorkflowReport,
};
pub use error::{PocketError, Result};
