pub mod config;
pub mod conversation;
pub mod engine;
pub mod error;
pub mod orchestrator;
pub mod responder;
pub mod router;
pub mod services;
pub mod state;
pub mod underwriting;

#[cfg(test)]
mod testing;

// Re-exports for convenience
pub use config::EngineConfig;
pub use conversation::{Context, Reply, Stage};
pub use engine::LoanEngine;
pub use error::{LoanflowError, Result};
