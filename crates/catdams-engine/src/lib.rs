pub mod fusion;
pub mod hub;
pub mod orchestrator;
pub mod retry;

pub use fusion::FusionEngine;
pub use hub::{StreamFilter, VerdictHub, VerdictStream};
pub use orchestrator::Orchestrator;
