pub mod cache;
pub mod config;
pub mod error;
pub mod types;

pub use config::CatdamsConfig;
pub use error::{CatdamsError, Result};
pub use types::{
    AnalysisMode, ConversationContext, Event, InteractionRecord, Module, ModuleOutput,
    RecommendedAction, Sender, SessionId, Severity, Verdict,
};
