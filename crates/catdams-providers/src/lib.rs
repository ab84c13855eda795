pub mod breaker;
pub mod chat;
pub mod error;
pub mod gateway;
pub mod provider;
pub mod text;

pub use error::GatewayError;
pub use gateway::{AnalysisGateway, ResponseSchema};
pub use provider::{TextService, TextSignals};
