pub mod db;
pub mod error;
pub mod sink;

pub use error::SinkError;
pub use sink::{SeverityCounts, VerdictSink};
