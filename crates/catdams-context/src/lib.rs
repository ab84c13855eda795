pub mod builder;
pub mod hints;

pub use builder::ContextBuilder;
