//! Command channel state and response handlers.

pub mod handlers;
pub mod machine;

pub use handlers::{HandleResult, ParamOutcome};
pub use machine::{ActiveCommand, CommandChannel, data_words};
