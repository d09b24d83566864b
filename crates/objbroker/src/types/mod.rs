//! Core broker types

mod args;
mod error;

pub use args::Args;
pub use error::{BrokerError, ObjectError, Result};
