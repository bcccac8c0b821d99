pub mod completion;
pub mod config;
pub mod error;
pub mod logger;
pub mod models;
pub mod rag;

pub use error::{CompletionError, Error, Result};
