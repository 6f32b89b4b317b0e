//! HTTP handlers served next to the worker.

pub mod config;
pub mod jobs;
pub mod token;

pub use config::*;
pub use jobs::*;
pub use token::*;
