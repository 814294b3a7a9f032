//! Core data models for setjudge.
//!
//! - `sets`: data contracts exchanged with the backend
//! - `config`: caller-tunable parameters
//! - `error`: error taxonomy

mod config;
mod error;
mod sets;

pub use config::*;
pub use error::*;
pub use sets::*;
