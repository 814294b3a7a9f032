//! Prompt construction: envelopes and the builder that produces them.

mod builder;
mod envelope;

pub use builder::*;
pub use envelope::*;
