//! Structured-output contracts: schema documents, descriptors and validation.

mod descriptor;
mod registry;
mod validator;

pub use descriptor::*;
pub use registry::*;
pub use validator::*;
