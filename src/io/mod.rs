//! Input/output helpers.
//!
//! - survey CSV ingest + validation (`ingest`)
//! - ribbon CSV and summary JSON exports (`export`)

pub mod export;
pub mod ingest;

pub use export::*;
pub use ingest::*;
