//! Survey data preparation.
//!
//! - feature transform from validated records to model observations (`transform`)
//! - synthetic survey generation with known truth (`sample`)

pub mod sample;
pub mod transform;

pub use sample::*;
pub use transform::*;
