//! Mathematical utilities: SPD solves, descriptive statistics, Nelder–Mead.

pub mod linalg;
pub mod optim;
pub mod stats;

pub use linalg::*;
pub use optim::*;
pub use stats::*;
