//! Frequentist GLMM fitting.
//!
//! Responsibilities:
//!
//! - Laplace-approximate maximum likelihood (`mle`)
//! - point predictions on a grid (`predict`)
//! - parametric bootstrap of those predictions (parallel) (`bootstrap`)

pub mod bootstrap;
pub mod mle;
pub mod predict;

pub use bootstrap::*;
pub use mle::*;
pub use predict::*;
