//! Bayesian GLMM fitting.
//!
//! - priors and their log-densities (`priors`)
//! - multi-chain Metropolis-within-Gibbs sampler (`sampler`)
//! - split R-hat / effective sample size (`diagnostics`)
//! - posterior predictive matrices on a grid (`predict`)

pub mod diagnostics;
pub mod predict;
pub mod priors;
pub mod sampler;

pub use diagnostics::*;
pub use predict::*;
pub use priors::*;
pub use sampler::*;
