//! Poisson GLMM structure shared by the frequentist and Bayesian fitters.
//!
//! The model is implemented as small, pure functions and a `Design` value so
//! that fitting and sampling code can stay generic over the response vector.

pub mod formula;
pub mod grid;

pub use formula::*;
pub use grid::*;
