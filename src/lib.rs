//! `glmm-bands` library crate.
//!
//! The binary (`bands`) is a thin wrapper around this library so that:
//!
//! - core logic is testable without spawning processes
//! - the frequentist and Bayesian fitters can be reused on their own
//! - code stays easy to navigate as the project grows

pub mod app;
pub mod bayes;
pub mod cli;
pub mod data;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod math;
pub mod models;
pub mod plot;
pub mod report;
pub mod tui;
