//! Terminal plots (fixed-size character grids).

pub mod ascii;

pub use ascii::*;
