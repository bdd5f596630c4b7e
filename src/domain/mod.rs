//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - survey rows before and after the feature transform (`SurveyRecord`, `Observation`)
//! - grouping-factor bookkeeping (`GroupFactor`, `GroupIndex`)
//! - prediction inputs/outputs (`PredictionGrid`, `SampleMatrix`, `IntervalBand`)
//! - run configuration (`AnalysisConfig`)

pub mod types;

pub use types::*;
