// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 labflow contributors

//! Pipeline definitions and compilation
//!
//! This module defines the stage schema of a project pipeline and turns it
//! into the engine's stage graph: iteration expansion, per-kind command
//! synthesis, environment lock tracking, validation and dependency
//! analysis.

mod compiler;
mod dag;
mod definition;
pub mod iteration;
pub mod lock;
pub mod stages;
mod validation;

pub use compiler::{compile, PipelineCompiler};
pub use dag::DagBuilder;
pub use definition::*;
pub use validation::{PipelineValidator, ValidationResult};
