// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 labflow contributors

//! # labflow - Research Pipeline Compiler
//!
//! `labflow` compiles a declarative research project (`labflow.yaml`) into
//! the stage graph of a content-addressed pipeline engine (`dvc.yaml`).
//!
//! ## Features
//!
//! - **Typed stages** - scripts, notebooks, LaTeX, batch jobs and more
//! - **Iteration** - parameter sweeps become engine matrices
//! - **Environment locks** - stages rerun when their environment drifts
//! - **Safe recompilation** - hand-written stages survive untouched
//!
//! ## Quick Start
//!
//! ```bash
//! # Initialize a new project
//! labflow init my-study
//!
//! # Validate it
//! labflow check
//!
//! # Write dvc.yaml
//! labflow compile
//! ```

pub mod cli;
pub mod errors;
pub mod graph;
pub mod pipeline;
pub mod project;
pub mod utils;

// Re-export commonly used types
pub use errors::{LabflowError, LabflowResult};
pub use graph::StageGraph;
pub use pipeline::{compile, Pipeline, PipelineCompiler, Stage};
pub use project::Project;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
