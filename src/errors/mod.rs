// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 labflow contributors

//! Error types
//!
//! Every fatal condition raised while loading or compiling a project maps
//! to one variant here. Errors carry the stage (and field or axis) they
//! were raised for so the CLI can print them verbatim.

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for labflow operations
pub type LabflowResult<T> = Result<T, LabflowError>;

/// Main error type for labflow
#[derive(Error, Debug, Diagnostic)]
pub enum LabflowError {
    // ─────────────────────────────────────────────────────────────────────────
    // Schema Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Invalid project file: {reason}")]
    #[diagnostic(
        code(labflow::invalid_project),
        help("Top-level keys are: name, description, parameters, environments, pipeline, compiler")
    )]
    InvalidProject { reason: String },

    #[error("Stage '{stage}' is invalid at '{field}': {reason}")]
    #[diagnostic(
        code(labflow::schema_violation),
        help("Check the stage definition against the fields allowed for its kind")
    )]
    SchemaViolation {
        stage: String,
        field: String,
        reason: String,
    },

    #[error("Stage '{stage}' has a malformed iteration over '{axis}': {reason}")]
    #[diagnostic(
        code(labflow::malformed_iteration),
        help("Linked arguments need one list of exactly as many values per entry")
    )]
    MalformedIteration {
        stage: String,
        axis: String,
        reason: String,
    },

    #[error("Parameter '{parameter}' referenced by stage '{stage}' is not defined")]
    #[diagnostic(
        code(labflow::parameter_not_found),
        help("Add '{parameter}' to the project's 'parameters' section")
    )]
    ParameterNotFound { stage: String, parameter: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Environment Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Stage '{stage}' does not declare an environment")]
    #[diagnostic(
        code(labflow::missing_environment),
        help("Set 'environment' to a declared environment name, or '_system' to run on the host")
    )]
    MissingEnvironment { stage: String },

    #[error("Stage '{stage}' uses undeclared environment '{environment}'")]
    #[diagnostic(
        code(labflow::unknown_environment),
        help("Declare '{environment}' under 'environments' or disable strict environment checking")
    )]
    UnknownEnvironment { stage: String, environment: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Graph Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Stage '{stage}' consumes outputs of unknown stage '{reference}'")]
    #[diagnostic(
        code(labflow::dangling_stage_reference),
        help("Check that '{reference}' is defined in the pipeline")
    )]
    DanglingStageReference { stage: String, reference: String },

    #[error("Circular dependency detected: {}", stages.join(" -> "))]
    #[diagnostic(
        code(labflow::circular_dependency),
        help("A stage (directly or transitively) depends on its own outputs")
    )]
    CircularDependency { stages: Vec<String> },

    // ─────────────────────────────────────────────────────────────────────────
    // File Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Project file not found: {path}")]
    #[diagnostic(
        code(labflow::project_not_found),
        help("Create a project with 'labflow init' or write labflow.yaml manually")
    )]
    ProjectNotFound { path: PathBuf },

    #[error("Failed to read file '{path}': {error}")]
    #[diagnostic(code(labflow::file_read_error))]
    FileReadError { path: PathBuf, error: String },

    #[error("Failed to write file '{path}': {error}")]
    #[diagnostic(code(labflow::file_write_error))]
    FileWriteError { path: PathBuf, error: String },

    // ─────────────────────────────────────────────────────────────────────────
    // IO/System Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("IO error: {message}")]
    #[diagnostic(code(labflow::io_error))]
    Io { message: String },

    #[error("YAML parsing error: {message}")]
    #[diagnostic(code(labflow::yaml_error))]
    Yaml { message: String },

    #[error("JSON error: {message}")]
    #[diagnostic(code(labflow::json_error))]
    Json { message: String },
}

impl From<std::io::Error> for LabflowError {
    fn from(e: std::io::Error) -> Self {
        Self::Io { message: e.to_string() }
    }
}

impl From<serde_yaml::Error> for LabflowError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Yaml { message: e.to_string() }
    }
}

impl From<serde_json::Error> for LabflowError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json { message: e.to_string() }
    }
}

impl LabflowError {
    /// Schema violation for a whole stage (no single offending field)
    pub fn invalid_stage(stage: &str, reason: impl Into<String>) -> Self {
        Self::SchemaViolation {
            stage: stage.to_string(),
            field: stage.to_string(),
            reason: reason.into(),
        }
    }

    /// Schema violation for a field below a stage, e.g. `train.outputs[1]`
    pub fn invalid_field(stage: &str, field: &str, reason: impl Into<String>) -> Self {
        Self::SchemaViolation {
            stage: stage.to_string(),
            field: format!("{}.{}", stage, field),
            reason: reason.into(),
        }
    }

    /// The stage this error was raised for, if any
    pub fn stage(&self) -> Option<&str> {
        match self {
            Self::SchemaViolation { stage, .. }
            | Self::MalformedIteration { stage, .. }
            | Self::ParameterNotFound { stage, .. }
            | Self::MissingEnvironment { stage }
            | Self::UnknownEnvironment { stage, .. }
            | Self::DanglingStageReference { stage, .. } => Some(stage),
            _ => None,
        }
    }
}
