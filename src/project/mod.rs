// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 labflow contributors

//! Project file
//!
//! Defines the schema for labflow.yaml: named parameters, environments,
//! the pipeline itself, and compiler settings.

mod environment;

pub use environment::{EnvKind, Environment};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::errors::{LabflowError, LabflowResult};
use crate::pipeline::iteration::Parameters;
use crate::pipeline::Pipeline;

/// Default project file name
pub const PROJECT_FILE: &str = "labflow.yaml";

/// Default compiled graph file name
pub const GRAPH_FILE: &str = "dvc.yaml";

/// A loaded project
#[derive(Debug, Clone, Default)]
pub struct Project {
    pub name: Option<String>,
    pub description: Option<String>,
    pub parameters: Parameters,
    pub environments: IndexMap<String, Environment>,
    pub pipeline: Pipeline,
    pub compiler: CompilerConfig,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawProject {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parameters: Parameters,
    #[serde(default)]
    environments: IndexMap<String, Environment>,
    #[serde(default)]
    pipeline: RawPipeline,
    #[serde(default)]
    compiler: CompilerConfig,
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RawPipeline {
    #[serde(default)]
    stages: IndexMap<String, serde_yaml::Value>,
}

impl Project {
    /// Load project from a YAML file
    pub fn from_file(path: &Path) -> LabflowResult<Self> {
        if !path.exists() {
            return Err(LabflowError::ProjectNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| LabflowError::FileReadError {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Self::from_yaml(&content)
    }

    /// Parse project from YAML string
    pub fn from_yaml(yaml: &str) -> LabflowResult<Self> {
        let raw: RawProject = serde_yaml::from_str(yaml)
            .map_err(|e| LabflowError::InvalidProject { reason: e.to_string() })?;

        Ok(Self {
            name: raw.name,
            description: raw.description,
            parameters: raw.parameters,
            environments: raw.environments,
            pipeline: Pipeline::from_stage_values(raw.pipeline.stages)?,
            compiler: raw.compiler,
        })
    }
}

/// Compiler settings, overridable from the command line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompilerConfig {
    /// Where the compiled graph is written
    #[serde(default = "default_output")]
    pub output: PathBuf,

    /// Architecture used in lock paths, defaults to the host
    #[serde(default)]
    pub architecture: Option<String>,

    /// Reject stages whose environment is not declared
    #[serde(default)]
    pub strict_environments: bool,

    /// Drop private stages the compiler no longer produces
    #[serde(default)]
    pub prune_stale_stages: bool,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
            architecture: None,
            strict_environments: false,
            prune_stale_stages: false,
        }
    }
}

fn default_output() -> PathBuf {
    PathBuf::from(GRAPH_FILE)
}
