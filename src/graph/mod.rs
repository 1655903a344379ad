// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 labflow contributors

//! Compiled stage graph
//!
//! The document handed to the execution engine (`dvc.yaml`). Entries the
//! compiler produced are typed; everything read back from a previous file
//! is kept as raw YAML so hand-written stages survive recompilation
//! untouched.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::errors::LabflowResult;
use crate::pipeline::iteration::Matrix;
use crate::pipeline::stages::OutputArtifact;

/// Name prefix of compiler-managed environment check stages
pub const CHECK_ENV_PREFIX: &str = "_check-env-";

/// Name prefix of compiler-managed notebook cleaning stages
pub const CLEAN_NB_PREFIX: &str = "_clean-nb-";

/// Whether `name` follows a private naming convention
pub fn is_private_stage(name: &str) -> bool {
    name.starts_with(CHECK_ENV_PREFIX) || name.starts_with(CLEAN_NB_PREFIX)
}

/// One stage as the engine sees it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphStage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matrix: Option<Matrix>,

    pub cmd: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wdir: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deps: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outs: Vec<GraphOutput>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub always_changed: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
}

impl GraphStage {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            matrix: None,
            cmd: cmd.into(),
            wdir: None,
            deps: vec![],
            outs: vec![],
            always_changed: false,
            desc: None,
        }
    }

    /// Append a dependency unless already present
    pub fn add_dependency(&mut self, path: &str) {
        if !self.deps.iter().any(|d| d == path) {
            self.deps.push(path.to_string());
        }
    }

    pub fn output_paths(&self) -> impl Iterator<Item = &str> {
        self.outs.iter().map(GraphOutput::path)
    }
}

/// Output entry: bare path, or path with cache/persist flags
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GraphOutput {
    Path(String),
    Detailed(IndexMap<String, OutputFlags>),
}

/// Engine flags for a single output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputFlags {
    pub cache: bool,
    pub persist: bool,
}

impl GraphOutput {
    pub fn path(&self) -> &str {
        match self {
            Self::Path(p) => p,
            Self::Detailed(map) => map.keys().next().map(String::as_str).unwrap_or_default(),
        }
    }
}

impl From<OutputArtifact> for GraphOutput {
    /// Cached, non-persistent outputs are written as bare paths
    fn from(out: OutputArtifact) -> Self {
        if out.storage.is_cached() && !out.persist {
            return Self::Path(out.path);
        }
        let mut map = IndexMap::with_capacity(1);
        map.insert(
            out.path,
            OutputFlags {
                cache: out.storage.is_cached(),
                persist: out.persist,
            },
        );
        Self::Detailed(map)
    }
}

/// A graph entry: freshly compiled, or carried over verbatim
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum GraphEntry {
    Managed(GraphStage),
    Unmanaged(serde_yaml::Value),
}

impl GraphEntry {
    /// Dependency paths, best effort for carried-over entries
    pub fn dependency_paths(&self) -> Vec<String> {
        match self {
            Self::Managed(stage) => stage.deps.clone(),
            Self::Unmanaged(value) => value
                .get("deps")
                .and_then(serde_yaml::Value::as_sequence)
                .map(|seq| {
                    seq.iter()
                        .filter_map(serde_yaml::Value::as_str)
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
        }
    }

    /// Output paths, best effort for carried-over entries
    pub fn output_paths(&self) -> Vec<String> {
        match self {
            Self::Managed(stage) => stage.output_paths().map(String::from).collect(),
            Self::Unmanaged(value) => value
                .get("outs")
                .and_then(serde_yaml::Value::as_sequence)
                .map(|seq| {
                    seq.iter()
                        .filter_map(|out| match out {
                            serde_yaml::Value::String(s) => Some(s.clone()),
                            serde_yaml::Value::Mapping(m) => {
                                m.keys().next().and_then(|k| k.as_str()).map(String::from)
                            }
                            _ => None,
                        })
                        .collect()
                })
                .unwrap_or_default(),
        }
    }

    /// Iteration matrix, if the entry has a well-formed one
    pub fn matrix(&self) -> Option<Matrix> {
        match self {
            Self::Managed(stage) => stage.matrix.clone(),
            Self::Unmanaged(value) => value
                .get("matrix")
                .and_then(|m| serde_yaml::from_value(m.clone()).ok()),
        }
    }
}

/// The full engine document
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StageGraph {
    pub stages: IndexMap<String, GraphEntry>,

    /// Other top-level keys of a previous document
    #[serde(flatten)]
    pub extra: IndexMap<String, serde_yaml::Value>,
}

#[derive(Deserialize)]
struct RawGraph {
    #[serde(default)]
    stages: IndexMap<String, serde_yaml::Value>,
    #[serde(flatten)]
    extra: IndexMap<String, serde_yaml::Value>,
}

impl StageGraph {
    /// Parse a graph; every entry is treated as unmanaged
    pub fn from_yaml(yaml: &str) -> LabflowResult<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let raw: RawGraph = serde_yaml::from_str(yaml)?;
        Ok(Self {
            stages: raw
                .stages
                .into_iter()
                .map(|(name, value)| (name, GraphEntry::Unmanaged(value)))
                .collect(),
            extra: raw.extra,
        })
    }

    pub fn to_yaml(&self) -> LabflowResult<String> {
        serde_yaml::to_string(self).map_err(Into::into)
    }

    /// Combine freshly compiled stages with a previous graph
    ///
    /// Entries of `prior` keep their position. Those whose name was
    /// compiled again are replaced wholesale; the rest are carried through
    /// unchanged, except stale private stages when `prune_stale` is set.
    /// New names are appended in compilation order.
    pub fn merge(
        prior: Option<&StageGraph>,
        fresh: IndexMap<String, GraphStage>,
        prune_stale: bool,
    ) -> Self {
        let mut fresh = fresh;
        let mut stages = IndexMap::with_capacity(fresh.len());
        let mut extra = IndexMap::new();

        if let Some(prior) = prior {
            extra = prior.extra.clone();
            for (name, entry) in &prior.stages {
                if let Some(stage) = fresh.shift_remove(name) {
                    stages.insert(name.clone(), GraphEntry::Managed(stage));
                } else if prune_stale && is_private_stage(name) {
                    tracing::warn!("Dropping stale private stage '{}'", name);
                } else {
                    tracing::debug!("Keeping unmanaged stage '{}'", name);
                    stages.insert(name.clone(), entry.clone());
                }
            }
        }

        for (name, stage) in fresh {
            stages.insert(name, GraphEntry::Managed(stage));
        }

        Self { stages, extra }
    }
}
