// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 labflow contributors

//! Environment declarations
//!
//! Only the fields that matter for lock tracking are typed here. Everything
//! else an environment manager needs (image names, python versions, ...)
//! is kept verbatim in `extra` and ignored by the compiler.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A declared execution environment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Environment {
    pub kind: EnvKind,

    /// Manifest describing the environment (Dockerfile, pyproject.toml, ...)
    #[serde(default)]
    pub path: Option<String>,

    /// Architecture the environment is built for, defaults to the host
    #[serde(default)]
    pub architecture: Option<String>,

    #[serde(flatten)]
    pub extra: IndexMap<String, serde_yaml::Value>,
}

impl Environment {
    /// Create an environment with only a kind and manifest path
    pub fn new(kind: EnvKind, path: Option<&str>) -> Self {
        Self {
            kind,
            path: path.map(String::from),
            architecture: None,
            extra: IndexMap::new(),
        }
    }
}

/// Environment kinds
///
/// Unrecognized kind strings are kept as `Other` so projects using newer
/// environment managers still compile, just without lock tracking.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EnvKind {
    Docker,
    Matlab,
    Venv,
    UvVenv,
    Conda,
    Uv,
    Pixi,
    Julia,
    Ssh,
    Other(String),
}

impl EnvKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Docker => "docker",
            Self::Matlab => "matlab",
            Self::Venv => "venv",
            Self::UvVenv => "uv-venv",
            Self::Conda => "conda",
            Self::Uv => "uv",
            Self::Pixi => "pixi",
            Self::Julia => "julia",
            Self::Ssh => "ssh",
            Self::Other(kind) => kind,
        }
    }

    /// Whether stages in this environment run inside a container
    pub fn is_container(&self) -> bool {
        matches!(self, Self::Docker | Self::Matlab)
    }
}

impl From<String> for EnvKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "docker" => Self::Docker,
            "matlab" => Self::Matlab,
            "venv" => Self::Venv,
            "uv-venv" => Self::UvVenv,
            "conda" => Self::Conda,
            "uv" => Self::Uv,
            "pixi" => Self::Pixi,
            "julia" => Self::Julia,
            "ssh" => Self::Ssh,
            _ => Self::Other(s),
        }
    }
}

impl From<EnvKind> for String {
    fn from(kind: EnvKind) -> Self {
        kind.as_str().to_string()
    }
}

impl std::fmt::Display for EnvKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
