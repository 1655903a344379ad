// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 labflow contributors

//! CLI command definitions and handlers
//!
//! Defines the command-line interface for labflow.

pub mod check;
pub mod compile;
pub mod graph;
pub mod init;
pub mod watch;

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};

use crate::project::{CompilerConfig, Project, PROJECT_FILE};

/// Research pipeline compiler
///
/// Compile labflow.yaml into a DVC pipeline definition.
#[derive(Parser, Debug)]
#[clap(
    name = "labflow",
    version,
    about = "Compile research project pipelines into DVC stage graphs",
    long_about = None,
    after_help = "Examples:\n\
        labflow init                    Initialize a new project\n\
        labflow compile                 Write dvc.yaml from labflow.yaml\n\
        labflow check                   Validate the project\n\
        labflow graph --format mermaid  Show the stage graph\n\
        labflow watch                   Recompile on every change\n\n\
        See 'labflow <command> --help' for more information on a specific command."
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[clap(short, long, global = true)]
    pub verbose: bool,

    /// Change to directory before executing
    #[clap(short = 'C', long, global = true, value_name = "DIR")]
    pub directory: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new labflow project
    Init {
        /// Project name (defaults to current directory name)
        name: Option<String>,

        /// Use a template (default, notebook, paper)
        #[clap(short, long)]
        template: Option<String>,

        /// Overwrite an existing labflow.yaml
        #[clap(long)]
        force: bool,
    },

    /// Compile the project into the stage graph
    Compile {
        /// Project file
        #[clap(short, long, default_value = PROJECT_FILE)]
        project: PathBuf,

        #[clap(flatten)]
        options: CompileOptions,

        /// Print the graph instead of writing it
        #[clap(long)]
        dry_run: bool,
    },

    /// Validate the project without writing anything
    Check {
        /// Project file to validate
        #[clap(default_value = PROJECT_FILE)]
        project: PathBuf,
    },

    /// Show the compiled stages as a graph
    Graph {
        /// Project file
        #[clap(default_value = PROJECT_FILE)]
        project: PathBuf,

        /// Output format
        #[clap(short, long, value_enum, default_value_t = GraphFormat::Text)]
        format: GraphFormat,
    },

    /// Watch mode - recompile on file changes
    Watch {
        /// Project file
        #[clap(short, long, default_value = PROJECT_FILE)]
        project: PathBuf,

        #[clap(flatten)]
        options: CompileOptions,

        /// Debounce delay in milliseconds
        #[clap(long, default_value = "500")]
        debounce: u64,
    },
}

/// Command-line overrides of the project's `compiler` section
#[derive(Args, Debug, Clone, Default)]
pub struct CompileOptions {
    /// Where to write the graph (relative to the project file)
    #[clap(short, long)]
    pub output: Option<PathBuf>,

    /// Architecture used in lock paths (defaults to the host)
    #[clap(long = "arch", value_name = "ARCH")]
    pub architecture: Option<String>,

    /// Reject stages whose environment is not declared
    #[clap(long)]
    pub strict: bool,

    /// Drop private stages that are no longer produced
    #[clap(long)]
    pub prune: bool,
}

impl CompileOptions {
    /// Apply the overrides on top of a project's settings
    pub fn apply(&self, mut config: CompilerConfig) -> CompilerConfig {
        if let Some(output) = &self.output {
            config.output = output.clone();
        }
        if let Some(arch) = &self.architecture {
            config.architecture = Some(arch.clone());
        }
        config.strict_environments |= self.strict;
        config.prune_stale_stages |= self.prune;
        config
    }
}

/// Graph output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GraphFormat {
    Text,
    Dot,
    Mermaid,
}

/// Directory holding the project file; relative paths resolve against it
pub(crate) fn project_root(project_path: &Path) -> PathBuf {
    match project_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Load a project, keeping its diagnostic for the report
pub(crate) fn load_project(project_path: &Path) -> miette::Result<Project> {
    Ok(Project::from_file(project_path)?)
}
