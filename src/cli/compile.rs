// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 labflow contributors

//! Compile command - write the stage graph

use colored::Colorize;
use miette::Result;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{load_project, project_root, CompileOptions};
use crate::errors::{LabflowError, LabflowResult};
use crate::graph::StageGraph;
use crate::pipeline::PipelineCompiler;
use crate::project::Project;
use crate::utils::{code, print_info, print_success};

/// A compiled graph, ready to be written
#[derive(Debug)]
pub struct Compiled {
    /// Where the graph belongs
    pub output: PathBuf,
    pub yaml: String,
    pub stages: usize,
    /// Whether `yaml` differs from what is on disk
    pub changed: bool,
}

impl Compiled {
    pub fn write(&self) -> LabflowResult<()> {
        if let Some(dir) = self.output.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| LabflowError::FileWriteError {
                path: dir.to_path_buf(),
                error: e.to_string(),
            })?;
        }
        std::fs::write(&self.output, &self.yaml).map_err(|e| LabflowError::FileWriteError {
            path: self.output.clone(),
            error: e.to_string(),
        })
    }
}

/// Compile `project` against the graph currently at its output path
pub fn compile_project(
    project: &Project,
    project_path: &Path,
    options: &CompileOptions,
) -> LabflowResult<Compiled> {
    let config = options.apply(project.compiler.clone());
    let output = project_root(project_path).join(&config.output);

    let previous = if output.exists() {
        Some(std::fs::read_to_string(&output).map_err(|e| LabflowError::FileReadError {
            path: output.clone(),
            error: e.to_string(),
        })?)
    } else {
        None
    };
    let prior = previous.as_deref().map(StageGraph::from_yaml).transpose()?;
    debug!(
        "Compiling against {} ({} prior stage(s))",
        output.display(),
        prior.as_ref().map_or(0, |g| g.stages.len())
    );

    let graph = PipelineCompiler::new(project)
        .with_config(config)
        .compile(prior.as_ref())?;
    let yaml = graph.to_yaml()?;

    Ok(Compiled {
        changed: previous.as_deref() != Some(yaml.as_str()),
        output,
        yaml,
        stages: graph.stages.len(),
    })
}

/// Run the compile command
pub fn run(project_path: PathBuf, options: CompileOptions, dry_run: bool, verbose: bool) -> Result<()> {
    let project = load_project(&project_path)?;
    let compiled = compile_project(&project, &project_path, &options)?;

    if dry_run {
        print!("{}", compiled.yaml);
        return Ok(());
    }

    if !compiled.changed {
        print_info(&format!("{} is up to date", compiled.output.display()));
        return Ok(());
    }

    compiled.write()?;
    print_success(&format!(
        "Wrote {} ({} stage(s))",
        compiled.output.display(),
        compiled.stages
    ));

    if verbose {
        println!();
        println!("Next: run {} to execute the pipeline", code("dvc repro"));
        println!("{}", "─".repeat(50).dimmed());
        println!("{}", compiled.yaml.dimmed());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const PROJECT: &str = r#"
pipeline:
  stages:
    hello:
      kind: shell-command
      environment: _system
      command: "echo hi > hello.txt"
      outputs: [hello.txt]
"#;

    #[test]
    fn test_compile_writes_and_detects_up_to_date() {
        let dir = TempDir::new().unwrap();
        let project_path = dir.path().join("labflow.yaml");
        std::fs::write(&project_path, PROJECT).unwrap();
        let project = Project::from_file(&project_path).unwrap();

        let first = compile_project(&project, &project_path, &CompileOptions::default()).unwrap();
        assert!(first.changed);
        assert_eq!(first.output, dir.path().join("dvc.yaml"));
        first.write().unwrap();

        let second = compile_project(&project, &project_path, &CompileOptions::default()).unwrap();
        assert!(!second.changed);
        assert_eq!(second.yaml, first.yaml);
    }

    #[test]
    fn test_output_override_creates_directories() {
        let dir = TempDir::new().unwrap();
        let project_path = dir.path().join("labflow.yaml");
        std::fs::write(&project_path, PROJECT).unwrap();
        let project = Project::from_file(&project_path).unwrap();

        let options = CompileOptions {
            output: Some("pipelines/dvc.yaml".into()),
            ..Default::default()
        };
        let compiled = compile_project(&project, &project_path, &options).unwrap();
        compiled.write().unwrap();

        let written = std::fs::read_to_string(dir.path().join("pipelines/dvc.yaml")).unwrap();
        assert!(written.contains("hello:"));
        assert!(written.contains("echo hi"));
    }
}
