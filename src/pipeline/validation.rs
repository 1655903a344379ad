// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 labflow contributors

//! Pipeline validation
//!
//! Reports everything that would make compilation fail, plus problems that
//! compile fine but are probably mistakes.

use indexmap::IndexSet;
use std::path::Path;

use crate::errors::LabflowError;
use crate::graph::StageGraph;
use crate::pipeline::iteration::placeholders_in;
use crate::pipeline::{DagBuilder, PipelineCompiler, Stage, StageKind, SYSTEM_ENVIRONMENT};
use crate::project::Project;

/// Pipeline validator
pub struct PipelineValidator;

impl PipelineValidator {
    /// Validate a project's pipeline
    pub fn validate(project: &Project) -> ValidationResult {
        let mut result = ValidationResult::new();

        if project.pipeline.stages.is_empty() {
            result.add_warning("Pipeline has no stages defined");
        }

        match PipelineCompiler::new(project).compile_stages() {
            Ok(fresh) => {
                let graph = StageGraph::merge(None, fresh, false);
                match DagBuilder::build(&graph) {
                    Ok(_) => {}
                    Err(LabflowError::CircularDependency { stages }) => {
                        result.add_error(&format!("Circular dependency: {}", stages.join(" -> ")));
                    }
                    Err(e) => result.add_error(&e.to_string()),
                }
            }
            Err(e) => result.add_error(&e.to_string()),
        }

        Self::check_environments(project, &mut result);

        for stage in project.pipeline.stages.values() {
            Self::validate_stage(stage, project, &mut result);
        }

        result
    }

    fn check_environments(project: &Project, result: &mut ValidationResult) {
        let used: IndexSet<&str> = project
            .pipeline
            .stages
            .values()
            .filter_map(Stage::environment)
            .collect();

        for name in project.environments.keys() {
            if !used.contains(name.as_str()) {
                result.add_warning(&format!("Environment '{}' is not used by any stage", name));
            }
        }
    }

    /// Validate a single stage
    fn validate_stage(stage: &Stage, project: &Project, result: &mut ValidationResult) {
        if let Some(env_name) = stage.environment() {
            match project.environments.get(env_name) {
                Some(env) => {
                    if matches!(stage.kind, StageKind::DockerCommand(_)) && !env.kind.is_container() {
                        result.add_warning(&format!(
                            "Stage '{}': docker-command runs in '{}', which is a {} environment",
                            stage.name, env_name, env.kind
                        ));
                    }
                }
                None if env_name != SYSTEM_ENVIRONMENT => {
                    result.add_warning(&format!(
                        "Stage '{}': Environment '{}' is not declared, no lock file will be tracked",
                        stage.name, env_name
                    ));
                }
                None => {}
            }
        }

        // Every iteration argument should show up somewhere
        let args = stage.iteration_arg_names();
        if !args.is_empty() {
            let command = stage.command();
            let deps = stage.dependencies();
            let outs = stage.outputs();

            let mut referenced: IndexSet<&str> = placeholders_in(&command).into_iter().collect();
            for dep in &deps {
                referenced.extend(placeholders_in(dep));
            }
            for out in &outs {
                referenced.extend(placeholders_in(&out.path));
            }

            for arg in args {
                if !referenced.contains(arg) {
                    result.add_warning(&format!(
                        "Stage '{}': Iteration argument '{}' is never used; every instance will do the same work",
                        stage.name, arg
                    ));
                }
            }
        }

        if stage.outputs().is_empty() && !stage.always_run {
            result.add_warning(&format!(
                "Stage '{}': Declares no outputs, so later stages cannot consume its results",
                stage.name
            ));
        }
    }

    /// Check that the files stages depend on exist
    ///
    /// Paths produced by some stage, compiler-managed artifacts and templated
    /// paths are not checked.
    pub fn validate_files(project: &Project, base_path: &Path) -> Vec<String> {
        let mut missing = Vec::new();

        let produced: IndexSet<String> = project
            .pipeline
            .stages
            .values()
            .flat_map(|s| s.outputs().into_iter().map(|o| o.path))
            .collect();

        for (name, env) in &project.environments {
            if let Some(manifest) = &env.path {
                if !base_path.join(manifest).exists() {
                    missing.push(format!(
                        "Environment '{}': Manifest not found: {}",
                        name, manifest
                    ));
                }
            }
        }

        for stage in project.pipeline.stages.values() {
            let root = match &stage.working_directory {
                Some(wdir) => base_path.join(wdir),
                None => base_path.to_path_buf(),
            };
            for dep in stage.dependencies() {
                if dep.starts_with(".labflow/")
                    || !placeholders_in(&dep).is_empty()
                    || produced.contains(&dep)
                {
                    continue;
                }
                if !root.join(&dep).exists() {
                    missing.push(format!("Stage '{}': File not found: {}", stage.name, dep));
                }
            }
        }

        missing
    }
}

/// Result of pipeline validation
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, message: &str) {
        self.errors.push(message.to_string());
    }

    pub fn add_warning(&mut self, message: &str) {
        self.warnings.push(message.to_string());
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn validate(yaml: &str) -> ValidationResult {
        PipelineValidator::validate(&Project::from_yaml(yaml).unwrap())
    }

    #[test]
    fn test_validate_empty_pipeline() {
        let result = validate("{}");
        assert!(result.is_valid());
        assert!(result.warnings[0].contains("no stages"));
    }

    #[test]
    fn test_compile_errors_reported() {
        let result = validate(
            r#"
pipeline:
  stages:
    b:
      kind: shell-command
      environment: _system
      command: "true"
      inputs:
        - from_stage_outputs: missing
"#,
        );
        assert!(!result.is_valid());
        assert!(result.errors[0].contains("'missing'"));
    }

    #[test]
    fn test_cycle_reported() {
        let result = validate(
            r#"
pipeline:
  stages:
    a:
      kind: shell-command
      environment: _system
      command: "cp b.txt a.txt"
      inputs: [b.txt]
      outputs: [a.txt]
    b:
      kind: shell-command
      environment: _system
      command: "cp a.txt b.txt"
      inputs: [a.txt]
      outputs: [b.txt]
"#,
        );
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.starts_with("Circular dependency")));
    }

    #[test]
    fn test_environment_warnings() {
        let result = validate(
            r#"
environments:
  py:
    kind: uv
    path: pyproject.toml
  spare:
    kind: docker
    path: Dockerfile
pipeline:
  stages:
    render:
      kind: docker-command
      environment: py
      command: render.sh
      outputs: [out.png]
    other:
      kind: python-script
      environment: ghost
      script_path: other.py
      outputs: [other.csv]
"#,
        );
        assert!(result.is_valid());
        assert!(result.warnings.iter().any(|w| w.contains("'spare' is not used")));
        assert!(result.warnings.iter().any(|w| w.contains("docker-command runs in 'py'")));
        assert!(result.warnings.iter().any(|w| w.contains("'ghost' is not declared")));
    }

    #[test]
    fn test_unused_iteration_argument() {
        let result = validate(
            r#"
pipeline:
  stages:
    sweep:
      kind: python-script
      environment: _system
      script_path: sweep.py
      args: ["{lr}"]
      outputs: ["out/{lr}.json"]
      iterate_over:
        - arg_name: lr
          values: [0.1, 0.01]
        - arg_name: seed
          values: [1, 2]
"#,
        );
        assert!(result.is_valid());
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("'seed' is never used"));
    }

    #[test]
    fn test_stage_without_outputs() {
        let result = validate(
            r#"
pipeline:
  stages:
    lint:
      kind: shell-command
      environment: _system
      command: ruff check .
"#,
        );
        assert!(result.has_warnings());
        assert!(result.warnings[0].contains("no outputs"));
    }

    #[test]
    fn test_validate_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("prep.py"), "").unwrap();

        let project = Project::from_yaml(
            r#"
environments:
  py:
    kind: uv
    path: pyproject.toml
pipeline:
  stages:
    prep:
      kind: python-script
      environment: py
      script_path: prep.py
      inputs: [data/raw.csv]
      outputs: [data/clean.csv]
    fit:
      kind: python-script
      environment: py
      script_path: fit.py
      inputs: [data/clean.csv]
"#,
        )
        .unwrap();

        let missing = PipelineValidator::validate_files(&project, dir.path());
        assert_eq!(
            missing,
            vec![
                "Environment 'py': Manifest not found: pyproject.toml",
                "Stage 'prep': File not found: data/raw.csv",
                "Stage 'fit': File not found: fit.py",
            ]
        );
    }
}
