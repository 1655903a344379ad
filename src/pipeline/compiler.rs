// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 labflow contributors

//! Pipeline compiler
//!
//! Turns a project into the engine's stage graph in one pass:
//!
//! 1. synthesize an environment check stage per lock-tracked environment
//! 2. translate every declared stage, adding its environment lock as a
//!    dependency and expanding iteration into a matrix
//! 3. synthesize a cleaning stage per notebook stage
//! 4. resolve `from_stage_outputs` inputs into concrete dependencies, then
//!    rebuild batch job commands from the final dependency lists
//! 5. merge with the previous graph
//!
//! Compilation is pure: the same project and prior graph always yield the
//! same graph, and a failure leaves nothing half-built.

use indexmap::IndexMap;
use tracing::{debug, info, warn};

use crate::errors::{LabflowError, LabflowResult};
use crate::graph::{
    is_private_stage, GraphOutput, GraphStage, StageGraph, CHECK_ENV_PREFIX, CLEAN_NB_PREFIX,
};
use crate::pipeline::iteration;
use crate::pipeline::lock;
use crate::pipeline::stages::OutputArtifact;
use crate::pipeline::{Stage, StageKind, Storage, SYSTEM_ENVIRONMENT};
use crate::project::{CompilerConfig, Project};

/// Compiles a project into a stage graph
pub struct PipelineCompiler<'a> {
    project: &'a Project,
    config: CompilerConfig,
}

impl<'a> PipelineCompiler<'a> {
    /// Create a compiler using the project's own settings
    pub fn new(project: &'a Project) -> Self {
        Self {
            project,
            config: project.compiler.clone(),
        }
    }

    /// Override the project's compiler settings
    pub fn with_config(mut self, config: CompilerConfig) -> Self {
        self.config = config;
        self
    }

    /// Compile and merge with `prior`
    pub fn compile(&self, prior: Option<&StageGraph>) -> LabflowResult<StageGraph> {
        let fresh = self.compile_stages()?;
        let managed = fresh.len();
        let graph = StageGraph::merge(prior, fresh, self.config.prune_stale_stages);

        info!(
            "Compiled {} stage(s), {} carried over",
            managed,
            graph.stages.len() - managed
        );
        Ok(graph)
    }

    /// Compile the stages the compiler manages, in output order
    ///
    /// Check stages come first, then each declared stage preceded by its
    /// cleaning stage if it has one.
    pub fn compile_stages(&self) -> LabflowResult<IndexMap<String, GraphStage>> {
        let pipeline = &self.project.pipeline;

        self.check_stage_names()?;
        self.check_environments()?;

        // Step 1: environment checks
        let mut check_stages = IndexMap::new();
        let mut locks: IndexMap<&str, String> = IndexMap::new();
        for (name, env) in &self.project.environments {
            let Some(lock_path) = lock::lock_path(env, name, self.config.architecture.as_deref())
            else {
                debug!("Environment '{}' ({}) has no lock file", name, env.kind);
                continue;
            };

            let mut stage = GraphStage::new(lock::check_command(env, name));
            if let Some(manifest) = &env.path {
                stage.add_dependency(manifest);
            }
            stage
                .outs
                .push(OutputArtifact::new(lock_path.clone(), Storage::Git, true).into());
            stage.always_changed = true;

            debug!("Synthesized check stage for environment '{}'", name);
            check_stages.insert(format!("{}{}", CHECK_ENV_PREFIX, name), stage);
            locks.insert(name.as_str(), lock_path);
        }

        // Step 2: declared stages
        let mut translated = IndexMap::with_capacity(pipeline.stages.len());
        for (name, stage) in &pipeline.stages {
            let lock_path = stage.environment().and_then(|env| locks.get(env));
            let compiled = self.translate(stage, lock_path.map(String::as_str))?;
            debug!("Translated stage '{}' ({})", name, stage.kind_name());
            translated.insert(name.clone(), compiled);
        }

        // Step 3: notebook cleaning
        let mut clean_stages = IndexMap::new();
        for (name, stage) in &pipeline.stages {
            let StageKind::JupyterNotebook(nb) = &stage.kind else {
                continue;
            };
            let mut clean = GraphStage::new(nb.clean_command());
            clean.add_dependency(&nb.notebook_path);
            clean
                .outs
                .push(OutputArtifact::new(nb.cleaned_path(), nb.cleaned_ipynb_storage, false).into());
            clean_stages.insert(name.clone(), clean);
        }

        // Step 4: cross-stage data flow
        let produced: IndexMap<String, Vec<String>> = translated
            .iter()
            .map(|(name, stage)| (name.clone(), stage.output_paths().map(String::from).collect()))
            .collect();
        for (name, stage) in &pipeline.stages {
            for reference in stage.stage_references() {
                let outputs = produced.get(reference).ok_or_else(|| {
                    LabflowError::DanglingStageReference {
                        stage: name.clone(),
                        reference: reference.to_string(),
                    }
                })?;
                if let Some(compiled) = translated.get_mut(name) {
                    for path in outputs {
                        compiled.add_dependency(path);
                    }
                }
            }
        }

        // Batch jobs pass their dependencies to the submission tool, so the
        // command is rebuilt from the final list
        for (name, stage) in &pipeline.stages {
            let Some(compiled) = translated.get_mut(name) else {
                continue;
            };
            let Some(cmd) = stage.batch_command(&compiled.deps) else {
                continue;
            };
            compiled.cmd = match iteration::plan(stage, &self.project.parameters)? {
                Some(plan) => plan.templater.render(&cmd),
                None => cmd,
            };
        }

        let mut fresh = check_stages;
        for (name, stage) in translated {
            if let Some(clean) = clean_stages.shift_remove(&name) {
                fresh.insert(format!("{}{}", CLEAN_NB_PREFIX, name), clean);
            }
            fresh.insert(name, stage);
        }
        Ok(fresh)
    }

    /// Translate one declared stage into its engine form
    fn translate(&self, stage: &Stage, lock_path: Option<&str>) -> LabflowResult<GraphStage> {
        let plan = iteration::plan(stage, &self.project.parameters)?;

        let mut deps = stage.dependencies();
        if let Some(lock_path) = lock_path {
            deps.insert(lock_path.to_string());
        }
        let mut outs = stage.outputs();
        let mut cmd = stage.command();

        let mut compiled = GraphStage::new(String::new());
        if let Some(plan) = plan {
            let t = &plan.templater;
            cmd = t.render(&cmd);
            deps = deps.iter().map(|d| t.render(d)).collect();
            for out in &mut outs {
                out.path = t.render(&out.path);
            }
            compiled.matrix = Some(plan.matrix);
        }

        compiled.cmd = cmd;
        compiled.wdir = stage.working_directory.clone();
        compiled.deps = deps.into_iter().collect();
        compiled.outs = outs.into_iter().map(GraphOutput::from).collect();
        compiled.always_changed = stage.always_run;
        compiled.desc = stage.description.clone();
        Ok(compiled)
    }

    fn check_stage_names(&self) -> LabflowResult<()> {
        for name in self.project.pipeline.stages.keys() {
            if is_private_stage(name) {
                return Err(LabflowError::invalid_field(
                    name,
                    "name",
                    "names starting with '_check-env-' or '_clean-nb-' are reserved",
                ));
            }
        }
        Ok(())
    }

    fn check_environments(&self) -> LabflowResult<()> {
        for (name, stage) in &self.project.pipeline.stages {
            let Some(env) = stage.environment() else {
                return Err(LabflowError::MissingEnvironment {
                    stage: name.clone(),
                });
            };
            if env == SYSTEM_ENVIRONMENT || self.project.environments.contains_key(env) {
                continue;
            }
            if self.config.strict_environments {
                return Err(LabflowError::UnknownEnvironment {
                    stage: name.clone(),
                    environment: env.to_string(),
                });
            }
            warn!(
                "Stage '{}' uses undeclared environment '{}', no lock dependency added",
                name, env
            );
        }
        Ok(())
    }
}

/// Compile `project` with its own settings and merge with `prior`
pub fn compile(project: &Project, prior: Option<&StageGraph>) -> LabflowResult<StageGraph> {
    PipelineCompiler::new(project).compile(prior)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphEntry, OutputFlags};
    use serde_json::json;

    fn project(yaml: &str) -> Project {
        Project::from_yaml(yaml).unwrap()
    }

    fn managed<'g>(graph: &'g StageGraph, name: &str) -> &'g GraphStage {
        match &graph.stages[name] {
            GraphEntry::Managed(stage) => stage,
            GraphEntry::Unmanaged(_) => panic!("'{}' is not managed", name),
        }
    }

    const STUDY: &str = r#"
parameters:
  models: [cnn, rf]
environments:
  py:
    kind: uv
    path: analysis/pyproject.toml
  tex:
    kind: docker
    path: Dockerfile
  cluster:
    kind: ssh
pipeline:
  stages:
    prep:
      kind: python-script
      environment: py
      script_path: prep.py
      inputs: [data/raw.csv]
      outputs: [data/clean.parquet]
    train:
      kind: python-script
      environment: py
      script_path: train.py
      args: ["--model", "{model}"]
      inputs:
        - from_stage_outputs: prep
      outputs:
        - models/{model}.pkl
      iterate_over:
        - arg_name: model
          values: [{parameter: models}]
    explore:
      kind: jupyter-notebook
      environment: py
      notebook_path: explore.ipynb
      html_storage: git
    paper:
      kind: latex
      environment: tex
      target_path: paper.tex
      inputs:
        - from_stage_outputs: train
"#;

    fn compile_with_arch(yaml: &str) -> StageGraph {
        let p = project(yaml);
        let mut config = p.compiler.clone();
        config.architecture = Some("amd64".into());
        PipelineCompiler::new(&p).with_config(config).compile(None).unwrap()
    }

    #[test]
    fn test_stage_order() {
        let graph = compile_with_arch(STUDY);
        assert_eq!(
            graph.stages.keys().collect::<Vec<_>>(),
            vec![
                "_check-env-py",
                "_check-env-tex",
                "prep",
                "train",
                "_clean-nb-explore",
                "explore",
                "paper"
            ]
        );
    }

    #[test]
    fn test_check_stages() {
        let graph = compile_with_arch(STUDY);

        let py = managed(&graph, "_check-env-py");
        assert_eq!(py.cmd, "labflow check env -n py");
        assert_eq!(py.deps, vec!["analysis/pyproject.toml"]);
        assert!(py.always_changed);
        let mut flags = IndexMap::new();
        flags.insert(
            "analysis/uv.lock".to_string(),
            OutputFlags {
                cache: false,
                persist: true,
            },
        );
        assert_eq!(py.outs, vec![GraphOutput::Detailed(flags)]);

        let tex = managed(&graph, "_check-env-tex");
        assert_eq!(tex.output_paths().collect::<Vec<_>>(), vec![".labflow/env-locks/docker/amd64/tex.json"]);

        // ssh environments are not lock-tracked
        assert!(!graph.stages.contains_key("_check-env-cluster"));
    }

    #[test]
    fn test_environment_lock_dependency() {
        let graph = compile_with_arch(STUDY);
        let prep = managed(&graph, "prep");
        assert_eq!(prep.deps, vec!["prep.py", "data/raw.csv", "analysis/uv.lock"]);
        assert_eq!(prep.cmd, "labflow xenv -n py -- python prep.py");
    }

    #[test]
    fn test_iteration_templating() {
        let graph = compile_with_arch(STUDY);
        let train = managed(&graph, "train");

        assert_eq!(train.cmd, "labflow xenv -n py -- python train.py --model ${item.model}");
        assert_eq!(
            train.output_paths().collect::<Vec<_>>(),
            vec!["models/${item.model}.pkl"]
        );
        let matrix = train.matrix.as_ref().unwrap();
        assert_eq!(matrix.0["model"], vec![json!("cnn"), json!("rf")]);
    }

    #[test]
    fn test_cross_stage_dependencies() {
        let graph = compile_with_arch(STUDY);
        let train = managed(&graph, "train");
        assert_eq!(
            train.deps,
            vec!["train.py", "analysis/uv.lock", "data/clean.parquet"]
        );

        // Templated outputs flow through as-is
        let paper = managed(&graph, "paper");
        assert!(paper.deps.contains(&"models/${item.model}.pkl".to_string()));
    }

    #[test]
    fn test_notebook_clean_stage() {
        let graph = compile_with_arch(STUDY);
        let clean = managed(&graph, "_clean-nb-explore");
        assert_eq!(clean.cmd, "labflow nb clean \"explore.ipynb\"");
        assert_eq!(clean.deps, vec!["explore.ipynb"]);

        let mut flags = IndexMap::new();
        flags.insert(
            ".labflow/notebooks/cleaned/explore.ipynb".to_string(),
            OutputFlags {
                cache: false,
                persist: false,
            },
        );
        assert_eq!(clean.outs, vec![GraphOutput::Detailed(flags)]);

        let explore = managed(&graph, "explore");
        assert_eq!(explore.deps[0], ".labflow/notebooks/cleaned/explore.ipynb");
        assert!(explore.cmd.contains("--to html"));
        assert_eq!(
            explore.output_paths().collect::<Vec<_>>(),
            vec![
                ".labflow/notebooks/executed/explore.ipynb",
                ".labflow/notebooks/html/explore.html"
            ]
        );
    }

    #[test]
    fn test_cross_stage_dependency_minimal() {
        let graph = compile_with_arch(
            r#"
pipeline:
  stages:
    a:
      kind: shell-command
      environment: _system
      command: "echo a > x.out"
      outputs: [x.out]
    b:
      kind: shell-command
      environment: _system
      command: "cat x.out"
      inputs:
        - from_stage_outputs: a
"#,
        );
        assert_eq!(managed(&graph, "b").deps, vec!["x.out"]);
    }

    #[test]
    fn test_forward_reference_resolves() {
        let graph = compile_with_arch(
            r#"
pipeline:
  stages:
    b:
      kind: shell-command
      environment: _system
      command: "cat x.out"
      inputs: [x.out, {from_stage_outputs: a}]
    a:
      kind: shell-command
      environment: _system
      command: "echo a > x.out"
      outputs: [x.out, y.out]
"#,
        );
        assert_eq!(managed(&graph, "b").deps, vec!["x.out", "y.out"]);
    }

    #[test]
    fn test_dangling_reference() {
        let p = project(
            r#"
pipeline:
  stages:
    b:
      kind: shell-command
      environment: _system
      command: "true"
      inputs:
        - from_stage_outputs: c
"#,
        );
        let err = compile(&p, None).unwrap_err();
        match err {
            LabflowError::DanglingStageReference { stage, reference } => {
                assert_eq!(stage, "b");
                assert_eq!(reference, "c");
            }
            other => panic!("Expected DanglingStageReference, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_environment_is_fatal() {
        let p = project(
            r#"
pipeline:
  stages:
    s:
      kind: python-script
      script_path: s.py
"#,
        );
        assert!(matches!(
            compile(&p, None),
            Err(LabflowError::MissingEnvironment { ref stage }) if stage == "s"
        ));
    }

    #[test]
    fn test_undeclared_environment_permissive_and_strict() {
        let yaml = r#"
pipeline:
  stages:
    s:
      kind: python-script
      environment: ghost
      script_path: s.py
"#;
        let p = project(yaml);
        let graph = compile(&p, None).unwrap();
        assert_eq!(managed(&graph, "s").deps, vec!["s.py"]);

        let mut config = p.compiler.clone();
        config.strict_environments = true;
        let err = PipelineCompiler::new(&p).with_config(config).compile(None).unwrap_err();
        assert!(matches!(err, LabflowError::UnknownEnvironment { .. }));
    }

    #[test]
    fn test_reserved_stage_name() {
        let p = project(
            r#"
pipeline:
  stages:
    _check-env-py:
      kind: shell-command
      environment: _system
      command: "true"
"#,
        );
        assert!(matches!(compile(&p, None), Err(LabflowError::SchemaViolation { .. })));
    }

    #[test]
    fn test_malformed_iteration_propagates() {
        let p = project(
            r#"
pipeline:
  stages:
    s:
      kind: python-script
      environment: _system
      script_path: s.py
      iterate_over:
        - arg_name: [a, b]
          values: [1, 2, 3]
"#,
        );
        assert!(matches!(
            compile(&p, None),
            Err(LabflowError::MalformedIteration { ref stage, .. }) if stage == "s"
        ));
    }

    #[test]
    fn test_linked_and_independent_axes() {
        let graph = compile_with_arch(
            r#"
pipeline:
  stages:
    sweep:
      kind: python-script
      environment: _system
      script_path: sweep.py
      args: ["{dataset}", "{lr}", "{epochs}"]
      outputs: ["out/{dataset}-{lr}.json"]
      iterate_over:
        - arg_name: dataset
          values: [mnist, cifar]
        - arg_name: [lr, epochs]
          values: [[0.1, 5], [0.01, 50]]
"#,
        );
        let sweep = managed(&graph, "sweep");
        assert_eq!(
            sweep.cmd,
            "python sweep.py ${item.dataset} ${item._arg1.lr} ${item._arg1.epochs}"
        );
        assert_eq!(sweep.output_paths().collect::<Vec<_>>(), vec!["out/${item.dataset}-${item._arg1.lr}.json"]);

        let matrix = sweep.matrix.as_ref().unwrap();
        assert_eq!(matrix.keys().collect::<Vec<_>>(), vec!["dataset", "_arg1"]);
        assert_eq!(matrix.combinations().len(), 4);
    }

    #[test]
    fn test_list_valued_iteration_shapes() {
        let graph = compile_with_arch(
            r#"
pipeline:
  stages:
    s:
      kind: python-script
      environment: _system
      script_path: s.py
      args: ["{cfg}", "{a}"]
      iterate_over:
        - arg_name: cfg
          values: [[fast], slow]
        - arg_name: [a]
          values: [[x], [y]]
"#,
        );
        let s = managed(&graph, "s");
        assert_eq!(s.cmd, "python s.py ${item.cfg} ${item._arg1.a}");

        let matrix = s.matrix.as_ref().unwrap();
        assert_eq!(matrix.0["cfg"], vec![json!(["fast"]), json!("slow")]);
        assert_eq!(matrix.0["_arg1"], vec![json!({"a": "x"}), json!({"a": "y"})]);
    }

    #[test]
    fn test_batch_job_command_lists_final_dependencies() {
        let graph = compile_with_arch(
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
      outputs: [data/clean.csv]
    sim:
      kind: sbatch
      environment: py
      script_path: jobs/sim.sh
      args: ["{seed}"]
      inputs:
        - configs/{seed}.yaml
        - from_stage_outputs: prep
      outputs: ["out/{seed}/"]
      iterate_over:
        - arg_name: seed
          values: [1, 2]
"#,
        );
        let sim = managed(&graph, "sim");
        assert_eq!(
            sim.deps,
            vec!["jobs/sim.sh", "configs/${item.seed}.yaml", "uv.lock", "data/clean.csv"]
        );
        assert_eq!(
            sim.cmd,
            "labflow slurm batch --name sim --environment py \
             --dep jobs/sim.sh --dep \"configs/${item.seed}.yaml\" --dep uv.lock --dep data/clean.csv \
             --out out/${item.seed}/ -- jobs/sim.sh ${item.seed}"
        );
    }

    #[test]
    fn test_common_fields_carried() {
        let graph = compile_with_arch(
            r#"
pipeline:
  stages:
    s:
      kind: r-script
      environment: _system
      script_path: s.R
      working_directory: analysis
      always_run: true
      description: Fit the model
"#,
        );
        let s = managed(&graph, "s");
        assert_eq!(s.wdir.as_deref(), Some("analysis"));
        assert!(s.always_changed);
        assert_eq!(s.desc.as_deref(), Some("Fit the model"));
    }

    #[test]
    fn test_merge_preserves_manual_stage() {
        let p = project(
            r#"
pipeline:
  stages:
    build:
      kind: shell-command
      environment: _system
      command: make
"#,
        );
        let prior = StageGraph::from_yaml(
            r#"
stages:
  manual-step:
    cmd: ./publish.sh
    deps: [site/]
"#,
        )
        .unwrap();

        let graph = compile(&p, Some(&prior)).unwrap();
        assert_eq!(graph.stages["manual-step"], prior.stages["manual-step"]);
        assert_eq!(managed(&graph, "build").cmd, "bash -c \"make\"");
    }

    #[test]
    fn test_recompilation_is_idempotent() {
        let p = project(STUDY);
        let mut config = p.compiler.clone();
        config.architecture = Some("arm64".into());
        let compiler = PipelineCompiler::new(&p).with_config(config);

        let prior = StageGraph::from_yaml("stages:\n  manual-step:\n    cmd: ./by-hand.sh\n").unwrap();
        let first = compiler.compile(Some(&prior)).unwrap().to_yaml().unwrap();

        let reread = StageGraph::from_yaml(&first).unwrap();
        let second = compiler.compile(Some(&reread)).unwrap().to_yaml().unwrap();

        assert_eq!(first, second);
    }
}
