// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 labflow contributors

//! Per-kind command, dependency and output synthesis
//!
//! Every stage kind answers the same three questions: what command runs
//! it, which paths it depends on, and which artifacts it produces. All of
//! it is derived from the stage's own fields; nothing here touches the
//! filesystem.

use base64::Engine;
use indexmap::IndexSet;

use crate::pipeline::iteration::placeholders_in;
use crate::pipeline::{
    NotebookStage, Output, SbatchStage, Stage, StageKind, Storage, SYSTEM_ENVIRONMENT,
};

/// Root for derived notebook artifacts
pub const NOTEBOOK_DIR: &str = ".labflow/notebooks";

/// Where batch job logs are written
pub const SLURM_LOG_DIR: &str = ".labflow/slurm/logs";

/// An artifact produced by a stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputArtifact {
    pub path: String,
    pub storage: Storage,
    /// Leave in place before each run
    pub persist: bool,
}

impl OutputArtifact {
    pub fn new(path: impl Into<String>, storage: Storage, persist: bool) -> Self {
        Self {
            path: path.into(),
            storage,
            persist,
        }
    }
}

impl From<&Output> for OutputArtifact {
    fn from(output: &Output) -> Self {
        Self::new(output.path(), output.storage(), output.persist())
    }
}

impl Stage {
    /// Command the engine runs for this stage
    pub fn command(&self) -> String {
        match &self.kind {
            StageKind::PythonScript(s) => self.in_environment(with_args("python", &s.script_path, &s.args)),
            StageKind::RScript(s) => self.in_environment(with_args("Rscript", &s.script_path, &s.args)),
            StageKind::JuliaScript(s) => self.in_environment(with_args("julia", &s.script_path, &s.args)),
            StageKind::MatlabScript(s) => self.in_environment(format!(
                "matlab -batch {}",
                double_quote(&format!("run('{}');", s.script_path))
            )),
            StageKind::ShellScript(s) => {
                self.in_environment(with_args(&s.shell.to_string(), &s.script_path, &s.args))
            }
            StageKind::ShellCommand(s) => {
                self.in_environment(format!("{} -c {}", s.shell, double_quote(&s.command)))
            }
            StageKind::DockerCommand(s) => self.in_environment(s.command.clone()),
            StageKind::JuliaCommand(s) => {
                self.in_environment(format!("julia -e {}", double_quote(&s.command)))
            }
            StageKind::MatlabCommand(s) => {
                self.in_environment(format!("matlab -batch {}", double_quote(&s.command)))
            }
            StageKind::Latex(s) => {
                let mut cmd = String::from("latexmk -cd -interaction=nonstopmode -pdf");
                if let Some(rc) = &s.latexmkrc_path {
                    cmd.push_str(&format!(" -r {}", quote(rc)));
                }
                if s.force {
                    cmd.push_str(" -f");
                }
                cmd.push_str(&format!(" {}", quote(&s.target_path)));
                self.in_environment(cmd)
            }
            StageKind::JupyterNotebook(nb) => self.notebook_command(nb),
            StageKind::Sbatch(s) => {
                let deps: Vec<String> = self.dependencies().into_iter().collect();
                self.sbatch_command(s, &deps)
            }
            StageKind::WordToPdf(s) => format!(
                "labflow office word-to-pdf {} -o {}",
                quote(&s.word_doc_path),
                quote(&with_extension(&s.word_doc_path, "pdf"))
            ),
        }
    }

    /// Paths the stage depends on, in order, without duplicates
    pub fn dependencies(&self) -> IndexSet<String> {
        let mut deps = IndexSet::new();

        match &self.kind {
            StageKind::PythonScript(s) | StageKind::RScript(s) | StageKind::JuliaScript(s) => {
                deps.insert(s.script_path.clone());
            }
            StageKind::MatlabScript(s) => {
                deps.insert(s.script_path.clone());
            }
            StageKind::ShellScript(s) => {
                deps.insert(s.script_path.clone());
            }
            StageKind::Sbatch(s) => {
                deps.insert(s.script_path.clone());
            }
            StageKind::Latex(s) => {
                deps.insert(s.target_path.clone());
                if let Some(rc) = &s.latexmkrc_path {
                    deps.insert(rc.clone());
                }
            }
            StageKind::JupyterNotebook(nb) => {
                // Depending on the cleaned copy means output-only edits to the
                // notebook do not trigger a re-run
                deps.insert(nb.cleaned_path());
            }
            StageKind::WordToPdf(s) => {
                deps.insert(s.word_doc_path.clone());
            }
            StageKind::ShellCommand(_)
            | StageKind::DockerCommand(_)
            | StageKind::JuliaCommand(_)
            | StageKind::MatlabCommand(_) => {}
        }

        deps.extend(self.input_paths().map(String::from));
        deps
    }

    /// Artifacts the stage produces
    pub fn outputs(&self) -> Vec<OutputArtifact> {
        let mut outs: Vec<OutputArtifact> = self.outputs.iter().map(OutputArtifact::from).collect();

        match &self.kind {
            StageKind::Latex(s) => {
                outs.push(OutputArtifact::new(
                    with_extension(&s.target_path, "pdf"),
                    Storage::Dvc,
                    false,
                ));
            }
            StageKind::JupyterNotebook(nb) => {
                outs.push(OutputArtifact::new(
                    nb.executed_path(),
                    nb.executed_ipynb_storage,
                    false,
                ));
                if let Some(storage) = nb.html_storage {
                    outs.push(OutputArtifact::new(nb.html_path(), storage, false));
                }
            }
            StageKind::Sbatch(_) => {
                // The submission tool owns the artifact lifecycle of batch jobs
                for out in &mut outs {
                    out.persist = true;
                }
                outs.push(OutputArtifact::new(
                    format!("{}/{}.out", SLURM_LOG_DIR, self.name),
                    Storage::Git,
                    true,
                ));
            }
            StageKind::WordToPdf(s) => {
                outs.push(OutputArtifact::new(
                    with_extension(&s.word_doc_path, "pdf"),
                    Storage::Dvc,
                    false,
                ));
            }
            _ => {}
        }

        outs
    }

    /// Wrap `inner` so it runs inside this stage's environment
    fn in_environment(&self, inner: String) -> String {
        match self.environment() {
            Some(env) if env != SYSTEM_ENVIRONMENT => {
                format!("labflow xenv -n {} -- {}", env, inner)
            }
            _ => inner,
        }
    }

    fn notebook_command(&self, nb: &NotebookStage) -> String {
        let mut cmd = format!(
            "labflow nb execute --environment {} --no-check",
            self.environment().unwrap_or(SYSTEM_ENVIRONMENT)
        );
        if let Some(language) = nb.language {
            cmd.push_str(&format!(" --language {}", language));
        }
        cmd.push_str(&format!(" {}", double_quote(&nb.notebook_path)));
        if nb.html_storage.is_some() {
            cmd.push_str(" --to html");
        }

        // Values holding iteration placeholders stay visible to the
        // templating pass; the rest travel base64-encoded
        let args = self.iteration_arg_names();
        let is_templated = |value: &serde_json::Value| {
            value
                .as_str()
                .is_some_and(|s| placeholders_in(s).iter().any(|p| args.contains(p)))
        };

        let fixed: serde_json::Map<String, serde_json::Value> = nb
            .parameters
            .iter()
            .filter(|(_, v)| !is_templated(v))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if !fixed.is_empty() {
            let json = serde_json::Value::Object(fixed).to_string();
            let encoded = base64::engine::general_purpose::STANDARD.encode(json);
            cmd.push_str(&format!(" --params-base64 {}", encoded));
        }

        for (key, value) in nb.parameters.iter().filter(|(_, v)| is_templated(v)) {
            let value = value.as_str().unwrap_or_default();
            cmd.push_str(&format!(" -p {}", quote(&format!("{}={}", key, value))));
        }

        cmd
    }

    /// Batch job command embedding `deps` instead of the stage's own list
    ///
    /// The submission tool does its own change detection, so its `--dep`
    /// flags must match the graph entry's final `deps`, lock file and
    /// upstream outputs included. `None` for every other kind.
    pub fn batch_command(&self, deps: &[String]) -> Option<String> {
        match &self.kind {
            StageKind::Sbatch(job) => Some(self.sbatch_command(job, deps)),
            _ => None,
        }
    }

    fn sbatch_command(&self, job: &SbatchStage, deps: &[String]) -> String {
        let mut cmd = format!("labflow slurm batch --name {}", self.name);
        if let Some(env) = self.environment().filter(|e| *e != SYSTEM_ENVIRONMENT) {
            cmd.push_str(&format!(" --environment {}", env));
        }
        for dep in deps {
            cmd.push_str(&format!(" --dep {}", quote(dep)));
        }
        for out in self.outputs.iter().filter(|o| !o.persist()) {
            cmd.push_str(&format!(" --out {}", quote(out.path())));
        }
        for option in &job.sbatch_options {
            cmd.push_str(&format!(" -s {}", quote(option)));
        }
        cmd.push_str(" -- ");
        cmd.push_str(&with_args("", &job.script_path, &job.args));
        cmd
    }
}

impl NotebookStage {
    /// Command that strips outputs and metadata from the notebook
    pub fn clean_command(&self) -> String {
        format!("labflow nb clean {}", double_quote(&self.notebook_path))
    }

    /// Copy of the notebook with outputs stripped
    pub fn cleaned_path(&self) -> String {
        format!("{}/cleaned/{}", NOTEBOOK_DIR, self.notebook_path)
    }

    /// Executed notebook, one per distinct parameter set
    pub fn executed_path(&self) -> String {
        format!(
            "{}/executed/{}{}.ipynb",
            NOTEBOOK_DIR,
            strip_extension(&self.notebook_path),
            self.parameter_suffix()
        )
    }

    /// HTML rendering of the executed notebook
    pub fn html_path(&self) -> String {
        format!(
            "{}/html/{}{}.html",
            NOTEBOOK_DIR,
            strip_extension(&self.notebook_path),
            self.parameter_suffix()
        )
    }

    /// `-k1=v1-k2=v2` in declaration order, empty without parameters
    fn parameter_suffix(&self) -> String {
        self.parameters
            .iter()
            .map(|(k, v)| match v {
                serde_json::Value::String(s) => format!("-{}={}", k, s),
                other => format!("-{}={}", k, other),
            })
            .collect()
    }
}

/// `program script args...`, or `script args...` for an empty program
fn with_args(program: &str, script: &str, args: &[String]) -> String {
    let mut parts = Vec::with_capacity(args.len() + 2);
    if !program.is_empty() {
        parts.push(program.to_string());
    }
    parts.push(quote(script));
    parts.extend(args.iter().cloned());
    parts.join(" ")
}

/// Characters the shell treats specially outside quotes
const SHELL_SPECIAL: &[char] = &[
    '"', '\'', '\\', '$', '`', ';', '&', '|', '<', '>', '(', ')', '*', '?', '[', ']', '#', '~', '!',
];

/// Double-quote `s` unless the shell would read it as one literal word
///
/// `$` stays live inside the quotes so engine `${item.x}` expressions are
/// still substituted.
fn quote(s: &str) -> String {
    if s.is_empty() || s.chars().any(|c| c.is_whitespace() || SHELL_SPECIAL.contains(&c)) {
        double_quote(s)
    } else {
        s.to_string()
    }
}

fn double_quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

fn strip_extension(path: &str) -> &str {
    let file_start = path.rfind('/').map_or(0, |i| i + 1);
    match path[file_start..].rfind('.') {
        Some(dot) if dot > 0 => &path[..file_start + dot],
        _ => path,
    }
}

fn with_extension(path: &str, ext: &str) -> String {
    format!("{}.{}", strip_extension(path), ext)
}
