// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 labflow contributors

//! Pipeline definition structures
//!
//! Defines the schema for the `pipeline` section of labflow.yaml.

use indexmap::IndexMap;
use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::Number;

use crate::errors::{LabflowError, LabflowResult};

/// Environment name meaning "run directly on the host system"
pub const SYSTEM_ENVIRONMENT: &str = "_system";

/// Fields every stage kind accepts
const COMMON_FIELDS: &[&str] = &[
    "name",
    "kind",
    "environment",
    "working_directory",
    "wdir",
    "inputs",
    "outputs",
    "always_run",
    "iterate_over",
    "description",
];

/// Pipeline definition: stages keyed by name, in declaration order
#[derive(Debug, Clone, Default, Serialize)]
pub struct Pipeline {
    pub stages: IndexMap<String, Stage>,
}

impl Pipeline {
    /// Build a pipeline from raw stage mappings, enforcing the strict schema
    ///
    /// Each stage may only carry the common fields plus those of its kind.
    /// The map key becomes the stage name; a conflicting self-declared name
    /// is rejected.
    pub fn from_stage_values(raw: IndexMap<String, serde_yaml::Value>) -> LabflowResult<Self> {
        let mut stages = IndexMap::with_capacity(raw.len());

        for (key, value) in raw {
            let mut stage = parse_stage(&key, value)?;

            if !stage.name.is_empty() && stage.name != key {
                return Err(LabflowError::invalid_field(
                    &key,
                    "name",
                    format!("declared name '{}' does not match key '{}'", stage.name, key),
                ));
            }
            stage.name = key.clone();
            stages.insert(key, stage);
        }

        Ok(Self { stages })
    }

    /// Get a stage by name
    pub fn get_stage(&self, name: &str) -> Option<&Stage> {
        self.stages.get(name)
    }

    /// Get all stage names in declaration order
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.keys().map(String::as_str).collect()
    }
}

fn parse_stage(key: &str, value: serde_yaml::Value) -> LabflowResult<Stage> {
    let serde_yaml::Value::Mapping(map) = &value else {
        return Err(LabflowError::invalid_stage(key, "stage must be a mapping"));
    };

    let kind = match map.get("kind") {
        Some(serde_yaml::Value::String(kind)) => kind.clone(),
        Some(_) => return Err(LabflowError::invalid_field(key, "kind", "must be a string")),
        None => return Err(LabflowError::invalid_field(key, "kind", "missing stage kind")),
    };

    let Some(kind_fields) = StageKind::fields_for(&kind) else {
        return Err(LabflowError::invalid_field(
            key,
            "kind",
            format!("unknown stage kind '{}'", kind),
        ));
    };

    for field in map.keys() {
        let Some(field) = field.as_str() else {
            return Err(LabflowError::invalid_stage(key, "field names must be strings"));
        };
        if !COMMON_FIELDS.contains(&field) && !kind_fields.contains(&field) {
            return Err(LabflowError::invalid_field(
                key,
                field,
                format!("unknown field for stage kind '{}'", kind),
            ));
        }
    }

    serde_yaml::from_value(value)
        .map_err(|e| LabflowError::invalid_stage(key, e.to_string()))
}

/// A single pipeline stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage {
    /// Stage name, assigned from the pipeline key on load
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    /// Kind-specific fields
    #[serde(flatten)]
    pub kind: StageKind,

    /// Environment to run in, or `_system` for the host
    #[serde(default)]
    pub environment: Option<String>,

    /// Directory the engine runs the command from
    #[serde(default, alias = "wdir")]
    pub working_directory: Option<String>,

    /// Input paths and references to other stages' outputs
    #[serde(default)]
    pub inputs: Vec<Input>,

    /// Declared outputs
    #[serde(default)]
    pub outputs: Vec<Output>,

    /// Re-run even when nothing changed
    #[serde(default)]
    pub always_run: bool,

    /// Iteration axes
    #[serde(default)]
    pub iterate_over: Option<Vec<StageIteration>>,

    /// Stage description
    #[serde(default)]
    pub description: Option<String>,
}

impl Stage {
    /// Create a stage with default common fields
    pub fn new(name: &str, environment: &str, kind: StageKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            environment: Some(environment.to_string()),
            working_directory: None,
            inputs: vec![],
            outputs: vec![],
            always_run: false,
            iterate_over: None,
            description: None,
        }
    }

    /// Environment name, if set
    pub fn environment(&self) -> Option<&str> {
        self.environment.as_deref()
    }

    /// Literal input paths in declaration order
    pub fn input_paths(&self) -> impl Iterator<Item = &str> {
        self.inputs.iter().filter_map(Input::path)
    }

    /// Names of stages whose outputs this stage consumes
    pub fn stage_references(&self) -> impl Iterator<Item = &str> {
        self.inputs.iter().filter_map(Input::references_stage)
    }

    /// Argument names declared by all iteration axes
    pub fn iteration_arg_names(&self) -> Vec<&str> {
        self.iterate_over
            .iter()
            .flatten()
            .flat_map(|it| it.arg_name.names())
            .collect()
    }

    /// Get the kind name as written in YAML
    pub fn kind_name(&self) -> &'static str {
        self.kind.name()
    }
}

/// Stage kinds and their kind-specific fields
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum StageKind {
    PythonScript(ScriptStage),
    RScript(ScriptStage),
    JuliaScript(ScriptStage),
    MatlabScript(MatlabScriptStage),
    ShellScript(ShellScriptStage),
    ShellCommand(ShellCommandStage),
    DockerCommand(CommandStage),
    JuliaCommand(CommandStage),
    MatlabCommand(CommandStage),
    Latex(LatexStage),
    JupyterNotebook(NotebookStage),
    Sbatch(SbatchStage),
    WordToPdf(WordToPdfStage),
}

impl StageKind {
    /// Kind-specific field names, or `None` for an unknown kind
    pub fn fields_for(kind: &str) -> Option<&'static [&'static str]> {
        let fields: &'static [&'static str] = match kind {
            "python-script" | "r-script" | "julia-script" => &["script_path", "args"],
            "matlab-script" => &["script_path"],
            "shell-script" => &["script_path", "args", "shell"],
            "shell-command" => &["command", "shell"],
            "docker-command" | "julia-command" | "matlab-command" => &["command"],
            "latex" => &["target_path", "latexmkrc_path", "force"],
            "jupyter-notebook" => &[
                "notebook_path",
                "cleaned_ipynb_storage",
                "executed_ipynb_storage",
                "html_storage",
                "parameters",
                "language",
            ],
            "sbatch" => &["script_path", "args", "sbatch_options"],
            "word-to-pdf" => &["word_doc_path"],
            _ => return None,
        };
        Some(fields)
    }

    /// Kind name as written in YAML
    pub fn name(&self) -> &'static str {
        match self {
            Self::PythonScript(_) => "python-script",
            Self::RScript(_) => "r-script",
            Self::JuliaScript(_) => "julia-script",
            Self::MatlabScript(_) => "matlab-script",
            Self::ShellScript(_) => "shell-script",
            Self::ShellCommand(_) => "shell-command",
            Self::DockerCommand(_) => "docker-command",
            Self::JuliaCommand(_) => "julia-command",
            Self::MatlabCommand(_) => "matlab-command",
            Self::Latex(_) => "latex",
            Self::JupyterNotebook(_) => "jupyter-notebook",
            Self::Sbatch(_) => "sbatch",
            Self::WordToPdf(_) => "word-to-pdf",
        }
    }
}

/// Script run by a language interpreter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptStage {
    pub script_path: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// MATLAB script, run without arguments
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatlabScriptStage {
    pub script_path: String,
}

/// Shell script
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellScriptStage {
    pub script_path: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub shell: Shell,
}

/// Inline shell command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellCommandStage {
    pub command: String,
    #[serde(default)]
    pub shell: Shell,
}

/// Inline command run as-is inside the environment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandStage {
    pub command: String,
}

/// LaTeX document build
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatexStage {
    pub target_path: String,
    #[serde(default)]
    pub latexmkrc_path: Option<String>,
    /// Keep going past errors
    #[serde(default)]
    pub force: bool,
}

/// Jupyter notebook execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotebookStage {
    pub notebook_path: String,
    #[serde(default = "default_cleaned_storage")]
    pub cleaned_ipynb_storage: Storage,
    #[serde(default)]
    pub executed_ipynb_storage: Storage,
    /// `None` disables HTML export
    #[serde(default = "default_html_storage")]
    pub html_storage: Option<Storage>,
    #[serde(default)]
    pub parameters: IndexMap<String, serde_json::Value>,
    #[serde(default)]
    pub language: Option<NotebookLanguage>,
}

fn default_cleaned_storage() -> Storage {
    Storage::Git
}

fn default_html_storage() -> Option<Storage> {
    Some(Storage::Dvc)
}

/// Kernel language for notebooks
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NotebookLanguage {
    Python,
    Matlab,
    Julia,
    R,
}

impl std::fmt::Display for NotebookLanguage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Python => write!(f, "python"),
            Self::Matlab => write!(f, "matlab"),
            Self::Julia => write!(f, "julia"),
            Self::R => write!(f, "r"),
        }
    }
}

/// Batch job submitted to a SLURM scheduler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SbatchStage {
    pub script_path: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub sbatch_options: Vec<String>,
}

/// Word document converted to PDF
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WordToPdfStage {
    pub word_doc_path: String,
}

/// Shells available to shell stages
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Shell {
    Sh,
    #[default]
    Bash,
    Zsh,
}

impl std::fmt::Display for Shell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sh => write!(f, "sh"),
            Self::Bash => write!(f, "bash"),
            Self::Zsh => write!(f, "zsh"),
        }
    }
}

/// Input specification for a stage
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Input {
    /// Literal file or directory path
    Path(String),

    /// All outputs of another stage
    FromStageOutputs(FromStageOutputs),
}

/// Reference to another stage's outputs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct FromStageOutputs {
    pub from_stage_outputs: String,
}

impl Input {
    /// Create a reference to another stage's outputs
    pub fn from_stage(name: &str) -> Self {
        Self::FromStageOutputs(FromStageOutputs {
            from_stage_outputs: name.to_string(),
        })
    }

    /// Literal path, if this is not a stage reference
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::Path(p) => Some(p),
            Self::FromStageOutputs(_) => None,
        }
    }

    /// Check if this input references another stage
    pub fn references_stage(&self) -> Option<&str> {
        match self {
            Self::Path(_) => None,
            Self::FromStageOutputs(r) => Some(&r.from_stage_outputs),
        }
    }
}

/// Output specification for a stage
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Output {
    /// Plain path, cached and deleted before each run
    Path(String),

    /// Path with explicit storage and deletion policy
    Detailed(PathOutput),
}

impl Output {
    /// Get the output path
    pub fn path(&self) -> &str {
        match self {
            Self::Path(p) => p,
            Self::Detailed(o) => &o.path,
        }
    }

    /// Storage class for this output
    pub fn storage(&self) -> Storage {
        match self {
            Self::Path(_) => Storage::Dvc,
            Self::Detailed(o) => o.storage,
        }
    }

    /// Whether the engine must leave the artifact in place before running
    pub fn persist(&self) -> bool {
        match self {
            Self::Path(_) => false,
            Self::Detailed(o) => !o.delete_before_run,
        }
    }
}

/// Output with storage class and deletion policy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PathOutput {
    pub path: String,
    #[serde(default)]
    pub storage: Storage,
    #[serde(default = "default_true")]
    pub delete_before_run: bool,
}

fn default_true() -> bool {
    true
}

/// Where an artifact is tracked
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Storage {
    /// Committed to version control
    Git,
    /// Content-addressed cache
    #[default]
    Dvc,
}

impl Storage {
    /// Whether the engine caches artifacts of this class
    pub fn is_cached(self) -> bool {
        matches!(self, Self::Dvc)
    }
}

impl std::fmt::Display for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Git => write!(f, "git"),
            Self::Dvc => write!(f, "dvc"),
        }
    }
}

/// One iteration axis of a stage
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct StageIteration {
    pub arg_name: ArgName,
    pub values: Vec<IterValue>,
}

/// A single argument name, or a linked group iterated as tuples
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ArgName {
    Single(String),
    Linked(Vec<String>),
}

impl ArgName {
    /// All argument names on this axis
    pub fn names(&self) -> Vec<&str> {
        match self {
            Self::Single(name) => vec![name.as_str()],
            Self::Linked(names) => names.iter().map(String::as_str).collect(),
        }
    }
}

impl std::fmt::Display for ArgName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Single(name) => write!(f, "{}", name),
            Self::Linked(names) => write!(f, "[{}]", names.join(", ")),
        }
    }
}

/// One entry of an axis' `values` list
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum IterValue {
    /// `{range: {start, stop, step}}`
    Range(RangeValue),
    /// `{parameter: name}`
    Parameter(ParameterRef),
    /// Anything else passes through unchanged
    Literal(serde_json::Value),
}

// Only a single-key `range` or `parameter` map is a directive. Derived
// struct visitors also accept sequences, which would read a literal list
// like `[fast]` as `{parameter: fast}`.
impl<'de> Deserialize<'de> for IterValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        let directive = match &value {
            serde_json::Value::Object(map) if map.len() == 1 => map.keys().next().cloned(),
            _ => None,
        };

        match directive.as_deref() {
            Some("range") => serde_json::from_value(value)
                .map(Self::Range)
                .map_err(de::Error::custom),
            Some("parameter") => serde_json::from_value(value)
                .map(Self::Parameter)
                .map_err(de::Error::custom),
            _ => Ok(Self::Literal(value)),
        }
    }
}

/// Wrapper matching `{range: ...}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RangeValue {
    pub range: Range,
}

/// Half-open numeric range
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Range {
    pub start: Number,
    pub stop: Number,
    pub step: Number,
}

/// Wrapper matching `{parameter: name}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ParameterRef {
    pub parameter: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> LabflowResult<Pipeline> {
        let raw: IndexMap<String, serde_yaml::Value> = serde_yaml::from_str(yaml).unwrap();
        Pipeline::from_stage_values(raw)
    }

    #[test]
    fn test_parse_python_stage() {
        let pipeline = parse(
            r#"
train:
  kind: python-script
  environment: py
  script_path: train.py
  args: ["--epochs", "10"]
  inputs:
    - data/raw.csv
    - from_stage_outputs: prep
  outputs:
    - model.pkl
    - path: metrics.json
      storage: git
      delete_before_run: false
"#,
        )
        .unwrap();

        let stage = pipeline.get_stage("train").unwrap();
        assert_eq!(stage.name, "train");
        assert_eq!(stage.kind_name(), "python-script");
        assert_eq!(stage.input_paths().collect::<Vec<_>>(), vec!["data/raw.csv"]);
        assert_eq!(stage.stage_references().collect::<Vec<_>>(), vec!["prep"]);
        assert_eq!(stage.outputs[1].storage(), Storage::Git);
        assert!(stage.outputs[1].persist());
        assert!(!stage.outputs[0].persist());
        match &stage.kind {
            StageKind::PythonScript(s) => assert_eq!(s.args, vec!["--epochs", "10"]),
            _ => panic!("Expected python-script"),
        }
    }

    #[test]
    fn test_declaration_order_preserved() {
        let pipeline = parse(
            r#"
zeta: {kind: shell-command, environment: _system, command: "echo z"}
alpha: {kind: shell-command, environment: _system, command: "echo a"}
"#,
        )
        .unwrap();
        assert_eq!(pipeline.stage_names(), vec!["zeta", "alpha"]);
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let err = parse("s: {kind: fortran-script, environment: x}").unwrap_err();
        match err {
            LabflowError::SchemaViolation { stage, field, reason } => {
                assert_eq!(stage, "s");
                assert_eq!(field, "s.kind");
                assert!(reason.contains("fortran-script"));
            }
            other => panic!("Expected SchemaViolation, got {other:?}"),
        }
    }

    #[test]
    fn test_extra_field_rejected() {
        // `command` belongs to command kinds, not scripts
        let err = parse(
            "s: {kind: python-script, environment: py, script_path: a.py, command: ls}",
        )
        .unwrap_err();
        assert!(matches!(
            err,
            LabflowError::SchemaViolation { ref field, .. } if field == "s.command"
        ));
    }

    #[test]
    fn test_name_mismatch_rejected() {
        let err = parse("s: {name: other, kind: latex, environment: tex, target_path: p.tex}")
            .unwrap_err();
        assert!(matches!(err, LabflowError::SchemaViolation { ref field, .. } if field == "s.name"));
    }

    #[test]
    fn test_matching_name_accepted() {
        let pipeline =
            parse("s: {name: s, kind: latex, environment: tex, target_path: p.tex}").unwrap();
        assert_eq!(pipeline.stages["s"].name, "s");
    }

    #[test]
    fn test_unknown_output_field_rejected() {
        let err = parse(
            r#"
s:
  kind: shell-command
  environment: _system
  command: "true"
  outputs:
    - path: out.txt
      cache: false
"#,
        )
        .unwrap_err();
        assert!(matches!(err, LabflowError::SchemaViolation { .. }));
    }

    #[test]
    fn test_wdir_alias() {
        let pipeline =
            parse("s: {kind: r-script, environment: r, script_path: a.R, wdir: analysis}")
                .unwrap();
        assert_eq!(pipeline.stages["s"].working_directory.as_deref(), Some("analysis"));
    }

    #[test]
    fn test_notebook_defaults() {
        let pipeline =
            parse("nb: {kind: jupyter-notebook, environment: py, notebook_path: a.ipynb}")
                .unwrap();
        let StageKind::JupyterNotebook(nb) = &pipeline.stages["nb"].kind else {
            panic!("Expected notebook");
        };
        assert_eq!(nb.cleaned_ipynb_storage, Storage::Git);
        assert_eq!(nb.executed_ipynb_storage, Storage::Dvc);
        assert_eq!(nb.html_storage, Some(Storage::Dvc));
    }

    #[test]
    fn test_notebook_html_disabled() {
        let pipeline = parse(
            "nb: {kind: jupyter-notebook, environment: py, notebook_path: a.ipynb, html_storage: null}",
        )
        .unwrap();
        let StageKind::JupyterNotebook(nb) = &pipeline.stages["nb"].kind else {
            panic!("Expected notebook");
        };
        assert_eq!(nb.html_storage, None);
    }

    #[test]
    fn test_iteration_values_parse() {
        let pipeline = parse(
            r#"
s:
  kind: python-script
  environment: py
  script_path: run.py
  iterate_over:
    - arg_name: n
      values: [1, {range: {start: 0, stop: 10, step: 2}}, {parameter: seeds}]
    - arg_name: [a, b]
      values: [[1, x], [2, y]]
"#,
        )
        .unwrap();
        let iters = pipeline.stages["s"].iterate_over.as_ref().unwrap();
        assert!(matches!(iters[0].values[0], IterValue::Literal(_)));
        assert!(matches!(iters[0].values[1], IterValue::Range(_)));
        assert!(matches!(iters[0].values[2], IterValue::Parameter(_)));
        assert_eq!(iters[1].arg_name, ArgName::Linked(vec!["a".into(), "b".into()]));
        assert_eq!(pipeline.stages["s"].iteration_arg_names(), vec!["n", "a", "b"]);
    }

    #[test]
    fn test_iteration_list_literals_are_not_directives() {
        let pipeline = parse(
            r#"
s:
  kind: python-script
  environment: py
  script_path: run.py
  iterate_over:
    - arg_name: cfg
      values: [[fast], slow, [1, 2]]
    - arg_name: [a]
      values: [[x], [y]]
"#,
        )
        .unwrap();
        let iters = pipeline.stages["s"].iterate_over.as_ref().unwrap();
        assert_eq!(iters[0].values[0], IterValue::Literal(serde_json::json!(["fast"])));
        assert_eq!(iters[0].values[2], IterValue::Literal(serde_json::json!([1, 2])));
        assert_eq!(iters[1].values[1], IterValue::Literal(serde_json::json!(["y"])));
    }

    #[test]
    fn test_iteration_malformed_directive() {
        let err = parse(
            r#"
s:
  kind: python-script
  environment: py
  script_path: run.py
  iterate_over:
    - arg_name: n
      values: [{range: {start: 0, stop: 3}}]
"#,
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_missing_environment_parses() {
        // Reported by the compiler, not the schema
        let pipeline = parse("s: {kind: python-script, script_path: a.py}").unwrap();
        assert!(pipeline.stages["s"].environment.is_none());
    }
}
