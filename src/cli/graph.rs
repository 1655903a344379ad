// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 labflow contributors

//! Graph command - visualize the compiled stages as a graph

use miette::Result;
use std::path::PathBuf;

use super::compile::compile_project;
use super::{load_project, CompileOptions, GraphFormat};
use crate::graph::StageGraph;
use crate::pipeline::DagBuilder;

/// Run the graph command
pub fn run(project_path: PathBuf, format: GraphFormat, _verbose: bool) -> Result<()> {
    let project = load_project(&project_path)?;

    // Include hand-written stages from the current graph file
    let compiled = compile_project(&project, &project_path, &CompileOptions::default())?;
    let graph = StageGraph::from_yaml(&compiled.yaml)?;

    let dag = DagBuilder::build(&graph)?;

    let output = match format {
        GraphFormat::Text => dag.to_text()?,
        GraphFormat::Dot => dag.to_dot(),
        GraphFormat::Mermaid => dag.to_mermaid(),
    };

    println!("{}", output);

    Ok(())
}
