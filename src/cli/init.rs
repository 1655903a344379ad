// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 labflow contributors

//! Init command - create a new labflow project

use colored::Colorize;
use miette::Result;
use std::path::Path;

use crate::project::PROJECT_FILE;
use crate::utils::{code, print_success};

/// Run the init command
pub fn run(name: Option<String>, template: Option<String>, force: bool, verbose: bool) -> Result<()> {
    let project_name = name.unwrap_or_else(|| {
        std::env::current_dir()
            .ok()
            .and_then(|p| p.file_name().map(|s| s.to_string_lossy().to_string()))
            .unwrap_or_else(|| "my-study".to_string())
    });

    println!("{}", "Initializing labflow project...".bold());
    println!();

    if Path::new(PROJECT_FILE).exists() && !force {
        return Err(miette::miette!(
            "{} already exists. Use --force to overwrite.",
            PROJECT_FILE
        ));
    }

    let (project_content, dirs): (String, &[&str]) = match template.as_deref() {
        None | Some("default") => (
            generate_default_template(&project_name),
            &["scripts", "data", "results"],
        ),
        Some("notebook") => (generate_notebook_template(&project_name), &["notebooks", "data"]),
        Some("paper") => (
            generate_paper_template(&project_name),
            &["scripts", "figures", "paper"],
        ),
        Some(t) => {
            return Err(miette::miette!(
                "Unknown template: '{}'\n\nAvailable templates:\n\
                 • default   - Python scripts with a parameter sweep\n\
                 • notebook  - Parameterized Jupyter notebook\n\
                 • paper     - Figures feeding a LaTeX paper",
                t
            ));
        }
    };

    std::fs::write(PROJECT_FILE, &project_content)
        .map_err(|e| miette::miette!("Failed to write {}: {}", PROJECT_FILE, e))?;

    print_success(&format!("Created {}", PROJECT_FILE));

    for dir in dirs {
        if !Path::new(dir).exists() {
            std::fs::create_dir_all(dir)
                .map_err(|e| miette::miette!("Failed to create directory '{}': {}", dir, e))?;
            print_success(&format!("Created {}/", dir));
        }
    }

    println!();
    println!("{}", "Project initialized!".green().bold());
    println!();
    println!("Next steps:");
    println!("  1. Edit {} to define your pipeline", code(PROJECT_FILE));
    println!("  2. Run {} to write dvc.yaml", code("labflow compile"));
    println!("  3. Run {} to execute it", code("dvc repro"));
    println!();

    if verbose {
        println!("{}", "Generated project:".dimmed());
        println!("{}", "─".repeat(50).dimmed());
        println!("{}", project_content.dimmed());
    }

    Ok(())
}

fn generate_default_template(name: &str) -> String {
    format!(
        r#"# labflow project
# Run `labflow compile` to turn this file into dvc.yaml

name: "{name}"

parameters:
  seeds: [1, 2, 3]

environments:
  py:
    kind: uv
    path: pyproject.toml

pipeline:
  stages:
    prepare:
      kind: python-script
      environment: py
      script_path: scripts/prepare.py
      inputs:
        - data/raw
      outputs:
        - data/prepared.csv

    train:
      kind: python-script
      environment: py
      script_path: scripts/train.py
      args: ["--seed", "{{seed}}"]
      inputs:
        - from_stage_outputs: prepare
      outputs:
        - results/seed-{{seed}}.json
      iterate_over:
        - arg_name: seed
          values:
            - parameter: seeds
"#
    )
}

fn generate_notebook_template(name: &str) -> String {
    format!(
        r#"# labflow project - parameterized notebook

name: "{name}"

environments:
  py:
    kind: uv
    path: pyproject.toml

pipeline:
  stages:
    explore:
      kind: jupyter-notebook
      environment: py
      notebook_path: notebooks/explore.ipynb
      html_storage: git
      parameters:
        sample_size: 1000
      inputs:
        - data/observations.csv
"#
    )
}

fn generate_paper_template(name: &str) -> String {
    format!(
        r#"# labflow project - figures and paper

name: "{name}"

environments:
  py:
    kind: uv
    path: pyproject.toml
  tex:
    kind: docker
    path: paper/Dockerfile

pipeline:
  stages:
    figures:
      kind: python-script
      environment: py
      script_path: scripts/figures.py
      outputs:
        - figures/

    paper:
      kind: latex
      environment: tex
      target_path: paper/main.tex
      inputs:
        - paper/references.bib
        - from_stage_outputs: figures
"#
    )
}
