// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 labflow contributors

//! Check command - validate the project

use colored::Colorize;
use miette::Result;
use std::path::PathBuf;

use super::{load_project, project_root};
use crate::pipeline::PipelineValidator;
use crate::utils::{print_error, print_header, print_section, print_success, print_warning};

/// Run the check command
pub fn run(project_path: PathBuf, verbose: bool) -> Result<()> {
    print_header("Checking project...");

    let project = match load_project(&project_path) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("  {} Failed to load {}", "✗".red(), project_path.display());
            eprintln!();
            return Err(e);
        }
    };

    print_success(&format!("{} matches the project schema", project_path.display()));

    let validation = PipelineValidator::validate(&project);
    let missing_files = PipelineValidator::validate_files(&project, &project_root(&project_path));

    if !validation.errors.is_empty() {
        print_section(&"Errors".red().bold().to_string());
        for error in &validation.errors {
            print_error(error);
        }
    }

    // Inputs may be fetched or generated later, so these only warn
    if !missing_files.is_empty() {
        print_section(&"Missing files".yellow().bold().to_string());
        for missing in &missing_files {
            print_warning(missing);
        }
    }

    if !validation.warnings.is_empty() {
        print_section(&"Warnings".yellow().bold().to_string());
        for warning in &validation.warnings {
            print_warning(warning);
        }
    }

    if verbose {
        print_section("Project summary");
        if let Some(name) = &project.name {
            println!("  Name: {}", name);
        }
        println!("  Environments: {}", project.environments.len());
        for (name, env) in &project.environments {
            println!("    - {} ({})", name, env.kind);
        }
        println!("  Stages: {}", project.pipeline.stages.len());
        for (name, stage) in &project.pipeline.stages {
            let env = stage.environment().unwrap_or("?");
            let detail = format!("[{}]", env);
            println!("    - {} ({}) {}", name, stage.kind_name(), detail.dimmed());
        }
    }

    println!();

    if !validation.is_valid() {
        return Err(miette::miette!("Project check failed"));
    }

    if validation.has_warnings() || !missing_files.is_empty() {
        println!("{}", "Project is valid but has warnings.".yellow().bold());
    } else {
        println!("{}", "Project is valid!".green().bold());
    }
    Ok(())
}
