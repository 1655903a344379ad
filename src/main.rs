// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 labflow contributors

//! labflow - research pipeline compiler
//!
//! Compiles labflow.yaml into a DVC stage graph.

use clap::Parser;
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use labflow::cli::{Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let default_filter = if cli.verbose { "labflow=debug" } else { "labflow=info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    // Change to specified directory if provided
    if let Some(ref dir) = cli.directory {
        std::env::set_current_dir(dir).map_err(|e| {
            miette::miette!("Failed to change to directory '{}': {}", dir.display(), e)
        })?;
    }

    // Dispatch to command handlers
    match cli.command {
        Commands::Init {
            name,
            template,
            force,
        } => labflow::cli::init::run(name, template, force, cli.verbose),
        Commands::Compile {
            project,
            options,
            dry_run,
        } => labflow::cli::compile::run(project, options, dry_run, cli.verbose),
        Commands::Check { project } => labflow::cli::check::run(project, cli.verbose),
        Commands::Graph { project, format } => {
            labflow::cli::graph::run(project, format, cli.verbose)
        }
        Commands::Watch {
            project,
            options,
            debounce,
        } => labflow::cli::watch::run(project, options, debounce, cli.verbose),
    }
}
