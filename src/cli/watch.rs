// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 labflow contributors

//! Watch command - recompile on file changes

use colored::Colorize;
use miette::Result;
use notify::{RecursiveMode, Watcher};
use notify_debouncer_mini::{new_debouncer, DebouncedEventKind};
use std::path::{Path, PathBuf};
use std::sync::mpsc::channel;
use std::time::Duration;

use super::compile::compile_project;
use super::{load_project, project_root, CompileOptions};

/// Directories whose changes never affect the compiled graph
const IGNORED_DIRS: &[&str] = &[".labflow", ".dvc", ".git"];

/// Run the watch command
pub fn run(project_path: PathBuf, options: CompileOptions, debounce_ms: u64, verbose: bool) -> Result<()> {
    // Fail early on a missing project; later failures are only reported
    let project = load_project(&project_path)?;

    let root = project_root(&project_path);
    let root = root.canonicalize().unwrap_or(root);
    let output = root.join(options.apply(project.compiler.clone()).output);

    println!("{}", "Starting watch mode...".bold());
    println!("Watching {} (debounce: {}ms)", root.display(), debounce_ms);
    println!("Press {} to exit.", "Ctrl+C".cyan());
    println!();

    let (tx, rx) = channel();

    let mut debouncer = new_debouncer(Duration::from_millis(debounce_ms), tx)
        .map_err(|e| miette::miette!("Failed to create file watcher: {}", e))?;

    debouncer
        .watcher()
        .watch(&root, RecursiveMode::Recursive)
        .map_err(|e| miette::miette!("Failed to start watching: {}", e))?;

    recompile(&project_path, &options, verbose);

    loop {
        match rx.recv() {
            Ok(Ok(events)) => {
                let relevant: Vec<_> = events
                    .iter()
                    .filter(|e| matches!(e.kind, DebouncedEventKind::Any))
                    .filter(|e| is_relevant(&e.path, &root, &output))
                    .collect();

                if !relevant.is_empty() {
                    println!();
                    println!("{}", "─".repeat(50).dimmed());
                    println!(
                        "{}: {} file(s) changed",
                        "Change detected".yellow(),
                        relevant.len()
                    );

                    if verbose {
                        for event in &relevant {
                            println!("  {}", event.path.display());
                        }
                    }

                    println!();
                    recompile(&project_path, &options, verbose);
                }
            }
            Ok(Err(e)) => {
                eprintln!("{}: {:?}", "Watch error".red(), e);
            }
            Err(e) => {
                // Channel closed
                eprintln!("{}: {}", "Channel error".red(), e);
                break;
            }
        }
    }

    Ok(())
}

/// Changes to the written graph or to tool state directories are ignored
fn is_relevant(path: &Path, root: &Path, output: &Path) -> bool {
    if path == output {
        return false;
    }
    let relative = path.strip_prefix(root).unwrap_or(path);
    !relative
        .components()
        .any(|c| IGNORED_DIRS.iter().any(|d| c.as_os_str() == *d))
}

fn recompile(project_path: &Path, options: &CompileOptions, verbose: bool) {
    let start = std::time::Instant::now();

    let project = match load_project(project_path) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("{}: {:?}", "Failed to load project".red(), e);
            return;
        }
    };

    match compile_project(&project, project_path, options) {
        Ok(compiled) if !compiled.changed => {
            println!(
                "{} ({:.2}s)",
                "Graph is up to date".green(),
                start.elapsed().as_secs_f64()
            );
        }
        Ok(compiled) => match compiled.write() {
            Ok(()) => {
                println!(
                    "{} {} ({} stage(s), {:.2}s)",
                    "Wrote".green(),
                    compiled.output.display(),
                    compiled.stages,
                    start.elapsed().as_secs_f64()
                );
                if verbose {
                    println!("{}", compiled.yaml.dimmed());
                }
            }
            Err(e) => eprintln!("{}: {}", "Failed to write graph".red(), e),
        },
        Err(e) => {
            eprintln!("{}: {}", "Compilation failed".red(), e);
        }
    }
}
