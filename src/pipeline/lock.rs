// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 labflow contributors

//! Environment lock paths
//!
//! Maps an environment declaration to the file recording its resolved
//! dependency set. Check stages write these files; every stage running in
//! the environment depends on them, so environment drift invalidates the
//! stages that use it.

use crate::project::{EnvKind, Environment};

/// Root of the lock hierarchy, relative to the project
pub const LOCK_DIR: &str = ".labflow/env-locks";

/// Canonical architecture identifier used in lock paths
///
/// `x86_64` and `amd64` collapse to `amd64`, `aarch64` and `arm64` to
/// `arm64`. A docker-style `linux/arm64` platform keeps only the CPU part.
pub fn canonical_architecture(raw: &str) -> String {
    let cpu = raw.rsplit('/').next().unwrap_or(raw).to_ascii_lowercase();
    match cpu.as_str() {
        "x86_64" | "amd64" | "x64" => "amd64".to_string(),
        "aarch64" | "arm64" => "arm64".to_string(),
        _ => cpu,
    }
}

/// Canonical architecture of the machine running the compiler
pub fn host_architecture() -> String {
    canonical_architecture(std::env::consts::ARCH)
}

/// Resolve the lock path for an environment
///
/// The environment's own `architecture` wins over `architecture`, which
/// wins over the host. Returns `None` for kinds without lock tracking.
pub fn lock_path(env: &Environment, name: &str, architecture: Option<&str>) -> Option<String> {
    let arch = || {
        env.architecture
            .as_deref()
            .or(architecture)
            .map(canonical_architecture)
            .unwrap_or_else(host_architecture)
    };

    match &env.kind {
        EnvKind::Docker | EnvKind::Matlab => Some(format!(
            "{}/{}/{}/{}.json",
            LOCK_DIR,
            env.kind,
            arch(),
            name
        )),
        EnvKind::Venv | EnvKind::UvVenv => Some(format!(
            "{}/{}/{}/{}.txt",
            LOCK_DIR,
            env.kind,
            arch(),
            name
        )),
        EnvKind::Conda => Some(format!("{}/conda/{}/{}.yml", LOCK_DIR, arch(), name)),
        EnvKind::Uv => Some(manifest_sibling(env.path.as_deref(), "uv.lock")),
        EnvKind::Pixi => Some(manifest_sibling(env.path.as_deref(), "pixi.lock")),
        EnvKind::Julia => Some(manifest_sibling(env.path.as_deref(), "Manifest.toml")),
        EnvKind::Ssh | EnvKind::Other(_) => None,
    }
}

/// Command that verifies an environment and rewrites its lock file
pub fn check_command(env: &Environment, name: &str) -> String {
    let subcommand = match &env.kind {
        EnvKind::Docker | EnvKind::Matlab => "docker-env",
        EnvKind::Venv | EnvKind::UvVenv => "venv",
        EnvKind::Conda => "conda-env",
        _ => "env",
    };
    format!("labflow check {} -n {}", subcommand, name)
}

/// `file_name` in the same directory as `manifest`, with `/` separators
fn manifest_sibling(manifest: Option<&str>, file_name: &str) -> String {
    match manifest.and_then(|m| m.rsplit_once('/')) {
        Some((dir, _)) if !dir.is_empty() => format!("{}/{}", dir, file_name),
        _ => file_name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(kind: EnvKind, path: Option<&str>) -> Environment {
        Environment::new(kind, path)
    }

    #[test]
    fn test_canonical_architecture() {
        assert_eq!(canonical_architecture("x86_64"), "amd64");
        assert_eq!(canonical_architecture("AMD64"), "amd64");
        assert_eq!(canonical_architecture("aarch64"), "arm64");
        assert_eq!(canonical_architecture("linux/arm64"), "arm64");
        assert_eq!(canonical_architecture("riscv64"), "riscv64");
    }

    #[test]
    fn test_container_lock_is_arch_specific_json() {
        let path = lock_path(&env(EnvKind::Docker, Some("Dockerfile")), "tex", Some("x86_64"));
        assert_eq!(path.as_deref(), Some(".labflow/env-locks/docker/amd64/tex.json"));

        let path = lock_path(&env(EnvKind::Matlab, None), "ml", Some("arm64"));
        assert_eq!(path.as_deref(), Some(".labflow/env-locks/matlab/arm64/ml.json"));
    }

    #[test]
    fn test_venv_lock_is_arch_specific_text() {
        let path = lock_path(&env(EnvKind::UvVenv, Some("requirements.txt")), "py", Some("arm64"));
        assert_eq!(path.as_deref(), Some(".labflow/env-locks/uv-venv/arm64/py.txt"));

        let path = lock_path(&env(EnvKind::Venv, None), "py", Some("amd64"));
        assert_eq!(path.as_deref(), Some(".labflow/env-locks/venv/amd64/py.txt"));
    }

    #[test]
    fn test_environment_architecture_wins() {
        let mut e = env(EnvKind::Conda, Some("environment.yml"));
        e.architecture = Some("aarch64".into());
        let path = lock_path(&e, "main", Some("amd64"));
        assert_eq!(path.as_deref(), Some(".labflow/env-locks/conda/arm64/main.yml"));
    }

    #[test]
    fn test_host_architecture_is_default() {
        let path = lock_path(&env(EnvKind::Docker, None), "d", None).unwrap();
        assert!(path.ends_with(&format!("/{}/d.json", host_architecture())));
    }

    #[test]
    fn test_project_locks_sit_next_to_manifest() {
        let uv = lock_path(&env(EnvKind::Uv, Some("analysis/pyproject.toml")), "py", None);
        assert_eq!(uv.as_deref(), Some("analysis/uv.lock"));

        let uv_root = lock_path(&env(EnvKind::Uv, Some("pyproject.toml")), "py", None);
        assert_eq!(uv_root.as_deref(), Some("uv.lock"));

        let pixi = lock_path(&env(EnvKind::Pixi, None), "px", None);
        assert_eq!(pixi.as_deref(), Some("pixi.lock"));

        let julia = lock_path(&env(EnvKind::Julia, Some("sim/Project.toml")), "jl", None);
        assert_eq!(julia.as_deref(), Some("sim/Manifest.toml"));
    }

    #[test]
    fn test_untracked_kinds_resolve_to_none() {
        assert_eq!(lock_path(&env(EnvKind::Ssh, None), "cluster", None), None);
        assert_eq!(
            lock_path(&env(EnvKind::Other("renv".into()), Some("renv.lock")), "r", None),
            None
        );
    }

    #[test]
    fn test_check_command_per_kind() {
        assert_eq!(
            check_command(&env(EnvKind::Docker, None), "tex"),
            "labflow check docker-env -n tex"
        );
        assert_eq!(
            check_command(&env(EnvKind::UvVenv, None), "py"),
            "labflow check venv -n py"
        );
        assert_eq!(check_command(&env(EnvKind::Uv, None), "py"), "labflow check env -n py");
    }
}
