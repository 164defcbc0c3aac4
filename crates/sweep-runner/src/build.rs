use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use std::fs;
#[cfg(unix)]
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{info, warn};

use crate::config::{load_sweep_config, load_tree, write_tree, SweepConfig, TreeFormat};
use crate::expand::{expand, Variant};
use crate::fsutil::{copy_project_tree, ensure_dir};
use crate::schedule::build_schedule;

/// Extra axis naming the branch to check out after the source is in place.
pub const GIT_BRANCH_AXIS: &str = "git_branch";

#[derive(Debug, Clone)]
pub struct BuildReport {
    pub working_dir: PathBuf,
    pub identifiers: Vec<String>,
    pub dry: bool,
    /// Materialized variants of a dry run, in expansion order.
    pub preview: Vec<Variant>,
}

/// Expands the sweep described by `config_path` into run directories.
///
/// The whole matrix is expanded and validated before `working_dir` is touched,
/// so an invalid key path never leaves a half-built working directory behind.
/// With `dry` set, nothing is written and the variants are returned in
/// [`BuildReport::preview`] instead.
pub fn build(config_path: &Path, dry: bool) -> Result<BuildReport> {
    let config = load_sweep_config(config_path)?;
    let base_path = config.base_config_path();
    let base = load_tree(&base_path)?;
    let format = TreeFormat::from_path(&base_path)?;
    let conf_name = base_path
        .file_name()
        .ok_or_else(|| anyhow!("base_config has no file name: {}", base_path.display()))?
        .to_owned();
    let schedule = build_schedule(&config.parameters)?;
    let working_dir = config.working_dir_path();
    let total = schedule.variant_count();
    info!(
        variants = total,
        working_dir = %working_dir.display(),
        dry,
        "expanding configuration matrix"
    );
    if total == 0 {
        warn!("an axis has no values; nothing to build");
    }

    if dry {
        let preview = expand(&schedule, &base, &config.naming)?.collect::<Result<Vec<_>, _>>()?;
        return Ok(BuildReport {
            working_dir,
            identifiers: preview.iter().map(|v| v.identifier.clone()).collect(),
            dry,
            preview,
        });
    }

    let identifiers = expand(&schedule, &base, &config.naming)?
        .map(|v| v.map(|v| v.identifier))
        .collect::<Result<Vec<_>, _>>()?;

    if working_dir.exists() {
        fs::remove_dir_all(&working_dir)
            .with_context(|| format!("failed to clear {}", working_dir.display()))?;
    }
    ensure_dir(&working_dir)?;
    let source_dir = config.source_dir();
    let excludes = match &source_dir {
        Some(src) => nested_exclusions(src, &working_dir),
        None => Vec::new(),
    };

    for (index, variant) in expand(&schedule, &base, &config.naming)?.enumerate() {
        let variant = variant?;
        info!(
            index = index + 1,
            total,
            identifier = %variant.identifier,
            "setting up environment"
        );
        let target_dir = working_dir.join(&variant.identifier);
        match &source_dir {
            Some(src) => {
                copy_project_tree(src, &target_dir, &excludes)
                    .with_context(|| format!("failed to copy {}", src.display()))?;
            }
            None => git_clone(&config.project_source, &target_dir)?,
        }
        if let Some(branch) = variant.extra_info.get(GIT_BRANCH_AXIS) {
            git_checkout(&target_dir, &value_as_arg(branch))?;
        }
        write_tree(&target_dir.join(&conf_name), &variant.tree, format)?;
        link_shared_paths(&config, &target_dir)?;
    }

    Ok(BuildReport {
        working_dir,
        identifiers,
        dry,
        preview: Vec::new(),
    })
}

/// Relative path of `working_dir` inside `source`, when the working directory
/// lives in the tree being copied.
fn nested_exclusions(source: &Path, working_dir: &Path) -> Vec<PathBuf> {
    let (Ok(src), Ok(work)) = (source.canonicalize(), working_dir.canonicalize()) else {
        return Vec::new();
    };
    match work.strip_prefix(&src) {
        Ok(rel) if !rel.as_os_str().is_empty() => vec![rel.to_path_buf()],
        _ => Vec::new(),
    }
}

fn value_as_arg(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn run_checked(mut cmd: Command, what: &str) -> Result<()> {
    let status = cmd
        .status()
        .with_context(|| format!("failed to spawn {}", what))?;
    if !status.success() {
        return Err(anyhow!(
            "{} failed with exit status {}",
            what,
            status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string())
        ));
    }
    Ok(())
}

fn git_clone(source: &str, target_dir: &Path) -> Result<()> {
    let mut cmd = Command::new("git");
    cmd.arg("clone").arg(source).arg(target_dir);
    run_checked(cmd, &format!("git clone {}", source))
}

fn git_checkout(target_dir: &Path, branch: &str) -> Result<()> {
    let mut cmd = Command::new("git");
    cmd.arg("checkout").arg(branch).current_dir(target_dir);
    run_checked(cmd, &format!("git checkout {}", branch))
}

/// Links every `symlinks` entry into `target_dir` under its base name.
fn link_shared_paths(config: &SweepConfig, target_dir: &Path) -> Result<()> {
    for sym in &config.symlinks {
        let source = config.resolve(Path::new(sym));
        if !source.exists() {
            warn!(path = %source.display(), "cannot find symlink target");
        }
        let source = source.canonicalize().unwrap_or(source);
        let name = Path::new(sym)
            .components()
            .next_back()
            .map(|c| c.as_os_str().to_owned())
            .ok_or_else(|| anyhow!("invalid symlink entry: {:?}", sym))?;
        let link = target_dir.join(name);
        #[cfg(unix)]
        {
            symlink(&source, &link)
                .with_context(|| format!("failed to link {}", link.display()))?;
        }
        #[cfg(not(unix))]
        {
            warn!(link = %link.display(), "symlinks are only supported on unix");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_working_dir_is_excluded_from_copy() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let src = tmp.path().join("project");
        let work = src.join("sweeps/out");
        ensure_dir(&work).unwrap();
        assert_eq!(
            nested_exclusions(&src, &work),
            vec![PathBuf::from("sweeps/out")]
        );
        let elsewhere = tmp.path().join("elsewhere");
        ensure_dir(&elsewhere).unwrap();
        assert!(nested_exclusions(&src, &elsewhere).is_empty());
    }

    #[test]
    fn branch_values_render_as_plain_args() {
        assert_eq!(value_as_arg(&Value::String("feature/x".into())), "feature/x");
        assert_eq!(value_as_arg(&serde_json::json!(3)), "3");
    }
}
