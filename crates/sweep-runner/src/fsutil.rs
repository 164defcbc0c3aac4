use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use serde_json::Value;
use std::fs;
use std::io::{self, Write};
#[cfg(unix)]
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::naming::NamingScheme;

pub fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .with_context(|| format!("failed to create directory {}", path.display()))
}

/// Replaces `path` with `bytes` through a hidden sibling file and a rename.
///
/// A run directory never holds a truncated config or index: either the old
/// content or the new one is visible. The temporary file is removed when any
/// step fails.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    ensure_dir(parent)?;
    let tmp = parent.join(format!(
        ".{}.{}.{}.partial",
        file_name_str(path)?,
        std::process::id(),
        Utc::now().format("%Y%m%d%H%M%S%6f")
    ));

    let written = fs::File::create(&tmp)
        .and_then(|mut file| {
            file.write_all(bytes)?;
            file.sync_all()
        })
        .and_then(|_| fs::rename(&tmp, path));
    if let Err(err) = written {
        let _ = fs::remove_file(&tmp);
        return Err(err).with_context(|| format!("failed to write {}", path.display()));
    }

    // Directory fsync is not supported everywhere; the rename already happened.
    #[cfg(unix)]
    {
        if let Err(err) = fs::File::open(parent).and_then(|dir| dir.sync_all()) {
            debug!(dir = %parent.display(), error = %err, "directory sync skipped");
        }
    }
    Ok(())
}

pub fn write_json_atomic(path: &Path, value: &Value) -> Result<()> {
    let mut bytes = serde_json::to_vec_pretty(value)?;
    bytes.push(b'\n');
    write_atomic(path, &bytes)
}

/// Copies a project tree into a fresh run directory and returns the number of
/// files written.
///
/// Entries whose path relative to `src` starts with one of `exclude` are
/// skipped, which keeps a working directory nested in the project out of its
/// own runs. Links are followed, so each run gets private copies of linked
/// files and directories. Dangling links are recreated as links.
pub fn copy_project_tree(src: &Path, dst: &Path, exclude: &[PathBuf]) -> Result<usize> {
    let is_excluded = |path: &Path| {
        path.strip_prefix(src)
            .map(|rel| exclude.iter().any(|ex| rel.starts_with(ex)))
            .unwrap_or(false)
    };
    ensure_dir(dst)?;

    let mut files = 0usize;
    let walker = WalkDir::new(src)
        .follow_links(true)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_excluded(e.path()));
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                let dangling = err
                    .path()
                    .filter(|p| p.is_symlink())
                    .filter(|_| {
                        err.io_error()
                            .is_some_and(|e| e.kind() == io::ErrorKind::NotFound)
                    })
                    .map(Path::to_path_buf);
                match dangling {
                    Some(link) => {
                        relink(src, dst, &link)?;
                        continue;
                    }
                    None => {
                        return Err(anyhow::Error::new(err))
                            .with_context(|| format!("failed to walk {}", src.display()))
                    }
                }
            }
        };
        let target = dst.join(entry.path().strip_prefix(src)?);
        if entry.file_type().is_dir() {
            ensure_dir(&target)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                ensure_dir(parent)?;
            }
            fs::copy(entry.path(), &target).with_context(|| {
                format!("failed to copy {} to {}", entry.path().display(), target.display())
            })?;
            files += 1;
        }
    }
    debug!(src = %src.display(), dst = %dst.display(), files, "copied project tree");
    Ok(files)
}

fn relink(src: &Path, dst: &Path, link: &Path) -> Result<()> {
    let target = dst.join(link.strip_prefix(src)?);
    let pointee = fs::read_link(link)?;
    warn!(link = %link.display(), pointee = %pointee.display(), "keeping dangling link");
    #[cfg(unix)]
    {
        if let Some(parent) = target.parent() {
            ensure_dir(parent)?;
        }
        symlink(&pointee, &target)
            .with_context(|| format!("failed to link {}", target.display()))?;
    }
    #[cfg(not(unix))]
    {
        let _ = target;
    }
    Ok(())
}

/// Run directories directly under `working_dir`, sorted by name.
pub fn list_run_dirs(working_dir: &Path, naming: &NamingScheme) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(working_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let is_run = name.to_str().map(|n| naming.is_run_dir(n)).unwrap_or(false);
        if is_run && entry.file_type()?.is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// File name of `path` as UTF-8, or an error naming the path.
pub fn file_name_str(path: &Path) -> Result<&str> {
    path.file_name()
        .and_then(|s| s.to_str())
        .ok_or_else(|| anyhow!("path has no UTF-8 file name: {}", path.display()))
}
