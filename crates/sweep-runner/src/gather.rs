use anyhow::{anyhow, Context, Result};
use serde_json::{json, Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::load_sweep_config;
use crate::fsutil::{ensure_dir, file_name_str, list_run_dirs, write_json_atomic};

pub const DEFAULT_OUTPUT_DIR: &str = "aggregated_results";
pub const RUN_INDEX_FILE: &str = "runs.json";

#[derive(Debug, Clone)]
pub struct GatherReport {
    pub output_dir: PathBuf,
    pub runs: usize,
    pub files: usize,
}

/// Copies `file` into `target_dir[/sub_dir]`, inserting `suffix` between the
/// file stem and its extension (`loss.csv` -> `loss__lr:0.1.csv`).
fn copy_suffixed(
    suffix: &str,
    file: &Path,
    target_dir: &Path,
    sub_dir: Option<&str>,
) -> Result<PathBuf> {
    let stem = file
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| anyhow!("invalid result file name: {}", file.display()))?;
    let name = match file.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{}{}.{}", stem, suffix, ext),
        None => format!("{}{}", stem, suffix),
    };
    let dir = match sub_dir {
        Some(sub) => target_dir.join(sub),
        None => target_dir.to_path_buf(),
    };
    ensure_dir(&dir)?;
    let dest = dir.join(name);
    fs::copy(file, &dest)
        .with_context(|| format!("failed to copy {} to {}", file.display(), dest.display()))?;
    Ok(dest)
}

fn sorted_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_file() {
            files.push(path);
        } else {
            warn!(path = %path.display(), "skipping non-file entry in result directory");
        }
    }
    files.sort();
    Ok(files)
}

/// Collects the configured result files of every run into one directory.
///
/// `output` defaults to `<working_dir>/aggregated_results` and is recreated.
/// The parameters parsed back from each run directory name are written to
/// `runs.json` inside it. Directories that carry the run prefix but do not
/// parse as an identifier are skipped with a warning.
pub fn gather(config_path: &Path, output: Option<&Path>) -> Result<GatherReport> {
    let config = load_sweep_config(config_path)?;
    let working_dir = config.working_dir_path();
    let output_dir = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| working_dir.join(DEFAULT_OUTPUT_DIR));

    if output_dir.exists() {
        fs::remove_dir_all(&output_dir)
            .with_context(|| format!("failed to clear {}", output_dir.display()))?;
    }
    ensure_dir(&output_dir)?;

    let naming = &config.naming;
    let mut index = Vec::new();
    let mut files = 0usize;
    for run_dir in list_run_dirs(&working_dir, naming)? {
        let name = file_name_str(&run_dir)?;
        let parsed = match naming.parse(name) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(dir = %name, error = %err, "skipping directory that is not a run");
                continue;
            }
        };
        let suffix = naming
            .suffix(name)
            .ok_or_else(|| anyhow!("not a run directory: {}", name))?;
        info!(run = %name, "gathering");

        for res in &config.result_files {
            let res_path = run_dir.join(res);
            if res_path.is_file() {
                debug!(file = %res, "collecting");
                copy_suffixed(suffix, &res_path, &output_dir, None)?;
                files += 1;
            } else if res_path.is_dir() {
                for file in sorted_files(&res_path)? {
                    debug!(file = %file.display(), "collecting");
                    copy_suffixed(suffix, &file, &output_dir, Some(res))?;
                    files += 1;
                }
            } else {
                return Err(anyhow!("invalid file: \"{}\"", res_path.display()));
            }
        }

        let params: Map<String, Value> = parsed
            .pairs
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        index.push(json!({
            "run": name,
            "params": params,
            "repetition": parsed.repetition,
        }));
    }

    let runs = index.len();
    write_json_atomic(&output_dir.join(RUN_INDEX_FILE), &Value::Array(index))?;
    info!(runs, files, output = %output_dir.display(), "gathered results");
    Ok(GatherReport {
        output_dir,
        runs,
        files,
    })
}
