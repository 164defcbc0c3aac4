use anyhow::{Context, Result};
use std::path::Path;
use std::process::Command;
use tracing::{info, warn};

use crate::config::load_sweep_config;
use crate::fsutil::{file_name_str, list_run_dirs};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFailure {
    pub run: String,
    pub command: String,
    pub status: String,
}

#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub runs: Vec<String>,
    pub commands_executed: usize,
    pub failures: Vec<CommandFailure>,
    pub dry: bool,
}

/// Executes every `exec_command` entry inside every run directory.
///
/// Commands go through `sh -c` with the run directory as working directory. A
/// failing command is logged and recorded; the remaining commands and runs
/// still execute.
pub fn run(config_path: &Path, dry: bool) -> Result<RunReport> {
    let config = load_sweep_config(config_path)?;
    let working_dir = config.working_dir_path();
    let run_dirs = list_run_dirs(&working_dir, &config.naming)
        .with_context(|| format!("failed to list runs in {}", working_dir.display()))?;
    let total = run_dirs.len();
    let mut report = RunReport {
        dry,
        ..RunReport::default()
    };

    for (index, run_dir) in run_dirs.iter().enumerate() {
        let name = file_name_str(run_dir)?.to_string();
        info!(index = index + 1, total, run = %name, "entering run");
        for cmd in &config.exec_command {
            info!(run = %name, command = %cmd, dry, "executing");
            if dry {
                continue;
            }
            let status = Command::new("sh")
                .arg("-c")
                .arg(cmd)
                .current_dir(run_dir)
                .status()
                .with_context(|| format!("failed to spawn `{}` in {}", cmd, name))?;
            report.commands_executed += 1;
            if !status.success() {
                let code = status
                    .code()
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "signal".to_string());
                warn!(run = %name, command = %cmd, status = %code, "command failed");
                report.failures.push(CommandFailure {
                    run: name.clone(),
                    command: cmd.clone(),
                    status: code,
                });
            }
        }
        report.runs.push(name);
    }
    Ok(report)
}
