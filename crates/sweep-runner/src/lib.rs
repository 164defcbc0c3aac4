//! Expands a declarative parameter sweep into one directory per configuration
//! variant, runs commands in each of them and gathers their results.
//!
//! The expansion engine ([`build_schedule`], [`expand`]) is pure; the
//! [`build()`](build::build), [`run()`](run::run) and [`gather()`](gather::gather)
//! phases wrap it with filesystem and process handling.

pub mod build;
pub mod config;
pub mod error;
pub mod expand;
pub mod fsutil;
pub mod gather;
pub mod keypath;
pub mod keyset;
pub mod naming;
pub mod run;
pub mod schedule;
pub mod validate;

use anyhow::Result;
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};

pub use build::{build, BuildReport};
pub use config::{load_sweep_config, load_tree, SweepConfig};
pub use error::MatrixError;
pub use expand::{expand, Expansion, Variant};
pub use gather::{gather, GatherReport};
pub use keypath::{assign, resolve, KeyPath};
pub use keyset::{keyset, KeyDescriptor, Keyset};
pub use naming::{NamingScheme, ParsedIdentifier};
pub use run::{run, CommandFailure, RunReport};
pub use schedule::{
    build_schedule, AxisKind, ExtraParameters, ParameterAxis, ParameterSpec, Schedule,
};
pub use validate::validate;

#[derive(Debug, Clone, Serialize)]
pub struct AxisSummary {
    pub name: String,
    pub kind: AxisKind,
    pub values: usize,
    pub paired: usize,
    /// Current value in the base config; `None` for extra axes and unresolvable keys.
    pub base_value: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepSummary {
    pub working_dir: PathBuf,
    pub base_config: PathBuf,
    pub project_source: String,
    pub axes: Vec<AxisSummary>,
    pub repetitions: u32,
    pub combinations: usize,
    pub total_variants: usize,
    pub run_prefix: String,
}

/// Summarizes the matrix a sweep file describes without touching the filesystem
/// beyond reading the sweep and base config.
pub fn describe_sweep(config_path: &Path) -> Result<SweepSummary> {
    let config = load_sweep_config(config_path)?;
    let base_config = config.base_config_path();
    let base = load_tree(&base_config)?;
    let schedule = build_schedule(&config.parameters)?;

    let axes = schedule
        .axes
        .iter()
        .map(|axis| {
            let first = axis.choices.first();
            let base_value = match (axis.kind, first) {
                (AxisKind::Config, Some(choice)) => resolve(&base, &choice.key).ok().cloned(),
                _ => None,
            };
            AxisSummary {
                name: axis.name.clone(),
                kind: axis.kind,
                values: axis.choices.len(),
                paired: first.map(|c| c.companions.len()).unwrap_or(0),
                base_value,
            }
        })
        .collect();

    Ok(SweepSummary {
        working_dir: config.working_dir_path(),
        base_config,
        project_source: config.project_source.clone(),
        axes,
        repetitions: schedule.repetitions,
        combinations: schedule.combination_count(),
        total_variants: schedule.variant_count(),
        run_prefix: config.naming.run_dir_prefix(),
    })
}
