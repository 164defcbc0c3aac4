use anyhow::{anyhow, Context, Result};
use jsonschema::JSONSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

use crate::fsutil::write_atomic;
use crate::naming::NamingScheme;
use crate::schedule::ParameterSpec;

const SWEEP_CONFIG_SCHEMA: &str = include_str!("../schemas/sweep_config_v1.jsonschema");

/// Contents of the sweep file (`config.yaml` by default).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Directory to copy, or anything `git clone` accepts.
    pub project_source: String,
    pub working_dir: PathBuf,
    pub base_config: PathBuf,
    #[serde(default)]
    pub exec_command: Vec<String>,
    #[serde(default, alias = "result_dirs")]
    pub result_files: Vec<String>,
    #[serde(default)]
    pub symlinks: Vec<String>,
    #[serde(flatten)]
    pub parameters: ParameterSpec,
    #[serde(default)]
    pub naming: NamingScheme,
    /// Directory holding the sweep file; relative paths resolve against it.
    #[serde(skip)]
    pub config_dir: PathBuf,
}

impl SweepConfig {
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.config_dir.join(path)
        }
    }

    pub fn working_dir_path(&self) -> PathBuf {
        self.resolve(&self.working_dir)
    }

    pub fn base_config_path(&self) -> PathBuf {
        self.resolve(&self.base_config)
    }

    /// Local directory for `project_source`, or `None` when it should be cloned.
    pub fn source_dir(&self) -> Option<PathBuf> {
        let candidate = self.resolve(Path::new(&self.project_source));
        candidate.is_dir().then_some(candidate)
    }
}

fn compile_schema() -> Result<JSONSchema> {
    let schema: Value = serde_json::from_str(SWEEP_CONFIG_SCHEMA)?;
    JSONSchema::compile(&schema).map_err(|e| anyhow!("invalid sweep config schema: {}", e))
}

/// Checks a raw sweep document against the embedded JSON schema, reporting every violation.
pub fn validate_sweep_value(value: &Value) -> Result<()> {
    let schema = compile_schema()?;
    if let Err(errors) = schema.validate(value) {
        let msgs: Vec<String> = errors.map(|e| format!(" - {}", e)).collect();
        return Err(anyhow!("invalid sweep config:\n{}", msgs.join("\n")));
    }
    Ok(())
}

pub fn parse_sweep_config(raw_yaml: &str, config_dir: &Path) -> Result<SweepConfig> {
    let yaml_value: serde_yaml::Value = serde_yaml::from_str(raw_yaml)?;
    let json_value: Value = serde_json::to_value(yaml_value)?;
    validate_sweep_value(&json_value)?;
    let mut config: SweepConfig = serde_json::from_value(json_value)?;
    config.naming.validate()?;
    config.config_dir = config_dir.to_path_buf();
    Ok(config)
}

pub fn load_sweep_config(path: &Path) -> Result<SweepConfig> {
    let raw_yaml = fs::read_to_string(path)
        .with_context(|| format!("failed to read sweep config {}", path.display()))?;
    let config_dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    parse_sweep_config(&raw_yaml, config_dir)
        .with_context(|| format!("failed to load sweep config {}", path.display()))
}

/// Serialization of a configuration tree, chosen from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeFormat {
    Yaml,
    Json,
}

impl TreeFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Ok(TreeFormat::Yaml),
            Some("json") => Ok(TreeFormat::Json),
            _ => Err(anyhow!(
                "unsupported config format (expected .yaml, .yml or .json): {}",
                path.display()
            )),
        }
    }
}

/// Loads a base configuration; the top level must be a mapping.
pub fn load_tree(path: &Path) -> Result<Value> {
    let format = TreeFormat::from_path(path)?;
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read base config {}", path.display()))?;
    let tree: Value = match format {
        TreeFormat::Yaml => {
            let yaml_value: serde_yaml::Value = serde_yaml::from_str(&raw)?;
            serde_json::to_value(yaml_value)?
        }
        TreeFormat::Json => serde_json::from_str(&raw)?,
    };
    if !tree.is_object() {
        return Err(anyhow!(
            "base config must be a mapping at the top level: {}",
            path.display()
        ));
    }
    Ok(tree)
}

pub fn write_tree(path: &Path, tree: &Value, format: TreeFormat) -> Result<()> {
    let bytes = match format {
        TreeFormat::Yaml => serde_yaml::to_string(tree)?.into_bytes(),
        TreeFormat::Json => {
            let mut bytes = serde_json::to_vec_pretty(tree)?;
            bytes.push(b'\n');
            bytes
        }
    };
    write_atomic(path, &bytes)
}
