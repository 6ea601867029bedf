use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "sweeper.yaml";

/// Overrides for the port sweep stage; unset fields keep the built-in constants.
#[derive(Debug, Default, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct SweepConfig {
    pub ranges: Option<PathBuf>,
    pub ports: Option<String>,
    pub workers: Option<usize>,
    pub retries: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub timeout_ms: Option<u64>,
    pub output: Option<PathBuf>,
    pub checkpoint: Option<PathBuf>,
    pub checkpoint_every: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct VerifyConfig {
    pub input: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub checkpoint: Option<PathBuf>,
    pub workers: Option<usize>,
    pub timeout_ms: Option<u64>,
    /// e.g. `[https, http]`
    pub schemes: Option<Vec<String>>,
    pub lenient: Option<bool>,
    pub checkpoint_every: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct ModelsConfig {
    pub hosts: Option<PathBuf>,
    pub output_json: Option<PathBuf>,
    pub output_csv: Option<PathBuf>,
    pub output_filtered: Option<PathBuf>,
    pub timeout_ms: Option<u64>,
    pub workers: Option<usize>,
}

#[derive(Debug, Default, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub sweep: Option<SweepConfig>,
    pub verify: Option<VerifyConfig>,
    pub models: Option<ModelsConfig>,
}

/// Explicit path must exist; otherwise `./sweeper.yaml` is used when present.
pub fn load_config(path: Option<&Path>) -> Result<Option<Config>> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => {
            let p = Path::new(CONFIG_FILE);
            if p.exists() { p.to_path_buf() } else { return Ok(None); }
        }
    };
    let s = fs::read_to_string(&path).with_context(|| format!("reading config {}", path.display()))?;
    let cfg = serde_yaml::from_str(&s).with_context(|| format!("parsing config {}", path.display()))?;
    Ok(Some(cfg))
}
