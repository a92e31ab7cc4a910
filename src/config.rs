//! YAML/JSON configuration loading and validation.
//!
//! Configuration files may reference environment variables as `${VAR}` inside
//! any string value; expansion happens before deserialization so secrets such
//! as connection strings stay out of the file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use compare_core::{CollectionSpec, ConfigError, SamplingMode, SamplingSpec};
use serde::Deserialize;

/// Connection settings for one store.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub uri: String,
    pub database: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModeConfig {
    #[default]
    Auto,
    Fast,
    Deterministic,
}

impl From<ModeConfig> for SamplingMode {
    fn from(mode: ModeConfig) -> Self {
        match mode {
            ModeConfig::Auto => SamplingMode::Auto,
            ModeConfig::Fast => SamplingMode::Fast,
            ModeConfig::Deterministic => SamplingMode::Deterministic,
        }
    }
}

fn default_source_lookup_concurrency() -> usize {
    8
}

fn default_compare_concurrency() -> usize {
    4
}

fn default_scan_log_every() -> u64 {
    100_000
}

/// The `sampling` section, shared by every collection in the run.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SamplingConfig {
    /// Fraction of the population to sample, in (0, 1]. Mutually exclusive
    /// with `count`.
    pub percentage: Option<f64>,
    pub count: Option<u64>,
    pub seed: Option<u64>,
    #[serde(default)]
    pub mode: ModeConfig,
    #[serde(default = "default_source_lookup_concurrency")]
    pub source_lookup_concurrency: usize,
    #[serde(default = "default_compare_concurrency")]
    pub compare_concurrency: usize,
    pub max_scan_keys: Option<u64>,
    #[serde(default = "default_scan_log_every")]
    pub scan_log_every: u64,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Directory receiving per-collection mismatch logs.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            output_dir: default_output_dir(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

/// One entry under `collections`, or the `collection_defaults` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct CollectionEntry {
    pub business_key: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub exclude_fields: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub cosmos: StoreConfig,
    pub mongodb: StoreConfig,
    pub sampling: SamplingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub collections: BTreeMap<String, CollectionEntry>,
    pub collection_defaults: Option<CollectionEntry>,
}

impl AppConfig {
    /// Load and validate a configuration file. `serde_yaml` accepts both YAML
    /// and JSON, so one loader covers both formats.
    pub fn load(path: &Path) -> anyhow::Result<AppConfig> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {path:?}"))?;
        let mut value: serde_yaml::Value = serde_yaml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {path:?}"))?;
        expand_env(&mut value)?;
        let config: AppConfig = serde_yaml::from_value(value)
            .with_context(|| format!("Invalid config file {path:?}"))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        self.sampling_spec().validate()?;
        for (name, entry) in &self.collections {
            if let Some(field) = &entry.business_key {
                validate_field_path(field, name)?;
            }
            for field in &entry.exclude_fields {
                validate_field_path(field, name)?;
            }
        }
        if let Some(defaults) = &self.collection_defaults {
            if let Some(field) = &defaults.business_key {
                validate_field_path(field, "collection_defaults")?;
            }
            for field in &defaults.exclude_fields {
                validate_field_path(field, "collection_defaults")?;
            }
        }
        Ok(())
    }

    pub fn sampling_spec(&self) -> SamplingSpec {
        SamplingSpec {
            percentage: self.sampling.percentage,
            count: self.sampling.count,
            seed: self.sampling.seed,
            mode: self.sampling.mode.into(),
            source_lookup_concurrency: self.sampling.source_lookup_concurrency,
            compare_concurrency: self.sampling.compare_concurrency,
            max_scan_keys: self.sampling.max_scan_keys,
            scan_log_every: self.sampling.scan_log_every,
        }
    }

    /// Resolve the comparison spec for one collection.
    ///
    /// An explicit `collections` entry wins; otherwise `collection_defaults`
    /// applies as a whole. `Ok(None)` means the collection is not configured
    /// and should be skipped.
    pub fn collection_spec(&self, name: &str) -> Result<Option<CollectionSpec>, ConfigError> {
        let entry = match self.collections.get(name) {
            Some(entry) => entry,
            None => match &self.collection_defaults {
                Some(defaults) => defaults,
                None => return Ok(None),
            },
        };
        let business_key = entry
            .business_key
            .clone()
            .ok_or_else(|| ConfigError::MissingBusinessKey(name.to_string()))?;
        Ok(Some(CollectionSpec {
            name: name.to_string(),
            business_key_field: business_key,
            exclude_fields: entry.exclude_fields.clone(),
            enabled: entry.enabled,
        }))
    }

    /// Names of explicitly configured, enabled collections.
    pub fn configured_collections(&self) -> Vec<String> {
        self.collections
            .iter()
            .filter(|(_, entry)| entry.enabled)
            .map(|(name, _)| name.clone())
            .collect()
    }
}

/// Reject field paths with empty segments or embedded whitespace. Dotted
/// paths address nested fields, so a trailing or doubled dot is always a
/// config mistake.
fn validate_field_path(path: &str, location: &str) -> Result<(), ConfigError> {
    let invalid = path.is_empty()
        || path
            .split('.')
            .any(|segment| segment.is_empty() || segment.chars().any(char::is_whitespace));
    if invalid {
        return Err(ConfigError::InvalidFieldPath {
            path: path.to_string(),
            location: location.to_string(),
        });
    }
    Ok(())
}

/// Expand `${VAR}` references in every string value, in place. An unset
/// variable is a fatal error so a missing secret cannot silently become a
/// literal connection string.
fn expand_env(value: &mut serde_yaml::Value) -> anyhow::Result<()> {
    match value {
        serde_yaml::Value::String(s) => {
            if s.contains("${") {
                *s = expand_env_str(s)?;
            }
        }
        serde_yaml::Value::Sequence(items) => {
            for item in items {
                expand_env(item)?;
            }
        }
        serde_yaml::Value::Mapping(map) => {
            for (_, item) in map.iter_mut() {
                expand_env(item)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn expand_env_str(input: &str) -> anyhow::Result<String> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .ok_or_else(|| anyhow::anyhow!("Unterminated ${{...}} reference in config value"))?;
        let name = &after[..end];
        let expanded = std::env::var(name)
            .with_context(|| format!("Environment variable {name} referenced in config is not set"))?;
        out.push_str(&expanded);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}
