//! Configuration file handling for herald.
//!
//! Releases are described by a `.herald.toml` file: the project being
//! released, the signing setup, and one table per provider grouped by
//! category.
//!
//! ```
//! use herald_config::Config;
//! use herald_types::Category;
//!
//! let config: Config = toml::from_str(r#"
//! [project]
//! name = "demo"
//! version = "1.0.0"
//!
//! [announce.slack]
//! type = "webhook"
//! url = "https://hooks.example/T000"
//! "#).expect("parse");
//!
//! let entry = &config.providers(Category::Announce)["slack"];
//! assert_eq!(entry.kind, "webhook");
//! assert!(entry.enabled);
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use herald_encrypt::PassphraseSource;
use herald_retry::RetryStrategyConfig;
use herald_types::{Category, ProjectInfo, ProviderDescriptor, Timeouts};
use serde::{Deserialize, Serialize};

/// Default configuration file name
pub const CONFIG_FILE: &str = ".herald.toml";

/// Default output directory, relative to the base directory
pub const DEFAULT_OUTPUT_DIR: &str = "out/herald";

/// Config file path for a directory
pub fn config_path(dir: &Path) -> PathBuf {
    dir.join(CONFIG_FILE)
}

/// Complete herald configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub project: ProjectConfig,
    #[serde(default)]
    pub release: ReleaseConfig,
    #[serde(default)]
    pub signing: SigningConfig,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub announce: BTreeMap<String, ProviderEntry>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub upload: BTreeMap<String, ProviderEntry>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub deploy: BTreeMap<String, ProviderEntry>,
}

/// The project being released.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub snapshot: bool,
    /// Release artifacts, relative to the base directory
    #[serde(default)]
    pub artifacts: Vec<PathBuf>,
}

/// Run-wide settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReleaseConfig {
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
}

/// Signing stage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningConfig {
    #[serde(default)]
    pub enabled: bool,
    /// `.asc` text signatures when true, `.bpg` binary when false
    #[serde(default = "default_true")]
    pub armored: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyring: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passphrase_env: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            armored: true,
            keyring: None,
            key_id: None,
            passphrase_env: None,
            passphrase: None,
        }
    }
}

impl SigningConfig {
    pub fn passphrase_source(&self) -> PassphraseSource {
        PassphraseSource {
            passphrase: self.passphrase.clone(),
            env_var: self.passphrase_env.clone(),
        }
    }
}

/// One provider table, e.g. `[deploy.central]`.
///
/// Keys other than the common ones below are kept verbatim in `options` and
/// interpreted by the provider type named in `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderEntry {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub snapshot_supported: bool,
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,
    #[serde(default = "default_read_timeout", with = "humantime_serde")]
    pub read_timeout: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryStrategyConfig>,
    #[serde(flatten)]
    pub options: toml::Table,
}

fn default_true() -> bool {
    true
}

fn default_connect_timeout() -> Duration {
    Timeouts::default().connect
}

fn default_read_timeout() -> Duration {
    Timeouts::default().read
}

impl ProviderEntry {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            enabled: true,
            snapshot_supported: false,
            connect_timeout: default_connect_timeout(),
            read_timeout: default_read_timeout(),
            retry: None,
            options: toml::Table::new(),
        }
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            connect: self.connect_timeout,
            read: self.read_timeout,
        }
    }

    pub fn descriptor(&self, category: Category, name: &str) -> ProviderDescriptor {
        ProviderDescriptor {
            category,
            name: name.to_string(),
            kind: self.kind.clone(),
            enabled: self.enabled,
            snapshot_supported: self.snapshot_supported,
            timeouts: self.timeouts(),
        }
    }

    /// Decode the provider-specific options into a typed struct.
    pub fn options_as<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        toml::Value::Table(self.options.clone())
            .try_into()
            .with_context(|| format!("invalid options for provider type {}", self.kind))
    }
}

/// Command-line overrides applied on top of the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub dry_run: Option<bool>,
    pub output_dir: Option<PathBuf>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider tables for a category, sorted by name.
    pub fn providers(&self, category: Category) -> &BTreeMap<String, ProviderEntry> {
        match category {
            Category::Announce => &self.announce,
            Category::Upload => &self.upload,
            Category::Deploy => &self.deploy,
        }
    }

    pub fn providers_mut(&mut self, category: Category) -> &mut BTreeMap<String, ProviderEntry> {
        match category {
            Category::Announce => &mut self.announce,
            Category::Upload => &mut self.upload,
            Category::Deploy => &mut self.deploy,
        }
    }

    pub fn project_info(&self) -> ProjectInfo {
        ProjectInfo {
            name: self.project.name.clone(),
            version: self.project.version.clone(),
            snapshot: self.project.snapshot,
        }
    }

    /// Output directory resolved against `base_dir`.
    pub fn output_dir(&self, base_dir: &Path) -> PathBuf {
        let dir = self
            .release
            .output_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR));
        if dir.is_absolute() {
            dir
        } else {
            base_dir.join(dir)
        }
    }

    /// Apply command-line overrides (overrides take precedence).
    pub fn merge(&self, overrides: &Overrides) -> Config {
        let mut merged = self.clone();
        if let Some(dry_run) = overrides.dry_run {
            merged.release.dry_run = merged.release.dry_run || dry_run;
        }
        if let Some(dir) = &overrides.output_dir {
            merged.release.output_dir = Some(dir.clone());
        }
        merged
    }

    /// Structural checks that need no network and no provider knowledge.
    pub fn validate(&self) -> Result<()> {
        let has_providers = Category::RELEASE_ORDER
            .iter()
            .any(|c| !self.providers(*c).is_empty());

        if (has_providers || self.signing.enabled) && self.project.name.trim().is_empty() {
            bail!("[project] name is required");
        }
        if (has_providers || self.signing.enabled) && self.project.version.trim().is_empty() {
            bail!("[project] version is required");
        }
        if self.signing.enabled && self.signing.keyring.is_none() {
            bail!("[signing] keyring is required when signing is enabled");
        }
        for category in Category::RELEASE_ORDER {
            for (name, entry) in self.providers(category) {
                if entry.kind.trim().is_empty() {
                    bail!("[{category}.{name}] type must not be empty");
                }
            }
        }
        Ok(())
    }
}

/// Load configuration from a directory; a missing file yields defaults.
pub fn load_config(dir: &Path) -> Result<Config> {
    let path = config_path(dir);
    if !path.exists() {
        return Ok(Config::default());
    }
    load_config_from_file(&path)
}

/// Load configuration from an explicit path; the file must exist.
pub fn load_config_from_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("failed to parse config file: {}", path.display()))?;

    Ok(config)
}

/// Save configuration into a directory.
pub fn save_config(dir: &Path, config: &Config) -> Result<()> {
    let path = config_path(dir);
    let content = toml::to_string_pretty(config).context("failed to serialize config to TOML")?;
    std::fs::write(&path, content)
        .with_context(|| format!("failed to write config file: {}", path.display()))?;
    Ok(())
}

/// Find a configuration file by walking up the directory tree.
pub fn find_config(start_dir: &Path) -> Option<PathBuf> {
    let mut current = start_dir;
    loop {
        let candidate = current.join(CONFIG_FILE);
        if candidate.exists() {
            return Some(candidate);
        }
        current = current.parent()?;
    }
}
