//! Configuration for groundnote.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (GROUNDNOTE_HOME, GROUNDNOTE_MODEL_*)
//! 2. Config file (.groundnote/config.yaml)
//! 3. Defaults (~/.groundnote, no model)
//!
//! Config file discovery:
//! - Searches the starting directory and its parents for .groundnote/config.yaml
//! - `paths.home` in the config file is relative to the .groundnote/ directory
//!
//! The resolved value is passed explicitly to the analyzer; nothing here is
//! global.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::adapters::{CommandModel, HttpModel, LanguageModel};
use crate::core::AnalysisLimits;

pub const ENV_HOME: &str = "GROUNDNOTE_HOME";
pub const ENV_MODEL_ENDPOINT: &str = "GROUNDNOTE_MODEL_ENDPOINT";
pub const ENV_MODEL_API_KEY: &str = "GROUNDNOTE_MODEL_API_KEY";
pub const ENV_MODEL_NAME: &str = "GROUNDNOTE_MODEL_NAME";
pub const ENV_MODEL_COMMAND: &str = "GROUNDNOTE_MODEL_COMMAND";

pub const DEFAULT_MODEL_NAME: &str = "gpt-4o-mini";
pub const STORE_FILE: &str = "analyses.jsonl";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub model: ModelSection,
    #[serde(default)]
    pub limits: Option<AnalysisLimits>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// State directory (relative to .groundnote/)
    pub home: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelSection {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub name: Option<String>,
    pub command: Option<String>,
}

/// Which language model to talk to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelConfig {
    /// Base URL of an OpenAI-compatible API
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub name: String,
    /// Local command used instead of an endpoint
    pub command: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            name: DEFAULT_MODEL_NAME.to_string(),
            command: None,
        }
    }
}

impl ModelConfig {
    /// Whether a model endpoint or command is available
    pub fn is_configured(&self) -> bool {
        let set = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        set(&self.endpoint) || set(&self.command)
    }

    /// Build the configured backend. A command wins over an endpoint.
    pub fn build(&self) -> Result<Option<Arc<dyn LanguageModel>>> {
        if !self.is_configured() {
            return Ok(None);
        }
        if let Some(command) = self.command.as_deref().filter(|c| !c.trim().is_empty()) {
            let model = CommandModel::from_command_line(command)?;
            return Ok(Some(Arc::new(model)));
        }
        let endpoint = self
            .endpoint
            .as_deref()
            .context("Model endpoint missing")?;
        Ok(Some(Arc::new(HttpModel::new(
            endpoint,
            self.name.clone(),
            self.api_key.clone(),
        ))))
    }

    /// Endpoint or command, for display; never includes the key
    pub fn describe(&self) -> String {
        match (&self.command, &self.endpoint) {
            (Some(command), _) if !command.trim().is_empty() => format!("command: {}", command),
            (_, Some(endpoint)) if !endpoint.trim().is_empty() => {
                format!("{} (model {})", endpoint, self.name)
            }
            _ => "(not configured)".to_string(),
        }
    }
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// State directory (analysis store)
    pub home: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub model: ModelConfig,
    pub limits: AnalysisLimits,
}

impl ResolvedConfig {
    pub fn is_configured(&self) -> bool {
        self.model.is_configured()
    }

    /// Path of the append-only analysis log
    pub fn store_path(&self) -> PathBuf {
        self.home.join(STORE_FILE)
    }
}

/// Find config file by searching `start` and its parents
fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(".groundnote").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to `base`
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Load configuration from the current directory and process environment
pub fn load_config() -> Result<ResolvedConfig> {
    let cwd = std::env::current_dir().context("Failed to determine current directory")?;
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".groundnote");
    load_from(&cwd, default_home, |key| std::env::var(key).ok())
}

/// Load configuration starting at `start`, reading variables through `env`.
pub fn load_from<F>(start: &Path, default_home: PathBuf, env: F) -> Result<ResolvedConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let config_file = find_config_file(start);
    let file = match &config_file {
        Some(path) => load_config_file(path)?,
        None => ConfigFile::default(),
    };

    let home = if let Some(env_home) = env(ENV_HOME) {
        PathBuf::from(env_home)
    } else if let (Some(home_path), Some(config_path)) = (&file.paths.home, &config_file) {
        let dot_dir = config_path.parent().unwrap_or(Path::new("."));
        resolve_path(dot_dir, home_path)
    } else {
        default_home
    };

    let model = ModelConfig {
        endpoint: env(ENV_MODEL_ENDPOINT).or(file.model.endpoint),
        api_key: env(ENV_MODEL_API_KEY).or(file.model.api_key),
        name: env(ENV_MODEL_NAME)
            .or(file.model.name)
            .unwrap_or_else(|| DEFAULT_MODEL_NAME.to_string()),
        command: env(ENV_MODEL_COMMAND).or(file.model.command),
    };

    Ok(ResolvedConfig {
        home,
        config_file,
        model,
        limits: file.limits.unwrap_or_default(),
    })
}
