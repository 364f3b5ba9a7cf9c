use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::prefs::{Language, Preferences};
use crate::worker::{WorkerSettings, DEFAULT_FONT_HOSTS, DEFAULT_VERSION};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Where the fast cache, the database and the logs live
  /// (defaults to $XDG_DATA_HOME/graph-sketch)
  pub data_dir: Option<PathBuf>,
  /// Quiet period before a field edit is written
  pub debounce_ms: u64,
  /// Initial autosave setting when the device has none stored
  pub autosave: bool,
  pub language: Language,
  pub worker: WorkerConfig,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      data_dir: None,
      debounce_ms: 150,
      autosave: true,
      language: Language::He,
      worker: WorkerConfig::default(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
  /// Cache generation; bumping it purges older caches on activation
  pub version: String,
  /// Path the app is hosted under, e.g. /apps/graph/
  pub scope: String,
  /// Origin the app is served from
  pub origin: String,
  pub font_hosts: Vec<String>,
}

impl Default for WorkerConfig {
  fn default() -> Self {
    Self {
      version: DEFAULT_VERSION.to_string(),
      scope: "/".to_string(),
      origin: "http://localhost:5173".to_string(),
      font_hosts: DEFAULT_FONT_HOSTS.iter().map(|h| h.to_string()).collect(),
    }
  }
}

impl WorkerConfig {
  pub fn settings(&self) -> Result<WorkerSettings> {
    let settings = WorkerSettings::new(&self.version, &self.origin, &self.scope)
      .map_err(|e| eyre!("Invalid worker configuration: {}", e))?;
    Ok(settings.with_font_hosts(self.font_hosts.clone()))
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./graph-sketch.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/graph-sketch/config.yaml
  ///
  /// Without any file the defaults apply.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("graph-sketch.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("graph-sketch").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    Ok(config)
  }

  pub fn data_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.data_dir {
      return Ok(dir.clone());
    }
    dirs::data_dir()
      .map(|d| d.join("graph-sketch"))
      .ok_or_else(|| eyre!("No data directory available; set data_dir in the config file"))
  }

  pub fn cache_dir(&self) -> Result<PathBuf> {
    Ok(self.data_dir()?.join("cache"))
  }

  pub fn database_path(&self) -> Result<PathBuf> {
    Ok(self.data_dir()?.join("sketches.db"))
  }

  pub fn log_dir(&self) -> Result<PathBuf> {
    Ok(self.data_dir()?.join("logs"))
  }

  pub fn debounce(&self) -> Duration {
    Duration::from_millis(self.debounce_ms)
  }

  /// Preference values used when the device has nothing stored.
  pub fn default_preferences(&self) -> Preferences {
    Preferences {
      autosave: self.autosave,
      language: self.language,
      ..Preferences::default()
    }
  }
}
