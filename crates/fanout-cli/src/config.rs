//! Configuration file management for fanout.
//!
//! Settings come from a TOML file (or a YAML file, for the legacy
//! `config.yaml` layout) and are merged through the chain
//! CLI flag > env var > config file > default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use fanout_core::settings::Settings;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "FANOUT_CONFIG";
/// Environment variable holding the SSH password.
pub const PASSWORD_ENV: &str = "FANOUT_PASSWORD";
/// Directory scripts are resolved against when the config does not say.
pub const DEFAULT_TEMPLATES_DIR: &str = "templates";

/// Config files looked for in the working directory, in order.
const LOCAL_CANDIDATES: [&str; 3] = ["config.toml", "config.yaml", "config.yml"];

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("failed to read config file {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("missing required setting `{0}` (set it in the config file or pass the matching flag)")]
    Missing(&'static str),
}

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfigFile {
    /// Script to execute, relative to `templates_dir` unless absolute.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hosts_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub templates_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<usize>,
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the fanout config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/fanout` or `~/.config/fanout`.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("fanout");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("fanout")
}

/// Return the path to the user-level config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Find the config file to use: flag > `FANOUT_CONFIG` > working directory
/// candidates > user config. Returns `None` when nothing exists and no path
/// was requested explicitly.
pub fn locate_config(cli_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_path {
        return Some(path.to_path_buf());
    }
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        return Some(PathBuf::from(path));
    }
    LOCAL_CANDIDATES
        .iter()
        .map(PathBuf::from)
        .chain(std::iter::once(config_path()))
        .find(|candidate| candidate.is_file())
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("yaml" | "yml")
    )
}

/// Parse config text, choosing the format from the file extension.
pub fn parse_config(path: &Path, contents: &str) -> Result<ConfigFile, ConfigLoadError> {
    let parsed = if is_yaml(path) {
        serde_yaml::from_str(contents).map_err(|e| e.to_string())
    } else {
        toml::from_str(contents).map_err(|e| e.to_string())
    };
    parsed.map_err(|message| ConfigLoadError::Parse {
        path: path.to_path_buf(),
        message,
    })
}

/// Load and parse the config file at `path`.
pub fn load_config(path: &Path) -> Result<ConfigFile, ConfigLoadError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigLoadError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(path, &contents)
}

/// A starter config with placeholder values.
pub fn starter_config() -> ConfigFile {
    ConfigFile {
        script: Some("uptime.sh".to_owned()),
        password: Some("change-me".to_owned()),
        hosts_file: Some("hosts.txt".to_owned()),
        log_file: Some("fanout.log".to_owned()),
        templates_dir: Some(DEFAULT_TEMPLATES_DIR.to_owned()),
        connect_timeout_secs: Some(10),
        max_concurrency: None,
    }
}

/// Serialize and write a config file, creating parent dirs as needed.
/// Sets file permissions to 0600 on Unix, since the file holds a password.
pub fn save_config(path: &Path, config: &ConfigFile) -> anyhow::Result<()> {
    use anyhow::Context;

    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create config directory {}", dir.display()))?;
    }

    let contents = if is_yaml(path) {
        serde_yaml::to_string(config).context("failed to serialize config")?
    } else {
        toml::to_string_pretty(config).context("failed to serialize config")?
    };
    std::fs::write(path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(path, perms)
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

// -----------------------------------------------------------------------
// Resolution
// -----------------------------------------------------------------------

/// Values supplied on the command line. Each one beats the config file.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub config: Option<PathBuf>,
    pub hosts: Option<PathBuf>,
    pub script: Option<PathBuf>,
    pub log: Option<PathBuf>,
    pub max_concurrency: Option<usize>,
    pub connect_timeout_secs: Option<u64>,
}

impl Overrides {
    fn file_config(&self) -> Result<(Option<PathBuf>, ConfigFile), ConfigLoadError> {
        match locate_config(self.config.as_deref()) {
            Some(path) => {
                let config = load_config(&path)?;
                Ok((Some(path), config))
            }
            None => Ok((None, ConfigFile::default())),
        }
    }
}

/// Resolve only the fleet file path (for commands that never connect).
pub fn resolve_hosts_file(overrides: &Overrides) -> Result<PathBuf, ConfigLoadError> {
    if let Some(hosts) = &overrides.hosts {
        return Ok(hosts.clone());
    }
    let (_, file) = overrides.file_config()?;
    file.hosts_file
        .map(PathBuf::from)
        .ok_or(ConfigLoadError::Missing("hosts_file"))
}

/// Resolve the full settings object for a run.
///
/// - Script: `--script` (used as-is) > config `script` joined onto
///   `templates_dir` (default `templates`) unless absolute.
/// - Password: `FANOUT_PASSWORD` env > config `password`.
/// - Hosts / log / concurrency / timeout: flag > config > default.
pub fn resolve(overrides: &Overrides) -> Result<Settings, ConfigLoadError> {
    let (path, file) = overrides.file_config()?;
    if let Some(path) = &path {
        tracing::debug!(config = %path.display(), "loaded config file");
    }

    let payload_script = match &overrides.script {
        Some(script) => script.clone(),
        None => {
            let script = file.script.as_deref().ok_or(ConfigLoadError::Missing("script"))?;
            let templates = file.templates_dir.as_deref().unwrap_or(DEFAULT_TEMPLATES_DIR);
            Path::new(templates).join(script)
        }
    };

    let password = match std::env::var(PASSWORD_ENV) {
        Ok(password) => password,
        Err(_) => file.password.clone().ok_or(ConfigLoadError::Missing("password"))?,
    };

    let fleet_file = overrides
        .hosts
        .clone()
        .or_else(|| file.hosts_file.as_deref().map(PathBuf::from))
        .ok_or(ConfigLoadError::Missing("hosts_file"))?;

    let log_file = overrides
        .log
        .clone()
        .or_else(|| file.log_file.as_deref().map(PathBuf::from))
        .ok_or(ConfigLoadError::Missing("log_file"))?;

    let mut settings = Settings::new(
        payload_script,
        SecretString::from(password),
        fleet_file,
        log_file,
    );
    if let Some(secs) = overrides.connect_timeout_secs.or(file.connect_timeout_secs) {
        settings.connect_timeout = Duration::from_secs(secs.max(1));
    }
    settings.max_concurrency = overrides
        .max_concurrency
        .or(file.max_concurrency)
        .filter(|&n| n > 0);

    Ok(settings)
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
