//! tflow configuration
//!
//! YAML files read in order, later values overriding earlier ones key by key:
//! - the site file named by `TFLOWCLIENT_SITE_CONF` (if any)
//! - the user file `~/.tflowclient.yaml` (if any)
//!
//! ```yaml
//! logging:
//!   filename: ~/.tflowclient.log
//!   level: info
//! cdp:
//!   path: /opt/sms/bin/cdp
//!   host: sms_server.meteo.fr
//!   user: groucho
//!   suite: groucho
//! session:
//!   exchange_timeout_secs: 120
//! ```

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use tracing::debug;

use crate::error::{Result, TflowError};
use crate::session::SessionConfig;

/// Environment variable naming the site-wide configuration file
pub const SITE_CONF_VAR: &str = "TFLOWCLIENT_SITE_CONF";

const USER_CONF_FILE: &str = ".tflowclient.yaml";

/// `logging` section
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log to this file instead of stderr (`~` is expanded)
    pub filename: Option<String>,
    /// Default filter when `RUST_LOG` is not set
    pub level: Option<String>,
}

impl LoggingConfig {
    /// Filter directive to use: `RUST_LOG` wins, then `level`, then `warn`
    pub fn filter(&self) -> String {
        env::var("RUST_LOG")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| self.level.clone())
            .unwrap_or_else(|| "warn".to_string())
    }

    pub fn log_file(&self) -> Option<PathBuf> {
        self.filename.as_deref().map(expand_home)
    }
}

/// `cdp` section: defaults for the command line
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct CdpConfig {
    pub path: Option<String>,
    pub host: Option<String>,
    pub user: Option<String>,
    pub suite: Option<String>,
}

/// `session` section
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    pub connect_timeout_secs: u64,
    pub exchange_timeout_secs: u64,
    /// Close the scheduler session after this much inactivity
    pub idle_timeout_secs: u64,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 30,
            exchange_timeout_secs: 60,
            idle_timeout_secs: 600,
        }
    }
}

impl SessionSection {
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            exchange_timeout: Duration::from_secs(self.exchange_timeout_secs),
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

/// `flow` section
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FlowSection {
    pub min_refresh_interval_secs: u64,
}

impl Default for FlowSection {
    fn default() -> Self {
        Self {
            min_refresh_interval_secs: 5,
        }
    }
}

impl FlowSection {
    pub fn min_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.min_refresh_interval_secs)
    }
}

/// `ui` section
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct UiSection {
    /// Command used to display a log file; `{filename}` is substituted
    pub logviewer_command: String,
}

impl Default for UiSection {
    fn default() -> Self {
        Self {
            logviewer_command: "vim -R -N {filename}".to_string(),
        }
    }
}

impl UiSection {
    /// The log viewer command line for `filename`, split on blanks
    pub fn logviewer_argv(&self, filename: &Path) -> Vec<String> {
        let filename = filename.display().to_string();
        self.logviewer_command
            .split_whitespace()
            .map(|arg| arg.replace("{filename}", &filename))
            .collect()
    }
}

/// Whole configuration
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct TflowConfig {
    pub logging: LoggingConfig,
    pub cdp: CdpConfig,
    pub session: SessionSection,
    pub flow: FlowSection,
    pub ui: UiSection,
}

impl TflowConfig {
    /// Load the site then the user configuration files (both optional).
    pub fn load() -> Result<Self> {
        let mut files = Vec::new();
        if let Some(site) = env::var_os(SITE_CONF_VAR).map(PathBuf::from) {
            files.push(site);
        }
        if let Some(home) = dirs::home_dir() {
            files.push(home.join(USER_CONF_FILE));
        }
        Self::from_files(&files)
    }

    /// Merge the existing files among `files`, in order.
    pub fn from_files(files: &[PathBuf]) -> Result<Self> {
        let mut merged = Mapping::new();
        for file in files.iter().filter(|f| f.is_file()) {
            debug!("Reading configuration from {}", file.display());
            let content = fs::read_to_string(file)?;
            merge(&mut merged, parse_mapping(&content, &file.display().to_string())?);
        }
        serde_yaml::from_value(Value::Mapping(merged)).map_err(|e| TflowError::Config(e.to_string()))
    }

    /// Parse a single configuration text
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let mapping = parse_mapping(content, "<string>")?;
        serde_yaml::from_value(Value::Mapping(mapping)).map_err(|e| TflowError::Config(e.to_string()))
    }
}

fn parse_mapping(content: &str, origin: &str) -> Result<Mapping> {
    match serde_yaml::from_str::<Value>(content) {
        Ok(Value::Mapping(mapping)) => Ok(mapping),
        Ok(Value::Null) => Ok(Mapping::new()),
        Ok(_) => Err(TflowError::Config(format!("{}: expected a mapping of sections", origin))),
        Err(e) => Err(TflowError::Config(format!("{}: {}", origin, e))),
    }
}

/// Override `base` with `other`, section by section and key by key
fn merge(base: &mut Mapping, other: Mapping) {
    for (section, values) in other {
        match (base.get_mut(&section), values) {
            (Some(Value::Mapping(current)), Value::Mapping(values)) => {
                for (key, value) in values {
                    current.insert(key, value);
                }
            }
            (_, values) => {
                base.insert(section, values);
            }
        }
    }
}

fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

/// First `cdp` executable found in `$PATH`
pub fn find_cdp_in_path() -> Option<PathBuf> {
    let paths = env::var_os("PATH")?;
    env::split_paths(&paths)
        .map(|dir| dir.join("cdp"))
        .find(|candidate| candidate.is_file())
}
