use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::engine::assembler::DEFAULT_ATTRIBUTION;
use crate::engine::panel::DashboardGroup;
use crate::error::{ReportError, Result};

// ======================================================
// DEFAULT LOCATIONS
// ======================================================

/// `~/.grafana-report`, or a relative directory when no home is known.
pub fn base_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".grafana-report"))
        .unwrap_or_else(|| PathBuf::from(".grafana-report"))
}

fn default_reports_dir() -> PathBuf {
    base_dir().join("reports")
}

fn default_data_dir() -> PathBuf {
    base_dir().join("data")
}

fn default_lock_dir() -> PathBuf {
    base_dir().join("locks")
}

fn default_footer() -> String {
    DEFAULT_ATTRIBUTION.to_string()
}

fn default_days() -> u32 {
    7
}

fn default_bind() -> String {
    "0.0.0.0:5000".to_string()
}

fn default_timeout() -> u64 {
    300
}

// ======================================================
// REPORT CONFIG
// ======================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrafanaConfig {
    pub url: String,

    /// Literal API token. Prefer api_key_env for production.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Name of an environment variable that holds the API token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
}

impl GrafanaConfig {
    pub fn resolve_api_key(&self) -> Result<String> {
        match (&self.api_key, &self.api_key_env) {
            (Some(key), _) => Ok(key.clone()),
            (None, Some(var)) => std::env::var(var).map_err(|_| {
                ReportError::Config(format!("environment variable '{}' is not set", var))
            }),
            (None, None) => Err(ReportError::Config(
                "grafana needs api_key or api_key_env".to_string(),
            )),
        }
    }

    /// Base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.url.trim_end_matches('/')
    }
}

/// One report job: where the data comes from, which panels to draw and
/// where the file goes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    pub title: String,

    /// Page header; the title when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading: Option<String>,

    #[serde(default = "default_reports_dir")]
    pub reports_dir: PathBuf,

    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo: Option<PathBuf>,

    #[serde(default = "default_footer")]
    pub footer: String,

    /// Range length used when no dates are given on the command line.
    #[serde(default = "default_days")]
    pub days: u32,

    pub grafana: GrafanaConfig,

    #[serde(default)]
    pub dashboards: Vec<DashboardGroup>,
}

impl ReportConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|e| ReportError::io(path, e))?;
        let mut config: ReportConfig = serde_yaml::from_str(&raw)?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn heading(&self) -> &str {
        self.heading.as_deref().unwrap_or(&self.title)
    }

    pub fn panel_count(&self) -> usize {
        self.dashboards.iter().map(|g| g.panels.len()).sum()
    }

    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(ReportError::Validation("report title is empty".to_string()));
        }
        if self.title.contains(['/', '\\']) {
            return Err(ReportError::Validation(format!(
                "report title '{}' cannot contain path separators",
                self.title
            )));
        }
        if self.days == 0 {
            return Err(ReportError::Validation("days must be at least 1".to_string()));
        }

        let mut keys = HashSet::new();
        for group in &self.dashboards {
            group.validate()?;
            if !keys.insert(group.key.as_str()) {
                return Err(ReportError::Validation(format!(
                    "dashboard key '{}' is used twice",
                    group.key
                )));
            }

            // panel names name the intermediate files
            let mut names = HashSet::new();
            for panel in &group.panels {
                if !names.insert(panel.name.as_str()) {
                    return Err(ReportError::Validation(format!(
                        "panel '{}' appears twice in dashboard '{}'",
                        panel.name, group.key
                    )));
                }
            }
        }
        Ok(())
    }

    fn resolve_paths(&mut self, base: &Path) {
        resolve(&mut self.reports_dir, base);
        resolve(&mut self.data_dir, base);
        if let Some(logo) = &mut self.logo {
            resolve(logo, base);
        }
    }
}

fn resolve(path: &mut PathBuf, base: &Path) {
    if path.is_relative() {
        *path = base.join(&*path);
    }
}

// ======================================================
// SERVER CONFIG
// ======================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Root searched for produced reports.
    #[serde(default = "default_reports_dir")]
    pub reports_dir: PathBuf,

    #[serde(default = "default_lock_dir")]
    pub lock_dir: PathBuf,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Job key → report configuration file.
    #[serde(default)]
    pub jobs: BTreeMap<String, PathBuf>,
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|e| ReportError::io(path, e))?;
        let mut config: ServerConfig = serde_yaml::from_str(&raw)?;
        if let Some(base) = path.parent() {
            resolve(&mut config.reports_dir, base);
            resolve(&mut config.lock_dir, base);
            for job in config.jobs.values_mut() {
                resolve(job, base);
            }
        }
        if config.jobs.is_empty() {
            return Err(ReportError::Config(format!(
                "{} defines no jobs",
                path.display()
            )));
        }
        Ok(config)
    }

    pub fn job(&self, key: &str) -> Option<&Path> {
        self.jobs.get(key).map(PathBuf::as_path)
    }
}

// ======================================================
// TESTS
// ======================================================
