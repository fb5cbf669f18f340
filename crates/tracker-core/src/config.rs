use crate::error::{Result, TrackerError};
use crate::io;
use crate::paths;
use crate::rules::{RuleSet, TransitionRule};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// AutoProgressConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoProgressConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Minimum seconds between two cycles.
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_rules")]
    pub rules: Vec<TransitionRule>,
}

fn default_enabled() -> bool {
    true
}

fn default_check_interval() -> u64 {
    60
}

fn default_page_size() -> usize {
    crate::engine::DEFAULT_PAGE_SIZE
}

fn default_rules() -> Vec<TransitionRule> {
    RuleSet::default_rules().rules().to_vec()
}

impl Default for AutoProgressConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            check_interval_secs: default_check_interval(),
            page_size: default_page_size(),
            rules: default_rules(),
        }
    }
}

impl AutoProgressConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }
}

// ---------------------------------------------------------------------------
// ServerConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    3141
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    pub project: ProjectConfig,
    #[serde(default)]
    pub auto_progress: AutoProgressConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

fn default_version() -> u32 {
    1
}

impl Config {
    pub fn new(project_name: impl Into<String>) -> Self {
        Self {
            version: default_version(),
            project: ProjectConfig {
                name: project_name.into(),
            },
            auto_progress: AutoProgressConfig::default(),
            server: ServerConfig::default(),
        }
    }

    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Err(TrackerError::NotInitialized);
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        io::atomic_write(&paths::config_path(root), data.as_bytes())
    }

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let ap = &self.auto_progress;

        if ap.check_interval_secs == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "auto_progress.check_interval_secs must be greater than 0".to_string(),
            });
        }

        if ap.page_size == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "auto_progress.page_size must be greater than 0".to_string(),
            });
        }

        match RuleSet::new(ap.rules.clone()) {
            Err(e) => warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: e.to_string(),
            }),
            Ok(rules) if rules.is_empty() && ap.enabled => warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "auto_progress is enabled but has no rules".to_string(),
            }),
            Ok(rules) => {
                // An interval longer than a threshold means orders can sit past
                // their deadline for up to one extra interval.
                let shortest = rules.rules().iter().map(|r| r.min_elapsed).min();
                if let Some(shortest) = shortest {
                    if ap.check_interval() > shortest {
                        warnings.push(ConfigWarning {
                            level: WarnLevel::Warning,
                            message: format!(
                                "check interval ({}s) is longer than the shortest rule threshold ({}s)",
                                ap.check_interval_secs,
                                shortest.as_secs()
                            ),
                        });
                    }
                }
            }
        }

        warnings
    }
}
