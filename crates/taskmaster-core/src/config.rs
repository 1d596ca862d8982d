use crate::autoloop::DEFAULT_MAX_ITERATIONS;
use crate::complexity::{GateSettings, MAX_PASSES, MIN_PASSES};
use crate::error::{Result, TaskError};
use crate::paths;
use crate::scheduler::Scheduler;
use crate::types::Strategy;
use serde::{Deserialize, Serialize};
use std::path::Path;

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
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplexityConfig {
    #[serde(default = "default_max_passes")]
    pub max_passes: u8,
    #[serde(default = "default_true")]
    pub splitting: bool,
}

fn default_max_passes() -> u8 {
    MAX_PASSES
}

fn default_true() -> bool {
    true
}

impl Default for ComplexityConfig {
    fn default() -> Self {
        Self {
            max_passes: default_max_passes(),
            splitting: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub default_strategy: Strategy,
    #[serde(default = "default_true")]
    pub phase_gating: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_strategy: Strategy::QuickWin,
            phase_gating: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoLoopConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Shell command that carries out one task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

fn default_max_iterations() -> u32 {
    DEFAULT_MAX_ITERATIONS
}

fn default_timeout() -> u64 {
    600
}

impl Default for AutoLoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            command: None,
            timeout_seconds: default_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityGatesConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typecheck: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tests: Option<String>,
    #[serde(default = "default_gate_timeout")]
    pub timeout_seconds: u64,
}

fn default_gate_timeout() -> u64 {
    300
}

impl Default for QualityGatesConfig {
    fn default() -> Self {
        Self {
            lint: None,
            typecheck: None,
            tests: None,
            timeout_seconds: default_gate_timeout(),
        }
    }
}

impl QualityGatesConfig {
    /// Configured `(check, command)` pairs in lint, typecheck, tests order.
    pub fn commands(&self) -> Vec<(&'static str, &str)> {
        [
            ("lint", &self.lint),
            ("typecheck", &self.typecheck),
            ("tests", &self.tests),
        ]
        .into_iter()
        .filter_map(|(name, cmd)| cmd.as_deref().map(|c| (name, c)))
        .collect()
    }
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub complexity: ComplexityConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub auto_loop: AutoLoopConfig,
    #[serde(default)]
    pub quality_gates: QualityGatesConfig,
}

fn default_version() -> u32 {
    1
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            complexity: ComplexityConfig::default(),
            scheduler: SchedulerConfig::default(),
            auto_loop: AutoLoopConfig::default(),
            quality_gates: QualityGatesConfig::default(),
        }
    }
}

impl Config {
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Err(TaskError::NotInitialized);
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    pub fn gate_settings(&self) -> GateSettings {
        GateSettings::new(self.complexity.max_passes, self.complexity.splitting)
    }

    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(self.scheduler.default_strategy, self.scheduler.phase_gating)
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if !(MIN_PASSES..=MAX_PASSES).contains(&self.complexity.max_passes) {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: format!(
                    "complexity.max_passes={} is outside {MIN_PASSES}..={MAX_PASSES}; it will be clamped",
                    self.complexity.max_passes
                ),
            });
        }

        if !self.complexity.splitting {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "complexity.splitting is off; tasks above the ceiling will be flagged, not split"
                    .to_string(),
            });
        }

        if self.auto_loop.max_iterations == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "auto_loop.max_iterations must be at least 1".to_string(),
            });
        } else if self.auto_loop.max_iterations > 100 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "auto_loop.max_iterations={} (>100 is unusual)",
                    self.auto_loop.max_iterations
                ),
            });
        }

        if let Some(command) = &self.auto_loop.command {
            if command.trim().is_empty() {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: "auto_loop.command is empty".to_string(),
                });
            }
        }

        for (name, command) in [
            ("lint", &self.quality_gates.lint),
            ("typecheck", &self.quality_gates.typecheck),
            ("tests", &self.quality_gates.tests),
        ] {
            if command.as_deref().is_some_and(|c| c.trim().is_empty()) {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!("quality_gates.{name} has an empty command"),
                });
            }
        }

        for (name, secs) in [
            ("auto_loop", self.auto_loop.timeout_seconds),
            ("quality_gates", self.quality_gates.timeout_seconds),
        ] {
            if secs == 0 {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!("{name}.timeout_seconds must be positive"),
                });
            }
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
