//! # Runtime Configuration
//!
//! Concurrency, retry, DLQ, FX staleness, PDF, cron, and idempotency
//! settings, layered as code defaults overlaid by an optional TOML file,
//! overlaid by `TASKER_`-prefixed environment variables. Canonical config
//! structs are kept separate from the adapters that consume them.

use crate::error::{TaskerError, TaskerResult};
use serde::{Deserialize, Serialize};

/// Jitter strategy applied to computed backoff delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterKind {
    None,
    Full,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    pub default_per_function: u32,
    pub global: u32,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            default_per_function: 5,
            global: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub base_delay_ms: u64,
    pub factor: f64,
    pub max_delay_ms: u64,
    pub jitter: JitterKind,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            factor: 2.0,
            max_delay_ms: 10 * 60 * 1_000,
            jitter: JitterKind::Full,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DlqConfig {
    pub retention_days: u32,
    pub critical_functions: Vec<String>,
}

impl Default for DlqConfig {
    fn default() -> Self {
        Self {
            retention_days: 30,
            critical_functions: vec![
                "fx-rate-ingestion".to_string(),
                "payment-processing".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FxStalenessConfig {
    pub warning_minutes: i64,
    pub acceptable_minutes: i64,
    pub critical_minutes: i64,
}

impl Default for FxStalenessConfig {
    fn default() -> Self {
        Self {
            warning_minutes: 240,
            acceptable_minutes: 480,
            critical_minutes: 720,
        }
    }
}

impl FxStalenessConfig {
    /// Validate the `WARNING < ACCEPTABLE < CRITICAL` ordering required of
    /// these thresholds.
    pub fn validate(&self) -> TaskerResult<()> {
        if self.warning_minutes < self.acceptable_minutes
            && self.acceptable_minutes < self.critical_minutes
        {
            Ok(())
        } else {
            Err(TaskerError::Config(
                "fx.staleness_thresholds must satisfy warning < acceptable < critical"
                    .to_string(),
            ))
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PdfConfig {
    pub step_timeout_ms: u64,
}

impl Default for PdfConfig {
    fn default() -> Self {
        Self {
            step_timeout_ms: 45_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CronConfig {
    pub catch_up_budget: u32,
}

impl Default for CronConfig {
    fn default() -> Self {
        Self { catch_up_budget: 1 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdempotencyConfig {
    pub window_hours: u32,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self { window_hours: 24 }
    }
}

/// Top-level runtime configuration, built by layering defaults, an
/// optional TOML file, and `TASKER_`-prefixed environment overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub concurrency: ConcurrencyConfig,
    pub retry: RetryConfig,
    pub dlq: DlqConfig,
    pub fx: FxConfigSection,
    pub pdf: PdfConfig,
    pub cron: CronConfig,
    pub idempotency: IdempotencyConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FxConfigSection {
    pub staleness_thresholds: FxStalenessConfig,
}

impl RuntimeConfig {
    /// Load configuration from an optional TOML file path, overlaid with
    /// `TASKER_`-prefixed environment variables (e.g.
    /// `TASKER_CONCURRENCY__GLOBAL=100`).
    pub fn load(toml_path: Option<&str>) -> TaskerResult<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = toml_path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("TASKER")
                .separator("__")
                .try_parsing(true),
        );

        let built = builder
            .build()
            .map_err(|e| TaskerError::Config(e.to_string()))?;

        let cfg: RuntimeConfig = built
            .try_deserialize()
            .map_err(|e| TaskerError::Config(e.to_string()))?;

        cfg.fx.staleness_thresholds.validate()?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_satisfy_staleness_ordering() {
        RuntimeConfig::default()
            .fx
            .staleness_thresholds
            .validate()
            .unwrap();
    }

    #[test]
    fn rejects_misordered_thresholds() {
        let bad = FxStalenessConfig {
            warning_minutes: 500,
            acceptable_minutes: 100,
            critical_minutes: 600,
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn load_with_no_file_falls_back_to_defaults() {
        let cfg = RuntimeConfig::load(None).unwrap();
        assert_eq!(cfg.concurrency.global, 50);
        assert_eq!(cfg.pdf.step_timeout_ms, 45_000);
    }
}
