//! Application configuration.
//!
//! Read from `config.json` in the app config directory when present, then
//! overridden by `ORDERCHHA_*` environment variables.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{PosError, Result};

pub const CONFIG_FILE: &str = "config.json";
const DEFAULT_LOG_FILTER: &str = "info,orderchha_lib=debug";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Database file, relative to the app data directory unless absolute.
    pub db_file: PathBuf,
    pub currency: String,
    /// Fraction applied on top of the bill subtotal (0.13 = 13%).
    pub tax_rate: f64,
    /// Open an in-memory store when the database file cannot be used.
    pub allow_memory_fallback: bool,
    pub log_filter: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_file: PathBuf::from("orderchha.db"),
            currency: "NPR".to_string(),
            tax_rate: 0.0,
            allow_memory_fallback: true,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl AppConfig {
    /// Load `config.json` from `config_dir`; a missing file yields defaults.
    pub fn load(config_dir: &Path) -> Result<Self> {
        let path = config_dir.join(CONFIG_FILE);
        let mut config = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            serde_json::from_str::<AppConfig>(&raw)
                .map_err(|e| PosError::Config(format!("{}: {e}", path.display())))?
        } else {
            info!(path = %path.display(), "No config file, using defaults");
            AppConfig::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply `ORDERCHHA_*` overrides. Takes a lookup fn so tests need not touch
    /// the process environment.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("ORDERCHHA_DB_PATH").filter(|v| !v.trim().is_empty()) {
            self.db_file = PathBuf::from(path.trim());
        }
        if let Some(rate) = lookup("ORDERCHHA_TAX_RATE") {
            match rate.trim().parse::<f64>() {
                Ok(r) => self.tax_rate = r,
                Err(_) => warn!(value = %rate, "Ignoring unparsable ORDERCHHA_TAX_RATE"),
            }
        }
        if let Some(currency) = lookup("ORDERCHHA_CURRENCY").filter(|v| !v.trim().is_empty()) {
            self.currency = currency.trim().to_uppercase();
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..1.0).contains(&self.tax_rate) {
            return Err(PosError::Config(format!(
                "tax_rate must be in [0, 1), got {}",
                self.tax_rate
            )));
        }
        if self.currency.trim().is_empty() {
            return Err(PosError::Config("currency must not be empty".into()));
        }
        Ok(())
    }

    pub fn db_path(&self, data_dir: &Path) -> PathBuf {
        if self.db_file.is_absolute() {
            self.db_file.clone()
        } else {
            data_dir.join(&self.db_file)
        }
    }
}
