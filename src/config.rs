//! Settings file and data directory resolution.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::amount::Amount;
use crate::error::{EngineError, Result};

pub const SETTINGS_FILE: &str = "settings.json";
pub const DATABASE_FILE: &str = "company.json";
pub const JOURNAL_FILE: &str = "settlements.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Wage per hour, in hundredths of the token.
    pub hourly_rate: Amount,
    /// Progress percent at which a submission goes to review.
    pub completion_threshold: u8,
    pub explorer_host: String,
    pub token_decimals: u32,
    pub journal_file: Option<PathBuf>,
    pub log_level: String,
    /// `pretty` or `compact`.
    pub log_format: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            hourly_rate: Amount::from_units(2),
            completion_threshold: 100,
            explorer_host: "sepolia.etherscan.io".into(),
            token_decimals: 18,
            journal_file: None,
            log_level: "info".into(),
            log_format: "pretty".into(),
        }
    }
}

impl Settings {
    /// Load settings. A missing file means defaults; a malformed one is an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Settings::default());
        }
        let raw = fs::read_to_string(path)?;
        let settings: Settings = serde_json::from_str(&raw)
            .map_err(|e| EngineError::Configuration(format!("{}: {e}", path.display())))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.completion_threshold > 100 {
            return Err(EngineError::Configuration(format!(
                "completion_threshold must be 0-100, got {}",
                self.completion_threshold
            )));
        }
        if self.token_decimals < 2 || self.token_decimals > 36 {
            return Err(EngineError::Configuration(format!(
                "token_decimals must be 2-36, got {}",
                self.token_decimals
            )));
        }
        if self.hourly_rate.is_zero() {
            return Err(EngineError::Configuration("hourly_rate must be positive".into()));
        }
        if self.explorer_host.trim().is_empty() {
            return Err(EngineError::Configuration("explorer_host must not be empty".into()));
        }
        Ok(())
    }

    pub fn journal_path(&self, data_dir: &Path) -> PathBuf {
        self.journal_file.clone().unwrap_or_else(|| data_dir.join(JOURNAL_FILE))
    }
}

/// `--data-dir`, else `$TASKPAY_HOME`, else `$HOME/.taskpay`.
pub fn resolve_data_dir(flag: Option<&Path>) -> PathBuf {
    if let Some(dir) = flag {
        return dir.to_path_buf();
    }
    if let Ok(dir) = std::env::var("TASKPAY_HOME") {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".taskpay")
}
