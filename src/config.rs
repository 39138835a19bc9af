/**
 * Client Configuration
 *
 * Resolved in layers: built-in defaults, an optional TOML file, then
 * `ANALYSIS_*` environment variables. CLI flags are applied last by the binary.
 */
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{ClientError, Result};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000/api/v1";
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
/// 4 minutes of estimated progress before the bar parks at 99%
pub const DEFAULT_PROGRESS_BUDGET_MS: u64 = 240_000;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    pub base_url: String,
    pub token: Option<String>,
    pub poll_interval_ms: u64,
    pub progress_budget_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            token: None,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            progress_budget_ms: DEFAULT_PROGRESS_BUDGET_MS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl ClientConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| ClientError::config(format!("invalid config file: {}", e)))
    }

    pub fn load_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// `<config_dir>/analysis-client/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("analysis-client").join("config.toml"))
    }

    /// Defaults, then the file at `path` (or the default path when it exists),
    /// then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::load_file(p)?,
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(p) => Self::load_file(&p)?,
                None => Self::default(),
            },
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay `ANALYSIS_*` variables read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("ANALYSIS_API_URL") {
            self.base_url = url;
        }
        if let Some(token) = lookup("ANALYSIS_API_TOKEN") {
            self.token = Some(token).filter(|t| !t.is_empty());
        }
        if let Some(v) = lookup("ANALYSIS_POLL_INTERVAL_MS") {
            self.poll_interval_ms = parse_u64("ANALYSIS_POLL_INTERVAL_MS", &v)?;
        }
        if let Some(v) = lookup("ANALYSIS_PROGRESS_BUDGET_MS") {
            self.progress_budget_ms = parse_u64("ANALYSIS_PROGRESS_BUDGET_MS", &v)?;
        }
        if let Some(v) = lookup("ANALYSIS_REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = parse_u64("ANALYSIS_REQUEST_TIMEOUT_SECS", &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(ClientError::config("base_url must not be empty"));
        }
        if self.poll_interval_ms == 0 {
            return Err(ClientError::config("poll_interval_ms must be positive"));
        }
        if self.progress_budget_ms == 0 {
            return Err(ClientError::config("progress_budget_ms must be positive"));
        }
        if self.request_timeout_secs == 0 {
            return Err(ClientError::config("request_timeout_secs must be positive"));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn progress_budget(&self) -> Duration {
        Duration::from_millis(self.progress_budget_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn parse_u64(key: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .map_err(|_| ClientError::config(format!("{} is not a number: {:?}", key, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = ClientConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.progress_budget(), Duration::from_secs(240));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ClientConfig::from_toml_str("base_url = \"http://api.local\"\n").unwrap();
        assert_eq!(config.base_url, "http://api.local");
        assert_eq!(config.poll_interval_ms, DEFAULT_POLL_INTERVAL_MS);
        assert_eq!(config.token, None);
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config = ClientConfig::from_toml_str("poll_interval_ms = 500").unwrap();
        let env: HashMap<&str, &str> = [
            ("ANALYSIS_POLL_INTERVAL_MS", "250"),
            ("ANALYSIS_API_TOKEN", "secret"),
        ]
        .into_iter()
        .collect();
        config
            .apply_env(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.poll_interval_ms, 250);
        assert_eq!(config.token.as_deref(), Some("secret"));
    }

    #[test]
    fn test_bad_env_number_is_config_error() {
        let mut config = ClientConfig::default();
        let err = config
            .apply_env(|k| (k == "ANALYSIS_PROGRESS_BUDGET_MS").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, ClientError::Config(_)));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config = ClientConfig {
            poll_interval_ms: 0,
            ..ClientConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_file_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "base_url = \"http://10.0.0.2/api\"").unwrap();
        writeln!(file, "progress_budget_ms = 60000").unwrap();

        let config = ClientConfig::load_file(file.path()).unwrap();
        assert_eq!(config.base_url, "http://10.0.0.2/api");
        assert_eq!(config.progress_budget_ms, 60_000);
    }
}
