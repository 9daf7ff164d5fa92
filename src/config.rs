//! Runtime configuration.
//!
//! Resolution order: built-in defaults, then an optional TOML file, then
//! environment variables, then CLI flags (applied by `main`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ReviewError;

pub const ENV_API_BASE_URL: &str = "SURGICAL_REVIEW_API_BASE_URL";
pub const ENV_STORAGE_DIR: &str = "SURGICAL_REVIEW_STORAGE_DIR";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Base URL of the chat and video API (e.g. `http://127.0.0.1:8000`).
    pub api_base_url: String,
    /// Base URL the static catalogs (`/ai/questions.json`,
    /// `/upload/procedures.json`) are served from.
    pub static_base_url: String,
    pub storage_dir: PathBuf,
    pub session_key: String,
    /// Minimum gap between two progressive re-renders of a streamed answer.
    pub render_interval_ms: u64,
    /// Pause between persisting navigation data and performing the navigation.
    pub navigation_settle_ms: u64,
    /// Pause between a failed flow check and the automatic redirect.
    pub redirect_delay_ms: u64,
    pub health_check_interval_secs: u64,
    pub analysis_step_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            api_base_url: "http://127.0.0.1:8000".to_string(),
            static_base_url: "http://127.0.0.1:8080".to_string(),
            storage_dir: PathBuf::from(".surgical-review"),
            session_key: "jhui_session".to_string(),
            render_interval_ms: 50,
            navigation_settle_ms: 50,
            redirect_delay_ms: 2000,
            health_check_interval_secs: 30,
            analysis_step_ms: 3000,
            request_timeout_secs: 120,
        }
    }
}

impl AppConfig {
    /// Parse a TOML document; missing keys keep their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self, ReviewError> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if given, then apply environment overrides.
    ///
    /// A missing file is an error only when the path was given explicitly.
    pub fn load(path: Option<&Path>) -> Result<Self, ReviewError> {
        let mut config = match path {
            Some(p) => {
                let text = std::fs::read_to_string(p).map_err(|e| {
                    ReviewError::Config(format!("cannot read {}: {}", p.display(), e))
                })?;
                Self::from_toml_str(&text)?
            }
            None => AppConfig::default(),
        };
        config.apply_env(|k| std::env::var(k).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup (injectable for tests).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_API_BASE_URL) {
            self.api_base_url = url;
        }
        if let Some(dir) = lookup(ENV_STORAGE_DIR) {
            self.storage_dir = PathBuf::from(dir);
        }
    }

    pub fn validate(&self) -> Result<(), ReviewError> {
        for (name, url) in [
            ("api_base_url", &self.api_base_url),
            ("static_base_url", &self.static_base_url),
        ] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ReviewError::Config(format!(
                    "{} must be an http(s) URL, got {:?}",
                    name, url
                )));
            }
        }
        if self.session_key.trim().is_empty() {
            return Err(ReviewError::Config("session_key must not be empty".to_string()));
        }
        if self.health_check_interval_secs == 0 {
            return Err(ReviewError::Config(
                "health_check_interval_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// `api_base_url` without a trailing slash.
    pub fn api_base(&self) -> &str {
        self.api_base_url.trim_end_matches('/')
    }

    pub fn static_base(&self) -> &str {
        self.static_base_url.trim_end_matches('/')
    }

    pub fn render_interval(&self) -> Duration {
        Duration::from_millis(self.render_interval_ms)
    }

    pub fn navigation_settle(&self) -> Duration {
        Duration::from_millis(self.navigation_settle_ms)
    }

    pub fn redirect_delay(&self) -> Duration {
        Duration::from_millis(self.redirect_delay_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn analysis_step(&self) -> Duration {
        Duration::from_millis(self.analysis_step_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = AppConfig::default();
        assert_eq!(c.session_key, "jhui_session");
        assert_eq!(c.render_interval(), Duration::from_millis(50));
        assert_eq!(c.redirect_delay(), Duration::from_secs(2));
        assert_eq!(c.health_check_interval(), Duration::from_secs(30));
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let c = AppConfig::from_toml_str("api_base_url = \"https://review.example\"\n")
            .expect("parse");
        assert_eq!(c.api_base_url, "https://review.example");
        assert_eq!(c.navigation_settle_ms, 50);
    }

    #[test]
    fn test_invalid_url_rejected() {
        let err = AppConfig::from_toml_str("api_base_url = \"ftp://x\"\n").unwrap_err();
        assert!(matches!(err, ReviewError::Config(_)));
    }

    #[test]
    fn test_empty_session_key_rejected() {
        assert!(AppConfig::from_toml_str("session_key = \"  \"\n").is_err());
    }

    #[test]
    fn test_zero_health_interval_rejected() {
        assert!(AppConfig::from_toml_str("health_check_interval_secs = 0\n").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut c = AppConfig::default();
        c.apply_env(|k| match k {
            ENV_API_BASE_URL => Some("http://10.0.0.2:9000".to_string()),
            ENV_STORAGE_DIR => Some("/tmp/review".to_string()),
            _ => None,
        });
        assert_eq!(c.api_base_url, "http://10.0.0.2:9000");
        assert_eq!(c.storage_dir, PathBuf::from("/tmp/review"));
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let c = AppConfig {
            api_base_url: "http://host:8000/".to_string(),
            ..Default::default()
        };
        assert_eq!(c.api_base(), "http://host:8000");
    }

    #[test]
    fn test_load_missing_explicit_file_errors() {
        let err = AppConfig::load(Some(Path::new("/definitely/not/here.toml"))).unwrap_err();
        assert!(matches!(err, ReviewError::Config(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("review.toml");
        std::fs::write(&path, "redirect_delay_ms = 10\n").unwrap();
        let c = AppConfig::load(Some(&path)).expect("load");
        assert_eq!(c.redirect_delay_ms, 10);
    }
}
