//! Store configuration, loaded from TOML.
//!
//! ```toml
//! data_dir = "data"
//!
//! [provider]
//! base_url = "https://api.tiingo.com"
//! api_key_env = "TIINGO_API_KEY"
//! timeout_secs = 30
//! ```
//!
//! Every key is optional. The API token itself never lives in the file; it is
//! read from the environment variable named by `api_key_env`.

use crate::data::provider::DataError;
use crate::data::tiingo::{TiingoSettings, DEFAULT_BASE_URL, DEFAULT_SUPPORTED_TICKERS_URL};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_API_KEY_ENV: &str = "TIINGO_API_KEY";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding one subdirectory per ticker plus the universe snapshot.
    pub data_dir: PathBuf,
    pub provider: ProviderConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub base_url: String,
    pub supported_tickers_url: String,
    /// Name of the environment variable holding the API token.
    pub api_key_env: String,
    pub timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            provider: ProviderConfig::default(),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            supported_tickers_url: DEFAULT_SUPPORTED_TICKERS_URL.to_string(),
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
            timeout_secs: 30,
        }
    }
}

impl StoreConfig {
    /// Load a config from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, DataError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DataError::Config(format!("read {}: {e}", path.display())))?;
        Self::from_toml(&content)
    }

    /// Parse a config from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, DataError> {
        toml::from_str(content).map_err(|e| DataError::Config(format!("parse config TOML: {e}")))
    }

    pub fn to_toml(&self) -> Result<String, DataError> {
        toml::to_string_pretty(self).map_err(|e| DataError::Config(format!("serialize config: {e}")))
    }

    /// Tiingo settings with the token taken from the environment.
    pub fn tiingo_settings(&self) -> Result<TiingoSettings, DataError> {
        let token = std::env::var(&self.provider.api_key_env).map_err(|_| {
            DataError::AuthenticationRequired(format!(
                "environment variable {} is not set",
                self.provider.api_key_env
            ))
        })?;
        Ok(self.tiingo_settings_with_token(token))
    }

    pub fn tiingo_settings_with_token(&self, token: String) -> TiingoSettings {
        TiingoSettings {
            base_url: self.provider.base_url.clone(),
            supported_tickers_url: self.provider.supported_tickers_url.clone(),
            token,
            timeout: Duration::from_secs(self.provider.timeout_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_gives_defaults() {
        let config = StoreConfig::from_toml("").unwrap();
        assert_eq!(config, StoreConfig::default());
        assert_eq!(config.provider.api_key_env, "TIINGO_API_KEY");
    }

    #[test]
    fn partial_provider_table_keeps_other_defaults() {
        let config = StoreConfig::from_toml(
            r#"
            data_dir = "/tmp/quotes"

            [provider]
            timeout_secs = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/quotes"));
        assert_eq!(config.provider.timeout_secs, 5);
        assert_eq!(config.provider.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn toml_roundtrip() {
        let config = StoreConfig::default();
        let parsed = StoreConfig::from_toml(&config.to_toml().unwrap()).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn malformed_toml_is_config_error() {
        assert!(matches!(
            StoreConfig::from_toml("data_dir = ["),
            Err(DataError::Config(_))
        ));
    }

    #[test]
    fn missing_token_env_is_auth_error() {
        let mut config = StoreConfig::default();
        config.provider.api_key_env = "ASSETQUOTES_TEST_UNSET_TOKEN_VAR".into();
        assert!(matches!(
            config.tiingo_settings(),
            Err(DataError::AuthenticationRequired(_))
        ));
    }
}
