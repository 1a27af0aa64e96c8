use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::ConfigError;
use crate::model::AppConfig;

const DEFAULT_SEARCH_PATHS: [&str; 3] = ["coursechat.yml", "coursechat.yaml", "coursechat.toml"];

const SUPPORTED_PROVIDERS: [&str; 1] = ["openai"];

type EnvLookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Loads [`AppConfig`] from YAML or TOML and fills secrets from the
/// environment.
pub struct ConfigLoader {
    path: Option<PathBuf>,
    env: EnvLookup,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            path: None,
            env: Box::new(|key| std::env::var(key).ok()),
        }
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Replace the environment lookup (tests).
    pub fn with_env_lookup(
        mut self,
        lookup: impl Fn(&str) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        self.env = Box::new(lookup);
        self
    }

    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        if dotenvy::dotenv().is_ok() {
            debug!("loaded environment from .env");
        }

        let mut config = match self.resolve_path() {
            Some(path) => {
                info!("loading configuration from {}", path.display());
                Self::load_file(&path)?
            }
            None => {
                info!("no configuration file found, using defaults");
                AppConfig::default()
            }
        };

        if config.llm.api_key.as_deref().is_none_or(str::is_empty) {
            config.llm.api_key = (self.env)(&config.llm.api_key_env).filter(|k| !k.is_empty());
        }

        validate(&config)?;
        Ok(config)
    }

    fn resolve_path(&self) -> Option<PathBuf> {
        if let Some(path) = &self.path {
            return Some(path.clone());
        }
        DEFAULT_SEARCH_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|p| p.exists())
    }

    pub fn load_file(path: &Path) -> Result<AppConfig, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);

        match extension.as_deref() {
            Some("yml") | Some("yaml") => {
                serde_yaml::from_str(&raw).map_err(|e| ConfigError::Parse {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                })
            }
            Some("toml") => toml::from_str(&raw).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
            _ => Err(ConfigError::UnsupportedFormat(path.to_path_buf())),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Structural checks. Credentials are checked when the provider client is
/// built, not here.
pub fn validate(config: &AppConfig) -> Result<(), ConfigError> {
    if config.gateway.port == 0 {
        return Err(ConfigError::Invalid("gateway.port must be non-zero".into()));
    }
    if config.gateway.max_concurrent_turns == 0 {
        return Err(ConfigError::Invalid(
            "gateway.max_concurrent_turns must be at least 1".into(),
        ));
    }
    if config.gateway.stream_timeout_secs == 0 || config.gateway.tool_timeout_secs == 0 {
        return Err(ConfigError::Invalid("gateway timeouts must be positive".into()));
    }
    if config.cache.capacity == 0 {
        return Err(ConfigError::Invalid("cache.capacity must be at least 1".into()));
    }
    if config.cache.ttl_secs == 0 || config.cache.sweep_interval_secs == 0 {
        return Err(ConfigError::Invalid(
            "cache.ttl_secs and cache.sweep_interval_secs must be positive".into(),
        ));
    }
    if config.composer.max_message_chars == 0 {
        return Err(ConfigError::Invalid(
            "composer.max_message_chars must be positive".into(),
        ));
    }
    if !SUPPORTED_PROVIDERS.contains(&config.llm.provider.as_str()) {
        return Err(ConfigError::Invalid(format!(
            "unsupported llm.provider '{}' (supported: {})",
            config.llm.provider,
            SUPPORTED_PROVIDERS.join(", ")
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(name: &str, body: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(body.as_bytes()).unwrap();
        (dir, path)
    }

    #[test]
    fn loads_yaml_and_keeps_defaults_for_missing_sections() {
        let (_dir, path) = write_config(
            "coursechat.yml",
            "gateway:\n  port: 8080\nllm:\n  model: gpt-4o\n  api_key: sk-test\n",
        );

        let config = ConfigLoader::new()
            .with_path(&path)
            .with_env_lookup(|_| None)
            .load()
            .unwrap();

        assert_eq!(config.gateway.port, 8080);
        assert_eq!(config.gateway.host, "127.0.0.1");
        assert_eq!(config.llm.model, "gpt-4o");
        assert_eq!(config.cache.capacity, 50);
        assert_eq!(config.cache.ttl_secs, 300);
        assert_eq!(config.composer.max_history_tokens, 4000);
    }

    #[test]
    fn loads_toml() {
        let (_dir, path) = write_config(
            "coursechat.toml",
            "[cache]\ncapacity = 10\n\n[composer]\nstyle_seed = 7\n",
        );
        let config = ConfigLoader::new()
            .with_path(&path)
            .with_env_lookup(|_| None)
            .load()
            .unwrap();
        assert_eq!(config.cache.capacity, 10);
        assert_eq!(config.composer.style_seed, Some(7));
    }

    #[test]
    fn api_key_falls_back_to_named_env_var() {
        let (_dir, path) = write_config("c.yml", "llm:\n  api_key_env: MY_KEY\n");
        let config = ConfigLoader::new()
            .with_path(&path)
            .with_env_lookup(|key| (key == "MY_KEY").then(|| "sk-from-env".to_string()))
            .load()
            .unwrap();
        assert_eq!(config.llm.api_key.as_deref(), Some("sk-from-env"));
    }

    #[test]
    fn file_key_takes_precedence_over_env() {
        let (_dir, path) = write_config("c.yml", "llm:\n  api_key: sk-file\n");
        let config = ConfigLoader::new()
            .with_path(&path)
            .with_env_lookup(|_| Some("sk-env".to_string()))
            .load()
            .unwrap();
        assert_eq!(config.llm.api_key.as_deref(), Some("sk-file"));
    }

    #[test]
    fn rejects_unknown_extension() {
        let (_dir, path) = write_config("c.json", "{}");
        let err = ConfigLoader::load_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedFormat(_)));
    }

    #[test]
    fn rejects_zero_capacity() {
        let (_dir, path) = write_config("c.yml", "cache:\n  capacity: 0\n");
        let err = ConfigLoader::new()
            .with_path(&path)
            .with_env_lookup(|_| None)
            .load()
            .unwrap_err();
        assert!(err.to_string().contains("cache.capacity"));
    }

    #[test]
    fn rejects_unknown_provider() {
        let mut config = AppConfig::default();
        config.llm.provider = "carrier-pigeon".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = ConfigLoader::load_file(Path::new("/nonexistent/coursechat.yml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
