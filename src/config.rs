//! Runtime configuration loaded from `.bindrt.toml`

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_FILE_NAMES: [&str; 2] = [".bindrt.toml", "bindrt.toml"];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub registry: RegistryConfig,

    #[serde(default)]
    pub cast: CastConfig,

    #[serde(default)]
    pub dispatch: DispatchConfig,

    #[serde(default)]
    pub naming: NamingConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_capacity")]
    pub initial_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CastConfig {
    #[serde(default = "default_true")]
    pub cache_enabled: bool,

    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default)]
    pub error_policy: OverrideErrorPolicy,
}

/// What happens when a language override raises during a native-initiated call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverrideErrorPolicy {
    /// The error travels back through the native caller as `Err`
    #[default]
    Propagate,
    /// The native caller receives the default value; the error is parked and
    /// raised at the next language-side entry into the runtime
    NativeSignal,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NamingConfig {
    #[serde(default)]
    pub enum_scope: EnumScopePolicy,
}

/// Scope reported for enums declared on nested types
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnumScopePolicy {
    /// Immediate enclosing type name (`InnerClass`)
    #[default]
    Immediate,
    /// Fully qualified enclosing path (`SomeClass.InnerClass`)
    Qualified,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,

    #[serde(default)]
    pub spans: bool,

    #[serde(default)]
    pub file: Option<String>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            initial_capacity: default_capacity(),
        }
    }
}

impl Default for CastConfig {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            cache_capacity: default_cache_capacity(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
            spans: false,
            file: None,
        }
    }
}

fn default_true() -> bool { true }
fn default_capacity() -> usize { 256 }
fn default_cache_capacity() -> usize { 1024 }
fn default_level() -> String { "info".to_string() }

impl RuntimeConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        Self::parse(&content)
    }

    /// Parse configuration from TOML string
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Find and load configuration from the current directory or its parents
    pub fn discover() -> Self {
        match std::env::current_dir() {
            Ok(dir) => Self::discover_from(&dir),
            Err(_) => Self::default(),
        }
    }

    pub fn discover_from(start: &Path) -> Self {
        let mut current = Some(start.to_path_buf());

        while let Some(dir) = current {
            for name in CONFIG_FILE_NAMES {
                let config_path = dir.join(name);
                if config_path.exists() {
                    match Self::load(&config_path) {
                        Ok(config) => return config,
                        Err(err) => {
                            tracing::warn!(path = %config_path.display(), error = %err, "ignoring unreadable config");
                        }
                    }
                }
            }

            current = dir.parent().map(|p| p.to_path_buf());
        }

        Self::default()
    }

    /// Generate default configuration file content
    pub fn generate_default() -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(&Self::default())?)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RuntimeConfig::default();
        assert!(config.cast.cache_enabled);
        assert_eq!(config.dispatch.error_policy, OverrideErrorPolicy::Propagate);
        assert_eq!(config.naming.enum_scope, EnumScopePolicy::Immediate);
        assert_eq!(config.registry.initial_capacity, 256);
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[cast]
cache_capacity = 16

[dispatch]
error_policy = "native-signal"

[naming]
enum_scope = "qualified"
"#;

        let config = RuntimeConfig::parse(toml).unwrap();
        assert!(config.cast.cache_enabled);
        assert_eq!(config.cast.cache_capacity, 16);
        assert_eq!(config.dispatch.error_policy, OverrideErrorPolicy::NativeSignal);
        assert_eq!(config.naming.enum_scope, EnumScopePolicy::Qualified);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_parse_rejects_unknown_policy() {
        let toml = "[dispatch]\nerror_policy = \"swallow\"\n";
        assert!(matches!(RuntimeConfig::parse(toml), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_save_and_discover() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        fs::create_dir_all(&nested).unwrap();

        let mut config = RuntimeConfig::default();
        config.cast.cache_capacity = 7;
        config.save(&dir.path().join(".bindrt.toml")).unwrap();

        let found = RuntimeConfig::discover_from(&nested);
        assert_eq!(found.cast.cache_capacity, 7);
    }

    #[test]
    fn test_load_missing_file() {
        let err = RuntimeConfig::load(Path::new("/nonexistent/.bindrt.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_generate_default_parses_back() {
        let text = RuntimeConfig::generate_default().unwrap();
        let config = RuntimeConfig::parse(&text).unwrap();
        assert_eq!(config.cast.cache_capacity, 1024);
    }
}
