use crate::cli::ValidateArgs;
use crate::engine::Parameters;
use crate::resolver::{CatalogResolver, DefaultEntityResolver};
use crate::runner::OutcomePolicy;
use crate::task::TaskSettings;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Trait for abstracting environment variable access
pub trait EnvProvider {
    fn get(&self, key: &str) -> Option<String>;
}

/// System environment variable provider for production use
pub struct SystemEnvProvider;

impl EnvProvider for SystemEnvProvider {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),

    #[error("JSON parsing error: {0}")]
    JsonParsing(#[from] serde_json::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Environment variable error: {0}")]
    Environment(String),

    #[error("Unsupported configuration file format: {0}")]
    UnsupportedFormat(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub validation: ValidationConfig,
    pub debug: DebugConfig,
    pub catalog: CatalogConfig,
    pub cache: CacheConfig,
    #[serde(rename = "task")]
    pub tasks: Vec<TaskConfig>,
}

/// Defaults applied to every task
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ValidationConfig {
    /// Processing engine id (`pure`, `schematron`, `xslt`)
    pub mode: String,
    pub phase: Option<String>,
    pub expect_success: bool,
    pub fail_on_error: bool,
    /// Directory receiving one SVRL report per input
    pub svrl_dir: Option<PathBuf>,
    /// Custom parameters passed to every validator
    pub parameters: BTreeMap<String, String>,
}

/// Intermediate compilation output
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct DebugConfig {
    pub save_intermediate: bool,
    pub intermediate_dir: Option<PathBuf>,
}

/// Entity resolution
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct CatalogConfig {
    /// Base directory for relative system ids
    pub base_dir: Option<PathBuf>,
    /// System id to local file
    pub entries: BTreeMap<String, PathBuf>,
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of loaded rule documents kept in memory
    pub max_validators: u64,
}

/// One configured validation task
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct TaskConfig {
    pub name: Option<String>,
    pub schematron: Option<PathBuf>,
    pub inputs: Vec<String>,
    pub mode: Option<String>,
    pub phase: Option<String>,
    pub expect_success: Option<bool>,
    pub fail_on_error: Option<bool>,
    pub svrl_dir: Option<PathBuf>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            mode: "schematron".to_string(),
            phase: None,
            expect_success: true,
            fail_on_error: true,
            svrl_dir: None,
            parameters: BTreeMap::new(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_validators: 100,
        }
    }
}

/// Configuration manager for loading and merging configurations
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration with precedence: file -> environment -> CLI
    pub async fn load_config(config_path: Option<&Path>, args: Option<&ValidateArgs>) -> Result<Config> {
        // Start with default configuration
        let mut config = Config::default();

        // Load from configuration file if specified
        if let Some(config_path) = config_path {
            let file_config = Self::load_from_file(config_path).await?;
            config = Self::merge_configs(config, file_config);
        } else {
            // Try to find configuration files in standard locations
            if let Some(found_config) = Self::find_config_file().await? {
                config = Self::merge_configs(config, found_config);
            }
        }

        // Apply environment variable overrides
        config = Self::apply_environment_overrides(config)?;

        // Apply CLI argument overrides (highest precedence)
        if let Some(args) = args {
            config = Self::merge_with_cli(config, args);
        }

        // Validate the final configuration
        Self::validate_config(&config)?;

        Ok(config)
    }

    /// Load configuration from a file (TOML or JSON)
    pub async fn load_from_file(path: &Path) -> Result<Config> {
        let content = tokio::fs::read_to_string(path).await?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => {
                let config: Config = toml::from_str(&content)?;
                Ok(config)
            }
            Some("json") => {
                let config: Config = serde_json::from_str(&content)?;
                Ok(config)
            }
            Some(ext) => Err(ConfigError::UnsupportedFormat(ext.to_string())),
            None => {
                // Try to parse as TOML first, then JSON
                if let Ok(config) = toml::from_str::<Config>(&content) {
                    Ok(config)
                } else {
                    let config: Config = serde_json::from_str(&content)?;
                    Ok(config)
                }
            }
        }
    }

    /// Find configuration file in standard locations
    pub async fn find_config_file() -> Result<Option<Config>> {
        let config_names = [
            "validate-sch.toml",
            "validate-sch.json",
            ".validate-sch.toml",
            ".validate-sch.json",
        ];

        // Check current directory first
        for name in &config_names {
            let path = PathBuf::from(name);
            if path.exists() {
                return Ok(Some(Self::load_from_file(&path).await?));
            }
        }

        // Check user config directory
        if let Some(config_dir) = dirs::config_dir() {
            let app_config_dir = config_dir.join("validate-sch");
            for name in &config_names {
                let path = app_config_dir.join(name);
                if path.exists() {
                    return Ok(Some(Self::load_from_file(&path).await?));
                }
            }
        }

        Ok(None)
    }

    /// Apply environment variable overrides using the system environment
    pub fn apply_environment_overrides(config: Config) -> Result<Config> {
        Self::apply_environment_overrides_with(&SystemEnvProvider, config)
    }

    /// Apply environment variable overrides with a custom environment provider
    pub fn apply_environment_overrides_with(
        env: &impl EnvProvider,
        mut config: Config,
    ) -> Result<Config> {
        // Validation settings
        if let Some(mode) = env.get("VALIDATE_SCH_MODE") {
            config.validation.mode = mode;
        }

        if let Some(phase) = env.get("VALIDATE_SCH_PHASE") {
            config.validation.phase = Some(phase);
        }

        if let Some(expect_success) = env.get("VALIDATE_SCH_EXPECT_SUCCESS") {
            config.validation.expect_success = expect_success.parse().map_err(|_| {
                ConfigError::Environment(format!(
                    "Invalid VALIDATE_SCH_EXPECT_SUCCESS value: {}",
                    expect_success
                ))
            })?;
        }

        if let Some(fail_on_error) = env.get("VALIDATE_SCH_FAIL_ON_ERROR") {
            config.validation.fail_on_error = fail_on_error.parse().map_err(|_| {
                ConfigError::Environment(format!(
                    "Invalid VALIDATE_SCH_FAIL_ON_ERROR value: {}",
                    fail_on_error
                ))
            })?;
        }

        if let Some(svrl_dir) = env.get("VALIDATE_SCH_SVRL_DIR") {
            config.validation.svrl_dir = Some(PathBuf::from(svrl_dir));
        }

        // Debug settings
        if let Some(debug_dir) = env.get("VALIDATE_SCH_DEBUG_DIR") {
            config.debug.save_intermediate = true;
            config.debug.intermediate_dir = Some(PathBuf::from(debug_dir));
        }

        // Catalog settings
        if let Some(base_dir) = env.get("VALIDATE_SCH_CATALOG_BASE_DIR") {
            config.catalog.base_dir = Some(PathBuf::from(base_dir));
        }

        // Cache settings
        if let Some(max_validators) = env.get("VALIDATE_SCH_MAX_VALIDATORS") {
            config.cache.max_validators = max_validators.parse().map_err(|_| {
                ConfigError::Environment(format!(
                    "Invalid VALIDATE_SCH_MAX_VALIDATORS value: {}",
                    max_validators
                ))
            })?;
        }

        Ok(config)
    }

    /// Merge CLI arguments with configuration (CLI takes precedence)
    pub fn merge_with_cli(mut config: Config, args: &ValidateArgs) -> Config {
        // Validation settings
        if let Some(mode) = &args.mode {
            config.validation.mode = mode.clone();
        }
        if args.phase.is_some() {
            config.validation.phase = args.phase.clone();
        }
        if let Some(expect_success) = args.expect_success {
            config.validation.expect_success = expect_success;
        }
        if let Some(fail_on_error) = args.fail_on_error {
            config.validation.fail_on_error = fail_on_error;
        }
        if args.svrl_dir.is_some() {
            config.validation.svrl_dir = args.svrl_dir.clone();
        }
        config
            .validation
            .parameters
            .extend(args.params.iter().cloned());

        // Debug settings
        if args.debug_dir.is_some() {
            config.debug.save_intermediate = true;
            config.debug.intermediate_dir = args.debug_dir.clone();
        }

        // Catalog settings
        config.catalog.entries.extend(
            args.catalog
                .iter()
                .map(|(id, path)| (id.clone(), PathBuf::from(path))),
        );

        config
    }

    /// Merge two configurations (second takes precedence for non-None values)
    pub fn merge_configs(mut base: Config, override_config: Config) -> Config {
        // Validation settings
        base.validation.mode = override_config.validation.mode;
        if override_config.validation.phase.is_some() {
            base.validation.phase = override_config.validation.phase;
        }
        base.validation.expect_success = override_config.validation.expect_success;
        base.validation.fail_on_error = override_config.validation.fail_on_error;
        if override_config.validation.svrl_dir.is_some() {
            base.validation.svrl_dir = override_config.validation.svrl_dir;
        }
        base.validation
            .parameters
            .extend(override_config.validation.parameters);

        // Debug settings
        base.debug.save_intermediate = override_config.debug.save_intermediate;
        if override_config.debug.intermediate_dir.is_some() {
            base.debug.intermediate_dir = override_config.debug.intermediate_dir;
        }

        // Catalog settings
        if override_config.catalog.base_dir.is_some() {
            base.catalog.base_dir = override_config.catalog.base_dir;
        }
        base.catalog.entries.extend(override_config.catalog.entries);

        // Cache settings
        base.cache.max_validators = override_config.cache.max_validators;

        // Tasks
        if !override_config.tasks.is_empty() {
            base.tasks = override_config.tasks;
        }

        base
    }

    /// Validate configuration values
    pub fn validate_config(config: &Config) -> Result<()> {
        // Validate parameters
        if config
            .validation
            .parameters
            .keys()
            .any(|name| name.trim().is_empty())
        {
            return Err(ConfigError::Validation(
                "Parameter names must not be blank".to_string(),
            ));
        }

        // Validate cache settings
        if config.cache.max_validators == 0 {
            return Err(ConfigError::Validation(
                "Validator cache size must be greater than 0".to_string(),
            ));
        }

        // Validate tasks
        for (index, task) in config.tasks.iter().enumerate() {
            if task.inputs.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "Task {} has no inputs",
                    task.name.clone().unwrap_or_else(|| format!("#{}", index + 1))
                )));
            }
        }

        Ok(())
    }

    /// Directory for intermediate files, if they are to be saved
    pub fn get_debug_directory(config: &Config) -> Option<PathBuf> {
        if !config.debug.save_intermediate {
            return None;
        }
        Some(
            config
                .debug
                .intermediate_dir
                .clone()
                .unwrap_or_else(std::env::temp_dir),
        )
    }

    /// Entity resolver built from the catalog section
    pub fn get_entity_resolver(config: &Config) -> CatalogResolver {
        let fallback = match &config.catalog.base_dir {
            Some(base_dir) => DefaultEntityResolver::with_base_dir(base_dir),
            None => DefaultEntityResolver::new(),
        };
        config
            .catalog
            .entries
            .iter()
            .fold(CatalogResolver::new(fallback), |resolver, (id, path)| {
                resolver.with_entry(id.clone(), path.clone())
            })
    }

    /// The tasks to run: the command line task when a Schematron file or inputs were given
    /// (or nothing is configured), the configured tasks otherwise
    pub fn get_tasks(config: &Config, args: &ValidateArgs) -> Vec<TaskSettings> {
        let defaults = &config.validation;
        let parameters: Parameters = defaults.parameters.clone();

        let from_cli = args.schematron.is_some() || !args.inputs.is_empty() || config.tasks.is_empty();
        if from_cli {
            return vec![TaskSettings {
                name: None,
                schematron: args.schematron.clone(),
                mode: defaults.mode.parse().ok(),
                phase: defaults.phase.clone(),
                parameters,
                inputs: args.inputs.clone(),
                svrl_dir: defaults.svrl_dir.clone(),
                policy: OutcomePolicy::new(defaults.expect_success, defaults.fail_on_error),
            }];
        }

        config
            .tasks
            .iter()
            .map(|task| TaskSettings {
                name: task.name.clone(),
                schematron: task.schematron.clone(),
                mode: task.mode.as_deref().unwrap_or(&defaults.mode).parse().ok(),
                phase: task.phase.clone().or_else(|| defaults.phase.clone()),
                parameters: parameters.clone(),
                inputs: task.inputs.clone(),
                svrl_dir: task.svrl_dir.clone().or_else(|| defaults.svrl_dir.clone()),
                policy: OutcomePolicy::new(
                    task.expect_success.unwrap_or(defaults.expect_success),
                    task.fail_on_error.unwrap_or(defaults.fail_on_error),
                ),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProcessingMode;
    use std::collections::HashMap;
    use std::fs;
    use tempfile::TempDir;

    /// Mock environment variable provider for testing
    #[derive(Default)]
    struct MockEnvProvider {
        vars: HashMap<String, String>,
    }

    impl MockEnvProvider {
        fn new() -> Self {
            Self {
                vars: HashMap::new(),
            }
        }

        fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
            self.vars.insert(key.into(), value.into());
        }
    }

    impl EnvProvider for MockEnvProvider {
        fn get(&self, key: &str) -> Option<String> {
            self.vars.get(key).cloned()
        }
    }

    #[tokio::test]
    async fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.validation.mode, "schematron");
        assert!(config.validation.expect_success);
        assert!(config.validation.fail_on_error);
        assert!(config.validation.svrl_dir.is_none());
        assert!(!config.debug.save_intermediate);
        assert!(config.catalog.entries.is_empty());
        assert_eq!(config.cache.max_validators, 100);
        assert!(config.tasks.is_empty());
        assert!(ConfigManager::validate_config(&config).is_ok());
    }

    #[tokio::test]
    async fn test_load_toml_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        let toml_content = r#"
[validation]
mode = "pure"
phase = "basic"
expect_success = false
fail_on_error = false
svrl_dir = "target/svrl"

[validation.parameters]
limit = "10"

[debug]
save_intermediate = true
intermediate_dir = "target/debug-sch"

[catalog]
base_dir = "dtd"

[catalog.entries]
"urn:example:doc.dtd" = "dtd/doc.dtd"

[cache]
max_validators = 5

[[task]]
name = "orders"
schematron = "rules/orders.sch"
inputs = ["data/orders/**/*.xml"]

[[task]]
name = "broken-orders"
schematron = "rules/orders.sch"
inputs = ["data/broken"]
expect_success = false
"#;

        fs::write(&config_path, toml_content).unwrap();

        let config = ConfigManager::load_from_file(&config_path).await.unwrap();

        assert_eq!(config.validation.mode, "pure");
        assert_eq!(config.validation.phase.as_deref(), Some("basic"));
        assert!(!config.validation.expect_success);
        assert!(!config.validation.fail_on_error);
        assert_eq!(config.validation.svrl_dir, Some(PathBuf::from("target/svrl")));
        assert_eq!(config.validation.parameters["limit"], "10");

        assert!(config.debug.save_intermediate);
        assert_eq!(
            ConfigManager::get_debug_directory(&config),
            Some(PathBuf::from("target/debug-sch"))
        );

        assert_eq!(config.catalog.base_dir, Some(PathBuf::from("dtd")));
        assert_eq!(
            config.catalog.entries["urn:example:doc.dtd"],
            PathBuf::from("dtd/doc.dtd")
        );
        assert_eq!(config.cache.max_validators, 5);

        assert_eq!(config.tasks.len(), 2);
        assert_eq!(config.tasks[1].expect_success, Some(false));
        assert_eq!(ConfigManager::get_entity_resolver(&config).len(), 1);
    }

    #[tokio::test]
    async fn test_load_json_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.json");

        let json_content = r#"{
  "validation": {
    "mode": "xslt",
    "fail_on_error": false
  },
  "cache": {
    "max_validators": 20
  },
  "task": [
    { "schematron": "rules.validator.xml", "inputs": ["in"] }
  ]
}"#;

        fs::write(&config_path, json_content).unwrap();

        let config = ConfigManager::load_from_file(&config_path).await.unwrap();
        assert_eq!(config.validation.mode, "xslt");
        assert!(config.validation.expect_success);
        assert!(!config.validation.fail_on_error);
        assert_eq!(config.cache.max_validators, 20);
        assert_eq!(config.tasks[0].inputs, vec!["in"]);
    }

    #[tokio::test]
    async fn test_unsupported_format() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        fs::write(&config_path, "validation: {}").unwrap();

        let result = ConfigManager::load_from_file(&config_path).await;
        assert!(matches!(result, Err(ConfigError::UnsupportedFormat(ext)) if ext == "yaml"));
    }

    #[test]
    fn test_environment_overrides() {
        let mut env = MockEnvProvider::new();
        env.set("VALIDATE_SCH_MODE", "pure");
        env.set("VALIDATE_SCH_PHASE", "strict");
        env.set("VALIDATE_SCH_EXPECT_SUCCESS", "false");
        env.set("VALIDATE_SCH_FAIL_ON_ERROR", "false");
        env.set("VALIDATE_SCH_SVRL_DIR", "/tmp/svrl");
        env.set("VALIDATE_SCH_DEBUG_DIR", "/tmp/debug");
        env.set("VALIDATE_SCH_MAX_VALIDATORS", "7");

        let config =
            ConfigManager::apply_environment_overrides_with(&env, Config::default()).unwrap();

        assert_eq!(config.validation.mode, "pure");
        assert_eq!(config.validation.phase.as_deref(), Some("strict"));
        assert!(!config.validation.expect_success);
        assert!(!config.validation.fail_on_error);
        assert_eq!(config.validation.svrl_dir, Some(PathBuf::from("/tmp/svrl")));
        assert_eq!(
            ConfigManager::get_debug_directory(&config),
            Some(PathBuf::from("/tmp/debug"))
        );
        assert_eq!(config.cache.max_validators, 7);
    }

    #[test]
    fn test_invalid_environment_value() {
        let mut env = MockEnvProvider::new();
        env.set("VALIDATE_SCH_FAIL_ON_ERROR", "sometimes");

        let result = ConfigManager::apply_environment_overrides_with(&env, Config::default());
        assert!(matches!(result, Err(ConfigError::Environment(_))));
    }

    #[test]
    fn test_cli_takes_precedence() {
        let mut config = Config::default();
        config.validation.mode = "pure".to_string();
        config.validation.parameters.insert("limit".to_string(), "1".to_string());

        let args = ValidateArgs {
            mode: Some("xslt".to_string()),
            expect_success: Some(false),
            params: vec![("limit".to_string(), "2".to_string())],
            catalog: vec![("urn:a".to_string(), "a.dtd".to_string())],
            debug_dir: Some(PathBuf::from("dbg")),
            ..ValidateArgs::default()
        };

        let merged = ConfigManager::merge_with_cli(config, &args);
        assert_eq!(merged.validation.mode, "xslt");
        assert!(!merged.validation.expect_success);
        assert!(merged.validation.fail_on_error);
        assert_eq!(merged.validation.parameters["limit"], "2");
        assert_eq!(merged.catalog.entries.len(), 1);
        assert_eq!(ConfigManager::get_debug_directory(&merged), Some(PathBuf::from("dbg")));
    }

    #[test]
    fn test_validate_config_rejections() {
        let mut config = Config::default();
        config.cache.max_validators = 0;
        assert!(ConfigManager::validate_config(&config).is_err());

        let mut config = Config::default();
        config.validation.parameters.insert(" ".to_string(), "x".to_string());
        assert!(ConfigManager::validate_config(&config).is_err());

        let mut config = Config::default();
        config.tasks.push(TaskConfig {
            name: Some("empty".to_string()),
            ..TaskConfig::default()
        });
        let error = ConfigManager::validate_config(&config).unwrap_err();
        assert!(error.to_string().contains("empty"));
    }

    #[test]
    fn test_tasks_from_cli_and_config() {
        let mut config = Config::default();
        config.validation.expect_success = false;
        config.tasks.push(TaskConfig {
            name: Some("configured".to_string()),
            schematron: Some(PathBuf::from("a.sch")),
            inputs: vec!["in".to_string()],
            mode: Some("pure".to_string()),
            expect_success: Some(true),
            ..TaskConfig::default()
        });

        let tasks = ConfigManager::get_tasks(&config, &ValidateArgs::default());
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].label(), "configured");
        assert_eq!(tasks[0].mode, Some(ProcessingMode::Direct));
        assert!(tasks[0].policy.expect_success);

        let args = ValidateArgs {
            schematron: Some(PathBuf::from("b.sch")),
            inputs: vec!["x.xml".to_string()],
            mode: Some("saxon".to_string()),
            ..ValidateArgs::default()
        };
        let config = ConfigManager::merge_with_cli(config, &args);
        let tasks = ConfigManager::get_tasks(&config, &args);
        assert_eq!(tasks[0].schematron, Some(PathBuf::from("b.sch")));
        assert_eq!(tasks[0].mode, None);
        assert!(!tasks[0].policy.expect_success);
    }
}
