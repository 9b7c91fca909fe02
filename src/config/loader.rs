//! Configuration Loader
//!
//! Environment-aware loading: `studio-config.yaml` supplies the base values,
//! a top-level section named after the environment (`development`, `test`,
//! `production`) is merged over them, and `STUDIO__<SECTION>__<FIELD>`
//! environment variables are applied last.

use super::error::{ConfigResult, ConfigurationError};
use super::StudioConfig;
use crate::logging::get_environment;
use crate::state_machine::WorkflowCatalog;
use config::{Config, Environment, File, FileFormat};
use serde_yaml::Value as YamlValue;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const CONFIG_FILE_NAMES: [&str; 2] = ["studio-config.yaml", "studio-config.yml"];
const ENVIRONMENTS: [&str; 3] = ["development", "test", "production"];
const MAX_CONFIG_FILE_SIZE: u64 = 10 * 1024 * 1024;

pub struct ConfigManager {
    config: StudioConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration with an explicit environment, leaving process
    /// environment detection out of the picture
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(|| PathBuf::from("config"));
        debug!(
            environment = %environment,
            directory = %config_directory.display(),
            "Loading studio configuration"
        );

        let merged = match Self::find_config_file(&config_directory) {
            Some(path) => Self::load_and_merge_yaml(&path, environment)?,
            None => {
                debug!(directory = %config_directory.display(), "No configuration file found, using defaults");
                String::new()
            }
        };

        let config: StudioConfig = Config::builder()
            .add_source(File::from_str(&merged, FileFormat::Yaml))
            .add_source(
                Environment::with_prefix("STUDIO")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;

        info!(
            environment = %environment,
            max_concurrent_tasks = config.executor.max_concurrent_tasks,
            default_workflow = %config.workflow.default_workflow,
            "⚙️ Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    pub fn config(&self) -> &StudioConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// Resolve a path relative to the configuration directory
    pub fn resolve_path<P: AsRef<Path>>(&self, relative_path: P) -> PathBuf {
        let path = relative_path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.config_directory.join(path)
        }
    }

    /// Workflow catalog named by `workflow.definitions_path`, or the built-in one
    pub fn load_workflow_catalog(&self) -> ConfigResult<WorkflowCatalog> {
        let catalog = match &self.config.workflow.definitions_path {
            Some(relative) => {
                let path = self.resolve_path(relative);
                WorkflowCatalog::from_path(&path)
                    .map_err(|source| ConfigurationError::Workflow { path, source })?
            }
            None => WorkflowCatalog::builtin(),
        };
        let default_workflow = &self.config.workflow.default_workflow;
        if !catalog.contains(default_workflow) {
            return Err(ConfigurationError::invalid_value(
                "workflow.default_workflow",
                default_workflow,
                format!("not defined; available workflows: {:?}", catalog.names()),
            ));
        }
        Ok(catalog)
    }

    fn detect_environment() -> String {
        get_environment().to_lowercase()
    }

    fn find_config_file(config_directory: &Path) -> Option<PathBuf> {
        CONFIG_FILE_NAMES
            .iter()
            .map(|name| config_directory.join(name))
            .find(|path| path.is_file())
    }

    fn read_config_file_safely(path: &Path) -> ConfigResult<String> {
        let metadata = std::fs::metadata(path)
            .map_err(|e| ConfigurationError::file_read_error(path.display().to_string(), e))?;
        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigurationError::invalid_value(
                "file_size",
                metadata.len(),
                format!(
                    "Configuration file too large ({}MB > {}MB limit)",
                    metadata.len() / (1024 * 1024),
                    MAX_CONFIG_FILE_SIZE / (1024 * 1024)
                ),
            ));
        }
        std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::file_read_error(path.display().to_string(), e))
    }

    /// Base document with the environment section folded in, as YAML text
    fn load_and_merge_yaml(path: &Path, environment: &str) -> ConfigResult<String> {
        let file_path = path.display().to_string();
        let content = Self::read_config_file_safely(path)?;
        let mut yaml: YamlValue = serde_yaml::from_str(&content)
            .map_err(|e| ConfigurationError::invalid_yaml(&file_path, e))?;
        if yaml.is_null() {
            return Ok(String::new());
        }

        if let Some(overrides) = yaml.get(environment).cloned() {
            debug!(environment = %environment, "Applying environment-specific overrides");
            Self::merge_yaml_values(&mut yaml, overrides);
        }
        if let YamlValue::Mapping(map) = &mut yaml {
            for name in ENVIRONMENTS {
                map.remove(name);
            }
        }

        serde_yaml::to_string(&yaml).map_err(|e| ConfigurationError::invalid_yaml(&file_path, e))
    }

    fn merge_yaml_values(base: &mut YamlValue, override_value: YamlValue) {
        match (base, override_value) {
            (YamlValue::Mapping(base_map), YamlValue::Mapping(override_map)) => {
                for (key, value) in override_map {
                    match base_map.get_mut(&key) {
                        Some(existing) => Self::merge_yaml_values(existing, value),
                        None => {
                            base_map.insert(key, value);
                        }
                    }
                }
            }
            (base_ref, override_val) => *base_ref = override_val,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::fs;
    use tempfile::TempDir;

    const TEST_CONFIG: &str = r#"
executor:
  max_concurrent_tasks: 8
  checkpoint_interval: 3
resources:
  cpu: 40
  custom:
    gpu: 2
workflow:
  max_transitions: 30

test:
  executor:
    max_concurrent_tasks: 2
  workflow:
    crew_timeout_seconds: 5

production:
  resources:
    cpu: 400
"#;

    fn setup_config_dir(contents: &str) -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("studio-config.yaml"), contents).unwrap();
        dir
    }

    #[test]
    fn test_environment_sections_override_base() {
        let dir = setup_config_dir(TEST_CONFIG);

        let manager =
            ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test").unwrap();
        let config = manager.config();
        assert_eq!(manager.environment(), "test");
        assert_eq!(config.executor.max_concurrent_tasks, 2);
        assert_eq!(config.executor.checkpoint_interval, 3);
        assert_eq!(config.workflow.crew_timeout_seconds, 5);
        assert_eq!(config.workflow.max_transitions, 30);
        assert_eq!(config.resources.cpu, 40);
        assert_eq!(config.resources.custom.get("gpu"), Some(&2));

        let manager =
            ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "production")
                .unwrap();
        assert_eq!(manager.config().resources.cpu, 400);
        assert_eq!(manager.config().executor.max_concurrent_tasks, 8);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let manager =
            ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "development")
                .unwrap();
        assert_eq!(manager.config().executor, StudioConfig::default().executor);
        assert_eq!(manager.config().workflow, StudioConfig::default().workflow);
    }

    #[test]
    fn test_invalid_yaml_reported_with_path() {
        let dir = setup_config_dir("executor: [unterminated");
        let result = ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test");
        assert!(matches!(result, Err(ConfigurationError::InvalidYaml { .. })));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let dir = setup_config_dir("retry:\n  jitter_factor: 3.0\n");
        let result = ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test");
        assert!(matches!(result, Err(ConfigurationError::InvalidValue { .. })));
    }

    #[test]
    fn test_environment_variable_override() {
        let dir = setup_config_dir(TEST_CONFIG);
        env::set_var("STUDIO__PERSISTENCE__BACKUP_RETENTION", "7");
        let manager =
            ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test").unwrap();
        env::remove_var("STUDIO__PERSISTENCE__BACKUP_RETENTION");
        assert_eq!(manager.config().persistence.backup_retention, 7);
    }

    #[test]
    fn test_workflow_catalog_loading() {
        let dir = setup_config_dir("workflow:\n  definitions_path: workflows.yaml\n  default_workflow: lean\n");
        fs::write(
            dir.path().join("workflows.yaml"),
            "lean:\n  sequence:\n    - state: PROTOTYPE\n      crew: BuilderCrew\n",
        )
        .unwrap();
        let manager =
            ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test").unwrap();
        let catalog = manager.load_workflow_catalog().unwrap();
        assert_eq!(catalog.names(), vec!["lean"]);

        let manager = ConfigManager::load_from_directory_with_env(
            Some(TempDir::new().unwrap().path().to_path_buf()),
            "test",
        )
        .unwrap();
        assert!(manager.load_workflow_catalog().unwrap().contains(crate::constants::DEFAULT_WORKFLOW));
    }

    #[test]
    fn test_shipped_configuration_loads() {
        let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config");
        let manager = ConfigManager::load_from_directory_with_env(Some(dir), "production").unwrap();
        assert_eq!(manager.config().executor.max_concurrent_tasks, 32);
        assert_eq!(manager.config().workflow.crew_timeout_seconds, 900);

        let catalog = manager.load_workflow_catalog().unwrap();
        assert_eq!(
            catalog.names(),
            vec!["default_software_build", "product_launch", "rapid_prototype"]
        );
    }

    #[test]
    fn test_unknown_default_workflow_rejected() {
        let dir = setup_config_dir("workflow:\n  default_workflow: nonexistent\n");
        let manager =
            ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test").unwrap();
        assert!(matches!(
            manager.load_workflow_catalog(),
            Err(ConfigurationError::InvalidValue { .. })
        ));
    }
}
