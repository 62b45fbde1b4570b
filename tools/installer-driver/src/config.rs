use crate::errors::DriverError;
use crate::images::Environment;
use crate::runtime::FileSystem;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config_path: Option<PathBuf>,
    pub repo_root: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
    pub testbed_information: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppConfig {
    pub paths: PathsConfig,
    pub timeouts: TimeoutsConfig,
    pub test_suite: TestSuiteConfig,
    pub images: ImagesConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PathsConfig {
    pub repo_root: PathBuf,
    pub testbed_information: PathBuf,
    pub log_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeoutsConfig {
    pub interactive_seconds: u64,
    pub test_suite_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TestSuiteConfig {
    pub program: String,
    pub hsuia_runlist: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImagesConfig {
    pub environment: Environment,
    pub mirror_registry: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    pub events_file: String,
    pub max_payload_bytes: usize,
    pub budget_bytes: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            paths: PathsConfig {
                repo_root: PathBuf::from("."),
                testbed_information: PathBuf::from("testbed-information"),
                log_dir: PathBuf::from("."),
            },
            timeouts: TimeoutsConfig {
                interactive_seconds: 180,
                test_suite_seconds: 1800,
            },
            test_suite: TestSuiteConfig {
                program: "mvn".to_string(),
                hsuia_runlist: "work/runlists/default.runlist".to_string(),
            },
            images: ImagesConfig {
                environment: Environment::Public,
                mirror_registry: None,
            },
            logging: LoggingConfig {
                events_file: "driver-events.jsonl".to_string(),
                max_payload_bytes: 4096,
                budget_bytes: 50 * 1024 * 1024,
            },
        }
    }
}

impl AppConfig {
    pub fn interactive_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.interactive_seconds)
    }

    pub fn test_suite_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.test_suite_seconds)
    }

    pub fn events_path(&self) -> PathBuf {
        self.paths.log_dir.join(&self.logging.events_file)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialAppConfig {
    paths: Option<PartialPathsConfig>,
    timeouts: Option<PartialTimeoutsConfig>,
    test_suite: Option<PartialTestSuiteConfig>,
    images: Option<PartialImagesConfig>,
    logging: Option<PartialLoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialPathsConfig {
    repo_root: Option<PathBuf>,
    testbed_information: Option<PathBuf>,
    log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialTimeoutsConfig {
    interactive_seconds: Option<u64>,
    test_suite_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialTestSuiteConfig {
    program: Option<String>,
    hsuia_runlist: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialImagesConfig {
    environment: Option<Environment>,
    mirror_registry: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialLoggingConfig {
    events_file: Option<String>,
    max_payload_bytes: Option<usize>,
    budget_bytes: Option<u64>,
}

pub fn load_config(
    overrides: &CliOverrides,
    process_cwd: &Path,
    fs: &dyn FileSystem,
) -> Result<AppConfig, DriverError> {
    let mut cfg = AppConfig::default();

    if let Some(path) = &overrides.config_path {
        let file_contents = fs.read_to_string(&absolutize_path(process_cwd, path))?;
        let partial: PartialAppConfig = toml::from_str(&file_contents)
            .map_err(|e| DriverError::ConfigParse(e.to_string()))?;
        merge_partial_config(&mut cfg, partial);
    }

    apply_cli_overrides(&mut cfg, overrides);
    resolve_paths(&mut cfg, process_cwd);
    validate_config(&cfg)?;
    Ok(cfg)
}

fn merge_partial_config(cfg: &mut AppConfig, partial: PartialAppConfig) {
    if let Some(paths) = partial.paths {
        if let Some(value) = paths.repo_root {
            cfg.paths.repo_root = value;
        }
        if let Some(value) = paths.testbed_information {
            cfg.paths.testbed_information = value;
        }
        if let Some(value) = paths.log_dir {
            cfg.paths.log_dir = value;
        }
    }

    if let Some(timeouts) = partial.timeouts {
        if let Some(value) = timeouts.interactive_seconds {
            cfg.timeouts.interactive_seconds = value;
        }
        if let Some(value) = timeouts.test_suite_seconds {
            cfg.timeouts.test_suite_seconds = value;
        }
    }

    if let Some(test_suite) = partial.test_suite {
        if let Some(value) = test_suite.program {
            cfg.test_suite.program = value;
        }
        if let Some(value) = test_suite.hsuia_runlist {
            cfg.test_suite.hsuia_runlist = value;
        }
    }

    if let Some(images) = partial.images {
        if let Some(value) = images.environment {
            cfg.images.environment = value;
        }
        if let Some(value) = images.mirror_registry {
            cfg.images.mirror_registry = Some(value);
        }
    }

    if let Some(logging) = partial.logging {
        if let Some(value) = logging.events_file {
            cfg.logging.events_file = value;
        }
        if let Some(value) = logging.max_payload_bytes {
            cfg.logging.max_payload_bytes = value;
        }
        if let Some(value) = logging.budget_bytes {
            cfg.logging.budget_bytes = value;
        }
    }
}

fn apply_cli_overrides(cfg: &mut AppConfig, overrides: &CliOverrides) {
    if let Some(path) = &overrides.repo_root {
        cfg.paths.repo_root = path.clone();
    }
    if let Some(path) = &overrides.log_dir {
        cfg.paths.log_dir = path.clone();
    }
    if let Some(path) = &overrides.testbed_information {
        cfg.paths.testbed_information = path.clone();
    }
}

fn resolve_paths(cfg: &mut AppConfig, process_cwd: &Path) {
    cfg.paths.repo_root = absolutize_path(process_cwd, &cfg.paths.repo_root);
    cfg.paths.testbed_information = absolutize_path(process_cwd, &cfg.paths.testbed_information);
    cfg.paths.log_dir = absolutize_path(process_cwd, &cfg.paths.log_dir);
}

fn absolutize_path(base: &Path, value: &Path) -> PathBuf {
    if value.is_absolute() {
        value.to_path_buf()
    } else {
        base.join(value)
    }
}

fn validate_config(cfg: &AppConfig) -> Result<(), DriverError> {
    if cfg.timeouts.interactive_seconds == 0 || cfg.timeouts.test_suite_seconds == 0 {
        return Err(DriverError::InvalidConfig(
            "timeouts must be greater than zero".to_string(),
        ));
    }

    if cfg.test_suite.program.trim().is_empty() {
        return Err(DriverError::InvalidConfig(
            "test_suite.program must not be empty".to_string(),
        ));
    }

    if cfg.logging.events_file.trim().is_empty() {
        return Err(DriverError::InvalidConfig(
            "logging.events_file must not be empty".to_string(),
        ));
    }

    let has_registry = matches!(
        cfg.images.mirror_registry.as_deref(),
        Some(host) if !host.trim().is_empty()
    );
    if cfg.images.environment == Environment::Mirror && !has_registry {
        return Err(DriverError::InvalidConfig(
            "images.mirror_registry is required when images.environment = \"mirror\"".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{load_config, CliOverrides};
    use crate::errors::DriverError;
    use crate::images::Environment;
    use crate::runtime::FakeFileSystem;
    use std::path::{Path, PathBuf};

    fn with_config(contents: &str) -> (FakeFileSystem, CliOverrides) {
        let fs = FakeFileSystem::with_file("/work/driver.toml", contents);
        let overrides = CliOverrides {
            config_path: Some(PathBuf::from("driver.toml")),
            ..CliOverrides::default()
        };
        (fs, overrides)
    }

    #[test]
    fn defaults_resolve_against_process_cwd() {
        let fs = FakeFileSystem::default();
        let cfg = load_config(&CliOverrides::default(), Path::new("/work"), &fs).expect("config");
        assert_eq!(cfg.paths.repo_root, PathBuf::from("/work/."));
        assert_eq!(
            cfg.paths.testbed_information,
            PathBuf::from("/work/testbed-information")
        );
        assert_eq!(cfg.interactive_timeout().as_secs(), 180);
        assert_eq!(cfg.test_suite_timeout().as_secs(), 1800);
        assert_eq!(cfg.test_suite.program, "mvn");
        assert_eq!(cfg.events_path(), PathBuf::from("/work/./driver-events.jsonl"));
    }

    #[test]
    fn file_values_merge_over_defaults_and_cli_wins() {
        let (fs, mut overrides) = with_config(
            r#"
[paths]
repo_root = "/src/vic"
log_dir = "logs"

[timeouts]
interactive_seconds = 30

[images]
environment = "mirror"
mirror_registry = "harbor.ci.local"
"#,
        );
        overrides.log_dir = Some(PathBuf::from("/tmp/override"));

        let cfg = load_config(&overrides, Path::new("/work"), &fs).expect("config");
        assert_eq!(cfg.paths.repo_root, PathBuf::from("/src/vic"));
        assert_eq!(cfg.paths.log_dir, PathBuf::from("/tmp/override"));
        assert_eq!(cfg.timeouts.interactive_seconds, 30);
        assert_eq!(cfg.timeouts.test_suite_seconds, 1800);
        assert_eq!(cfg.images.environment, Environment::Mirror);
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let (fs, overrides) = with_config("[timeouts]\ntest_suite_seconds = 0\n");
        let err = load_config(&overrides, Path::new("/work"), &fs).expect_err("invalid");
        assert!(matches!(err, DriverError::InvalidConfig(_)));
    }

    #[test]
    fn mirror_without_registry_is_rejected() {
        let (fs, overrides) = with_config("[images]\nenvironment = \"mirror\"\n");
        let err = load_config(&overrides, Path::new("/work"), &fs).expect_err("invalid");
        assert!(err.to_string().contains("mirror_registry"));
    }

    #[test]
    fn unknown_sections_and_bad_toml_are_parse_errors() {
        for contents in ["[orchestrator]\nparallelism = 3\n", "[paths\n"] {
            let (fs, overrides) = with_config(contents);
            let err = load_config(&overrides, Path::new("/work"), &fs).expect_err("parse");
            assert!(matches!(err, DriverError::ConfigParse(_)), "{contents}");
        }
    }
}
