//! One entry point per test operation.
//!
//! The facade resolves the testbed layout once, then for each call builds
//! the spawn request, opens a session and runs the matching scenario. A
//! failure to open the transcript or launch the child comes back as
//! [`OperationReport::SpawnFailed`]; timeouts and failed scenarios are errors.

use crate::config::AppConfig;
use crate::errors::DriverError;
use crate::logging::JsonlLogger;
use crate::runtime::{FileSystem, PtySpawner, SpawnRequest};
use crate::scenario::{self, Scenario, ScenarioResult};
use crate::session::{Session, SessionOptions};
use crate::testbed::{read_target, InstallerLayout};
use crate::types::{Credentials, InstallerScript, Operation};
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub const UI_TESTS_LOG: &str = "ngc_tests.log";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum OperationReport {
    Completed,
    SpawnFailed { message: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Passes `--force` to `install.sh`.
    pub force: bool,
    /// Selects the extension-registration variant where a plugin URL was
    /// configured, so the installer fails before logging into the appliance.
    pub with_url: bool,
}

pub struct Driver {
    config: AppConfig,
    layout: InstallerLayout,
    spawner: Arc<dyn PtySpawner>,
    logger: JsonlLogger,
}

impl Driver {
    pub fn new(
        config: AppConfig,
        fs: &dyn FileSystem,
        spawner: Arc<dyn PtySpawner>,
    ) -> Result<Self, DriverError> {
        let target = read_target(fs, &config.paths.testbed_information)?;
        let layout = InstallerLayout::resolve(&config.paths.repo_root, target);
        fs.create_dir_all(&config.paths.log_dir)?;

        let mut logger = JsonlLogger::new(config.events_path());
        logger.max_payload_bytes = config.logging.max_payload_bytes;
        logger.budget_bytes = config.logging.budget_bytes;
        logger.info(
            "testbed_resolved",
            json!({
                "target": target.as_str(),
                "installer_dir": layout.installer_dir,
                "ui_tests_dir": layout.ui_tests_dir,
            }),
        )?;

        Ok(Self {
            config,
            layout,
            spawner,
            logger,
        })
    }

    pub fn run(
        &self,
        operation: Operation,
        credentials: &Credentials,
        options: RunOptions,
    ) -> Result<OperationReport, DriverError> {
        match operation {
            Operation::Install => self.install(credentials, options.force),
            Operation::InstallWithoutBash => self.install_without_bash(credentials),
            Operation::InstallFailsWrongVcenterIp => {
                self.install_fails_for_wrong_vcenter_ip(credentials)
            }
            Operation::InstallFailsAtExtensionReg => {
                self.install_fails_at_extension_reg(credentials, !options.with_url)
            }
            Operation::Uninstall => self.uninstall(credentials),
            Operation::UninstallFails => self.uninstall_fails(credentials),
            Operation::NgcTests => self.run_ngc_tests(credentials),
            Operation::HsuiaTests => self.run_hsuia_tests(),
        }
    }

    pub fn install(
        &self,
        credentials: &Credentials,
        force: bool,
    ) -> Result<OperationReport, DriverError> {
        let args = if force {
            vec!["--force".to_string()]
        } else {
            Vec::new()
        };
        self.run_installer(InstallerScript::Install, args, scenario::install()?, credentials)
    }

    pub fn install_without_bash(
        &self,
        credentials: &Credentials,
    ) -> Result<OperationReport, DriverError> {
        self.run_installer(
            InstallerScript::Install,
            Vec::new(),
            scenario::install_without_bash()?,
            credentials,
        )
    }

    pub fn install_fails_for_wrong_vcenter_ip(
        &self,
        credentials: &Credentials,
    ) -> Result<OperationReport, DriverError> {
        self.run_installer(
            InstallerScript::Install,
            Vec::new(),
            scenario::install_fails_for_wrong_vcenter_ip()?,
            credentials,
        )
    }

    pub fn install_fails_at_extension_reg(
        &self,
        credentials: &Credentials,
        no_url: bool,
    ) -> Result<OperationReport, DriverError> {
        self.run_installer(
            InstallerScript::Install,
            Vec::new(),
            scenario::install_fails_at_extension_reg(no_url)?,
            credentials,
        )
    }

    pub fn uninstall(&self, credentials: &Credentials) -> Result<OperationReport, DriverError> {
        self.run_installer(
            InstallerScript::Uninstall,
            Vec::new(),
            scenario::uninstall()?,
            credentials,
        )
    }

    pub fn uninstall_fails(
        &self,
        credentials: &Credentials,
    ) -> Result<OperationReport, DriverError> {
        self.run_installer(
            InstallerScript::Uninstall,
            Vec::new(),
            scenario::uninstall_fails()?,
            credentials,
        )
    }

    pub fn run_ngc_tests(
        &self,
        credentials: &Credentials,
    ) -> Result<OperationReport, DriverError> {
        let request = SpawnRequest {
            program: PathBuf::from(&self.config.test_suite.program),
            args: vec!["test".to_string()],
            cwd: self.layout.ui_tests_dir.clone(),
            env: vec![
                (
                    "VC_ADMIN_USERNAME".to_string(),
                    credentials.vcenter_user.clone(),
                ),
                (
                    "VC_ADMIN_PASSWORD".to_string(),
                    credentials.vcenter_password.clone(),
                ),
            ],
        };
        self.execute(
            request,
            UI_TESTS_LOG,
            self.config.test_suite_timeout(),
            &scenario::run_to_completion(Operation::NgcTests.as_str()),
            credentials,
        )
    }

    pub fn run_hsuia_tests(&self) -> Result<OperationReport, DriverError> {
        let request = SpawnRequest {
            program: PathBuf::from(&self.config.test_suite.program),
            args: vec![
                "clean".to_string(),
                "compile".to_string(),
                "exec:exec".to_string(),
                "-e".to_string(),
                format!("-Dhsuia.runlist={}", self.config.test_suite.hsuia_runlist),
            ],
            cwd: self.layout.ui_tests_dir.clone(),
            env: Vec::new(),
        };
        let credentials = Credentials::new("", "");
        self.execute(
            request,
            UI_TESTS_LOG,
            self.config.test_suite_timeout(),
            &scenario::run_to_completion(Operation::HsuiaTests.as_str()),
            &credentials,
        )
    }

    fn run_installer(
        &self,
        script: InstallerScript,
        args: Vec<String>,
        scenario: Scenario,
        credentials: &Credentials,
    ) -> Result<OperationReport, DriverError> {
        if scenario.needs_root_password() && credentials.root_password.is_none() {
            return Err(DriverError::InvalidConfig(format!(
                "{} requires a root password",
                scenario.name
            )));
        }
        let request = SpawnRequest {
            program: self.layout.script(script),
            args,
            cwd: self.layout.installer_dir.clone(),
            env: Vec::new(),
        };
        self.execute(
            request,
            script.log_name(),
            self.config.interactive_timeout(),
            &scenario,
            credentials,
        )
    }

    fn execute(
        &self,
        request: SpawnRequest,
        log_name: &str,
        timeout: Duration,
        scenario: &Scenario,
        credentials: &Credentials,
    ) -> Result<OperationReport, DriverError> {
        let log_path = self.config.paths.log_dir.join(log_name);
        let logger = self.logger.keeping(&log_path);
        let options = SessionOptions {
            name: scenario.name.clone(),
            request,
            log_path,
            timeout,
        };
        let mut session = match Session::spawn(self.spawner.as_ref(), options, &logger) {
            Ok(session) => session,
            Err(err) if err.is_spawn_failure() => {
                let message = format!("Error: {}", err.reason());
                log_finished(&logger, scenario, "spawn_failed", &message)?;
                return Ok(OperationReport::SpawnFailed { message });
            }
            Err(err) => return Err(err),
        };

        let outcome = scenario.run(&mut session, credentials);
        let closed = session.close();

        match outcome {
            Ok(ScenarioResult::Passed) => {
                closed?;
                log_finished(&logger, scenario, "passed", "")?;
                Ok(OperationReport::Completed)
            }
            Ok(ScenarioResult::Failed { message }) => {
                log_finished(&logger, scenario, "failed", &message)?;
                Err(DriverError::ScenarioFailed {
                    scenario: scenario.name.clone(),
                    message,
                })
            }
            Err(err) => {
                log_finished(&logger, scenario, "error", &err.to_string())?;
                Err(err)
            }
        }
    }
}

fn log_finished(
    logger: &JsonlLogger,
    scenario: &Scenario,
    outcome: &str,
    message: &str,
) -> Result<(), DriverError> {
    let payload = json!({
        "scenario": scenario.name,
        "outcome": outcome,
        "message": message,
    });
    if outcome == "passed" {
        logger.info("scenario_finished", payload)
    } else {
        logger.error("scenario_finished", payload)
    }
}
