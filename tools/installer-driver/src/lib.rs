pub mod config;
pub mod driver;
pub mod errors;
pub mod images;
pub mod log_retention;
pub mod logging;
pub mod matcher;
pub mod runtime;
pub mod scenario;
pub mod session;
pub mod testbed;
pub mod types;

use clap::{error::ErrorKind, Parser, ValueEnum};
use config::{load_config, CliOverrides};
use driver::{Driver, OperationReport, RunOptions};
use errors::DriverError;
use logging::summary_line;
use runtime::ProductionRuntime;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use testbed::{read_target, InstallerLayout};
use types::{Credentials, Operation};

pub const VCENTER_PASSWORD_ENV: &str = "VCENTER_PASSWORD";
pub const ROOT_PASSWORD_ENV: &str = "ROOT_PASSWORD";

#[derive(Debug, Clone, Parser)]
#[command(name = "installer-driver")]
#[command(about = "Drives the VIC UI installer scripts and UI test suites through a pty")]
pub struct Cli {
    #[arg(long, value_enum)]
    pub operation: Option<CliOperation>,
    #[arg(long)]
    pub vcenter_user: Option<String>,
    /// Falls back to $VCENTER_PASSWORD.
    #[arg(long)]
    pub vcenter_password: Option<String>,
    /// Falls back to $ROOT_PASSWORD.
    #[arg(long)]
    pub root_password: Option<String>,
    #[arg(long, default_value_t = false)]
    pub force: bool,
    #[arg(long, default_value_t = false)]
    pub with_url: bool,
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub repo_root: Option<PathBuf>,
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
    #[arg(long)]
    pub testbed_information: Option<PathBuf>,
    #[arg(long, default_value_t = false)]
    pub list_images: bool,
    #[arg(long, default_value_t = false)]
    pub show_layout: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum CliOperation {
    Install,
    InstallWithoutBash,
    InstallFailsWrongVcenterIp,
    InstallFailsAtExtensionReg,
    Uninstall,
    UninstallFails,
    NgcTests,
    HsuiaTests,
}

impl From<CliOperation> for Operation {
    fn from(value: CliOperation) -> Self {
        match value {
            CliOperation::Install => Operation::Install,
            CliOperation::InstallWithoutBash => Operation::InstallWithoutBash,
            CliOperation::InstallFailsWrongVcenterIp => Operation::InstallFailsWrongVcenterIp,
            CliOperation::InstallFailsAtExtensionReg => Operation::InstallFailsAtExtensionReg,
            CliOperation::Uninstall => Operation::Uninstall,
            CliOperation::UninstallFails => Operation::UninstallFails,
            CliOperation::NgcTests => Operation::NgcTests,
            CliOperation::HsuiaTests => Operation::HsuiaTests,
        }
    }
}

pub fn run() -> Result<i32, DriverError> {
    let args = std::env::args_os().collect::<Vec<_>>();
    let env = std::env::vars_os().collect::<Vec<_>>();
    let cwd = std::env::current_dir().map_err(|e| DriverError::Io(e.to_string()))?;
    let runtime = ProductionRuntime::new();
    run_with_runtime(&args, &env, &cwd, &runtime)
}

pub fn run_with_runtime(
    args: &[OsString],
    env: &[(OsString, OsString)],
    cwd: &Path,
    runtime: &ProductionRuntime,
) -> Result<i32, DriverError> {
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => match error.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                print!("{error}");
                return Ok(0);
            }
            _ => return Err(DriverError::Cli(error.to_string())),
        },
    };

    let overrides = CliOverrides {
        config_path: cli.config.clone(),
        repo_root: cli.repo_root.clone(),
        log_dir: cli.log_dir.clone(),
        testbed_information: cli.testbed_information.clone(),
    };
    let cfg = load_config(&overrides, cwd, runtime.file_system.as_ref())?;

    if cli.list_images {
        let registry = cfg.images.mirror_registry.as_deref();
        let images = images::catalog(cfg.images.environment, registry)?;
        for (image, path) in images {
            runtime
                .terminal
                .write_line(&format!("{}={path}", image.repository()))?;
        }
        return Ok(0);
    }

    if cli.show_layout {
        let target = read_target(
            runtime.file_system.as_ref(),
            &cfg.paths.testbed_information,
        )?;
        let layout = InstallerLayout::resolve(&cfg.paths.repo_root, target);
        let rendered =
            serde_json::to_string(&layout).map_err(|e| DriverError::Io(e.to_string()))?;
        runtime.terminal.write_line(&rendered)?;
        return Ok(0);
    }

    let Some(operation) = cli.operation.map(Operation::from) else {
        return Err(DriverError::Cli(
            "one of --operation, --list-images or --show-layout is required".to_string(),
        ));
    };
    let credentials = resolve_credentials(&cli, env, operation)?;
    let options = RunOptions {
        force: cli.force,
        with_url: cli.with_url,
    };

    let driver = Driver::new(cfg, runtime.file_system.as_ref(), runtime.spawner.clone())?;
    match driver.run(operation, &credentials, options)? {
        OperationReport::Completed => {
            runtime
                .terminal
                .write_line(&summary_line(operation.as_str(), "completed", ""))?;
            Ok(0)
        }
        OperationReport::SpawnFailed { message } => {
            runtime
                .terminal
                .write_line(&summary_line(operation.as_str(), "spawn_failed", &message))?;
            Ok(1)
        }
    }
}

fn resolve_credentials(
    cli: &Cli,
    env: &[(OsString, OsString)],
    operation: Operation,
) -> Result<Credentials, DriverError> {
    if operation == Operation::HsuiaTests {
        return Ok(Credentials::new("", ""));
    }
    let user = cli.vcenter_user.clone().ok_or_else(|| {
        DriverError::Cli(format!(
            "--vcenter-user is required for {}",
            operation.as_str()
        ))
    })?;
    let password = cli
        .vcenter_password
        .clone()
        .or_else(|| env_value(env, VCENTER_PASSWORD_ENV))
        .ok_or_else(|| {
            DriverError::Cli(format!(
                "--vcenter-password or ${VCENTER_PASSWORD_ENV} is required for {}",
                operation.as_str()
            ))
        })?;
    let mut credentials = Credentials::new(user, password);
    if let Some(root) = cli
        .root_password
        .clone()
        .or_else(|| env_value(env, ROOT_PASSWORD_ENV))
    {
        credentials = credentials.with_root_password(root);
    }
    Ok(credentials)
}

fn env_value(env: &[(OsString, OsString)], key: &str) -> Option<String> {
    env.iter()
        .find(|(k, _)| k == key)
        .and_then(|(_, v)| v.to_str())
        .map(ToString::to_string)
}
