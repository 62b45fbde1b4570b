use crate::errors::DriverError;
use crate::runtime::FileSystem;
use crate::types::InstallerScript;
use serde::Serialize;
use std::path::{Path, PathBuf};

pub const VSPHERE65_MARKER: &str = "TEST_VSPHERE_VER=65";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TestbedTarget {
    Vsphere65,
    Default,
}

impl TestbedTarget {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Vsphere65 => "vsphere65",
            Self::Default => "default",
        }
    }
}

/// Only the first line is consulted; an empty file selects the default set.
pub fn detect_target(contents: &str) -> TestbedTarget {
    match contents.lines().next() {
        Some(first) if first.contains(VSPHERE65_MARKER) => TestbedTarget::Vsphere65,
        _ => TestbedTarget::Default,
    }
}

pub fn read_target(fs: &dyn FileSystem, path: &Path) -> Result<TestbedTarget, DriverError> {
    let contents = fs.read_to_string(path)?;
    Ok(detect_target(&contents))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallerLayout {
    pub target: TestbedTarget,
    pub installer_dir: PathBuf,
    pub ui_tests_dir: PathBuf,
}

impl InstallerLayout {
    pub fn resolve(repo_root: &Path, target: TestbedTarget) -> Self {
        let ui = repo_root.join("ui");
        let (installer_dir, ui_tests_dir) = match target {
            TestbedTarget::Vsphere65 => (
                ui.join("installer").join("HTML5Client"),
                ui.join("vic-ui-h5c/uia/h5-plugin-tests/ui-automation/vic-uia"),
            ),
            TestbedTarget::Default => (
                ui.join("installer").join("VCSA"),
                ui.join("vic-uia/uia/vic-uia"),
            ),
        };
        Self {
            target,
            installer_dir,
            ui_tests_dir,
        }
    }

    pub fn script(&self, script: InstallerScript) -> PathBuf {
        self.installer_dir.join(script.file_name())
    }
}
