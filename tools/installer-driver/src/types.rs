use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Install,
    InstallWithoutBash,
    InstallFailsWrongVcenterIp,
    InstallFailsAtExtensionReg,
    Uninstall,
    UninstallFails,
    NgcTests,
    HsuiaTests,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::InstallWithoutBash => "install-without-bash",
            Self::InstallFailsWrongVcenterIp => "install-fails-wrong-vcenter-ip",
            Self::InstallFailsAtExtensionReg => "install-fails-at-extension-reg",
            Self::Uninstall => "uninstall",
            Self::UninstallFails => "uninstall-fails",
            Self::NgcTests => "ngc-tests",
            Self::HsuiaTests => "hsuia-tests",
        }
    }
}

/// Which installer script an operation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallerScript {
    Install,
    Uninstall,
}

impl InstallerScript {
    pub fn file_name(self) -> &'static str {
        match self {
            Self::Install => "install.sh",
            Self::Uninstall => "uninstall.sh",
        }
    }

    pub fn log_name(self) -> &'static str {
        match self {
            Self::Install => "install.log",
            Self::Uninstall => "uninstall.log",
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub vcenter_user: String,
    pub vcenter_password: String,
    pub root_password: Option<String>,
}

impl Credentials {
    pub fn new(vcenter_user: impl Into<String>, vcenter_password: impl Into<String>) -> Self {
        Self {
            vcenter_user: vcenter_user.into(),
            vcenter_password: vcenter_password.into(),
            root_password: None,
        }
    }

    pub fn with_root_password(mut self, root_password: impl Into<String>) -> Self {
        self.root_password = Some(root_password.into());
        self
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("vcenter_user", &self.vcenter_user)
            .field("vcenter_password", &"<redacted>")
            .field(
                "root_password",
                &self.root_password.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}
