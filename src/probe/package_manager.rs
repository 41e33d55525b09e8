use std::fmt::{self, Display};

use log::{debug, info, warn};

use crate::process::{CommandRunner, Invocation};

use super::{Platform, ProbeError, Tool};

/// A system package manager that can install missing tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    AptGet,
    Dnf,
    Yum,
    Pacman,
    Zypper,
    Apk,
    Homebrew,
    Winget,
    Chocolatey,
    Scoop,
}

impl Display for PackageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.program())
    }
}

impl PackageManager {
    /// Strategies in the order they are tried on a platform.
    pub fn candidates(platform: Platform) -> &'static [PackageManager] {
        use PackageManager::*;
        match platform {
            Platform::Linux => &[AptGet, Dnf, Yum, Pacman, Zypper, Apk, Homebrew],
            Platform::MacOs => &[Homebrew],
            Platform::Windows => &[Winget, Chocolatey, Scoop],
            Platform::Unknown => &[],
        }
    }

    pub fn program(&self) -> &'static str {
        match self {
            PackageManager::AptGet => "apt-get",
            PackageManager::Dnf => "dnf",
            PackageManager::Yum => "yum",
            PackageManager::Pacman => "pacman",
            PackageManager::Zypper => "zypper",
            PackageManager::Apk => "apk",
            PackageManager::Homebrew => "brew",
            PackageManager::Winget => "winget",
            PackageManager::Chocolatey => "choco",
            PackageManager::Scoop => "scoop",
        }
    }

    fn needs_root(&self) -> bool {
        matches!(
            self,
            PackageManager::AptGet
                | PackageManager::Dnf
                | PackageManager::Yum
                | PackageManager::Pacman
                | PackageManager::Zypper
                | PackageManager::Apk
        )
    }

    pub fn packages(&self, tool: Tool) -> &'static [&'static str] {
        use PackageManager::*;
        match (tool, self) {
            (Tool::Git, Winget) => &["Git.Git"],
            (Tool::Git, _) => &["git"],
            (Tool::Python, AptGet) => &["python3", "python3-venv", "python3-pip", "python3-tk"],
            (Tool::Python, Dnf | Yum) => &["python3", "python3-pip", "python3-tkinter"],
            (Tool::Python, Pacman) => &["python", "python-pip", "tk"],
            (Tool::Python, Zypper) => &["python3", "python3-pip", "python3-tk"],
            (Tool::Python, Apk) => &["python3", "py3-pip", "py3-tkinter"],
            (Tool::Python, Homebrew) => &["python", "python-tk"],
            (Tool::Python, Winget) => &["Python.Python.3.12"],
            (Tool::Python, Chocolatey | Scoop) => &["python"],
            // A missing browser is only a warning and never installed
            (Tool::Browser, _) => &[],
        }
    }

    fn install_command(&self, tool: Tool, use_sudo: bool) -> Invocation {
        let invocation = if use_sudo {
            Invocation::new("sudo").arg(self.program())
        } else {
            Invocation::new(self.program())
        };
        let invocation = match self {
            PackageManager::AptGet => invocation.args(["install", "-y"]),
            PackageManager::Dnf | PackageManager::Yum => invocation.args(["install", "-y"]),
            PackageManager::Pacman => invocation.args(["-S", "--noconfirm", "--needed"]),
            PackageManager::Zypper => invocation.args(["--non-interactive", "install"]),
            PackageManager::Apk => invocation.arg("add"),
            PackageManager::Homebrew => invocation.arg("install"),
            PackageManager::Winget => invocation.args([
                "install",
                "--silent",
                "--accept-package-agreements",
                "--accept-source-agreements",
                "--id",
            ]),
            PackageManager::Chocolatey => invocation.args(["install", "-y"]),
            PackageManager::Scoop => invocation.arg("install"),
        };
        invocation.args(self.packages(tool))
    }

    fn is_available(&self, runner: &dyn CommandRunner) -> bool {
        runner.succeeds(&Invocation::new(self.program()).arg("--version"))
    }
}

/// Tries each available package manager in order until one installs `tool`.
///
/// Every failing strategy is logged and skipped. The error lists the attempts and
/// points to the manual download page.
pub fn install_with_first_available(
    platform: Platform,
    tool: Tool,
    runner: &dyn CommandRunner,
) -> Result<PackageManager, ProbeError> {
    let use_sudo = runner.succeeds(&Invocation::new("sudo").arg("--version"));
    let mut attempts = Vec::new();

    for manager in PackageManager::candidates(platform) {
        if !manager.is_available(runner) {
            debug!("{} is not available", manager);
            continue;
        }
        if *manager == PackageManager::AptGet {
            let update = if use_sudo {
                Invocation::new("sudo").args(["apt-get", "update"])
            } else {
                Invocation::new("apt-get").arg("update")
            };
            if !runner.succeeds(&update) {
                warn!("apt-get update failed, trying the install anyway");
            }
        }

        let command = manager.install_command(tool, use_sudo && manager.needs_root());
        info!("Installing {} with {}", tool, manager);
        match runner.run(&command) {
            Ok(output) if output.success => {
                info!("Installed {} with {}", tool, manager);
                return Ok(*manager);
            }
            Ok(output) => {
                warn!("{} could not install {}: {}", manager, tool, output.summary());
                attempts.push(manager.to_string());
            }
            Err(error) => {
                warn!("{} could not be started: {}", manager, error);
                attempts.push(manager.to_string());
            }
        }
    }

    if attempts.is_empty() {
        Err(ProbeError::NoPackageManager {
            tool,
            platform,
            url: tool.manual_url(),
        })
    } else {
        Err(ProbeError::InstallFailed {
            tool,
            attempts,
            url: tool.manual_url(),
        })
    }
}
