//! Environment probing: platform detection, required tools and preflight checks.
//!
//! The result is a [`ProbeReport`] that later phases receive explicitly, most
//! importantly the interpreter command used to build the runtime environment.

pub mod package_manager;
pub mod preflight;

use std::fmt::{self, Display};

use log::{debug, info, warn};
use regex_lite::Regex;
use thiserror::Error;

use crate::process::{CommandRunner, Invocation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Linux,
    MacOs,
    Windows,
    Unknown,
}

impl Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Linux => f.write_str("Linux"),
            Platform::MacOs => f.write_str("macOS"),
            Platform::Windows => f.write_str("Windows"),
            Platform::Unknown => f.write_str("unknown OS"),
        }
    }
}

impl Platform {
    pub fn detect(runner: &dyn CommandRunner) -> Platform {
        Self::detect_with(
            |key| std::env::var(key).ok(),
            || {
                runner
                    .run(&Invocation::new("uname").arg("-s"))
                    .ok()
                    .filter(|output| output.success)
                    .map(|output| output.stdout.trim().to_owned())
            },
        )
    }

    /// Checks the shell's `OSTYPE`, then the kernel name, then Windows-only variables.
    pub fn detect_with<E, K>(env: E, kernel_name: K) -> Platform
    where
        E: Fn(&str) -> Option<String>,
        K: FnOnce() -> Option<String>,
    {
        if let Some(platform) = env("OSTYPE").as_deref().and_then(Self::from_os_name) {
            return platform;
        }
        if let Some(platform) = kernel_name().as_deref().and_then(Self::from_os_name) {
            return platform;
        }
        if env("WINDIR").is_some()
            || env("SYSTEMROOT").is_some()
            || env("OS").is_some_and(|os| os == "Windows_NT")
        {
            return Platform::Windows;
        }
        Platform::Unknown
    }

    fn from_os_name(name: &str) -> Option<Platform> {
        let name = name.to_lowercase();
        if name.starts_with("linux") {
            Some(Platform::Linux)
        } else if name.starts_with("darwin") {
            Some(Platform::MacOs)
        } else if ["msys", "cygwin", "mingw", "win32", "windows"]
            .iter()
            .any(|marker| name.contains(marker))
        {
            Some(Platform::Windows)
        } else {
            None
        }
    }
}

/// External tools the installer depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    Git,
    Python,
    Browser,
}

impl Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tool::Git => f.write_str("git"),
            Tool::Python => f.write_str("Python 3"),
            Tool::Browser => f.write_str("Chrome/Chromium"),
        }
    }
}

impl Tool {
    pub fn candidates(&self, platform: Platform) -> &'static [&'static str] {
        match (self, platform) {
            (Tool::Git, _) => &["git"],
            (Tool::Python, Platform::Windows) => &["python", "py", "python3"],
            (Tool::Python, _) => &["python3", "python"],
            (Tool::Browser, Platform::MacOs) => &[
                "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
                "/Applications/Chromium.app/Contents/MacOS/Chromium",
            ],
            (Tool::Browser, _) => &[
                "google-chrome",
                "google-chrome-stable",
                "chromium",
                "chromium-browser",
            ],
        }
    }

    pub fn manual_url(&self) -> &'static str {
        match self {
            Tool::Git => "https://git-scm.com/downloads",
            Tool::Python => "https://www.python.org/downloads/",
            Tool::Browser => "https://www.google.com/chrome/",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolStatus {
    Present {
        command: String,
        version: Option<String>,
    },
    Missing,
}

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("{tool} is not installed")]
    ToolMissing { tool: Tool, url: &'static str },
    #[error("{tool} is not installed and no supported package manager was found on {platform}")]
    NoPackageManager {
        tool: Tool,
        platform: Platform,
        url: &'static str,
    },
    #[error("{tool} could not be installed with {}", attempts.join(", "))]
    InstallFailed {
        tool: Tool,
        attempts: Vec<String>,
        url: &'static str,
    },
    #[error("Python {found} is too old, {minimum} or newer is required")]
    InterpreterTooOld {
        found: String,
        minimum: String,
        url: &'static str,
    },
    #[error("{} is not writable: {source}", path.display())]
    NotWritable {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
    #[error("only {available_mb} MiB free in {}, {required_mb} MiB required", path.display())]
    InsufficientSpace {
        path: std::path::PathBuf,
        available_mb: u64,
        required_mb: u64,
    },
    #[error("cannot reach {host}:{port}: {source}")]
    Unreachable {
        host: String,
        port: u16,
        source: std::io::Error,
    },
}

impl ProbeError {
    pub fn remedy(&self) -> String {
        match self {
            ProbeError::ToolMissing { tool, url }
            | ProbeError::NoPackageManager { tool, url, .. }
            | ProbeError::InstallFailed { tool, url, .. } => {
                format!("Install {tool} manually from {url} and re-run the installer.")
            }
            ProbeError::InterpreterTooOld { minimum, url, .. } => {
                format!("Install Python {minimum} or newer from {url} and re-run the installer.")
            }
            ProbeError::NotWritable { path, .. } => format!(
                "Choose another location with --install-dir or fix the permissions of {}.",
                path.display()
            ),
            ProbeError::InsufficientSpace { required_mb, .. } => {
                format!("Free at least {required_mb} MiB of disk space and re-run the installer.")
            }
            ProbeError::Unreachable { host, .. } => format!(
                "Check your internet connection, proxy and firewall settings for {host}, then re-run."
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeSettings {
    pub allow_system_install: bool,
    pub minimum_python: (u64, u64),
}

impl Default for ProbeSettings {
    fn default() -> Self {
        ProbeSettings {
            allow_system_install: true,
            minimum_python: (3, 8),
        }
    }
}

/// Everything later phases need to know about the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    pub platform: Platform,
    pub git_version: Option<String>,
    /// Command that starts a suitable Python interpreter, e.g. `python3`.
    pub interpreter: String,
    pub interpreter_version: String,
    pub browser: Option<String>,
    pub warnings: Vec<String>,
}

/// Runs `<command> --version` and extracts the version. Never fails: a command
/// that cannot be started is simply [`ToolStatus::Missing`].
pub fn check_tool(runner: &dyn CommandRunner, command: &str) -> ToolStatus {
    match runner.run(&Invocation::new(command).arg("--version")) {
        Ok(output) if output.success => {
            // Python 2 prints its version on stderr
            let text = format!("{}\n{}", output.stdout, output.stderr);
            ToolStatus::Present {
                command: command.to_owned(),
                version: parse_version(&text),
            }
        }
        Ok(output) => {
            debug!("{} --version failed: {}", command, output.summary());
            ToolStatus::Missing
        }
        Err(error) => {
            debug!("{} is not available: {}", command, error);
            ToolStatus::Missing
        }
    }
}

pub fn parse_version(text: &str) -> Option<String> {
    let re = Regex::new(r"(\d+(?:\.\d+)+)").ok()?;
    re.captures(text)
        .and_then(|captures| captures.get(1))
        .map(|version| version.as_str().to_owned())
}

pub fn version_at_least(version: &str, minimum: (u64, u64)) -> bool {
    let mut parts = version.split('.').map(|part| part.parse::<u64>().unwrap_or(0));
    let major = parts.next().unwrap_or(0);
    let minor = parts.next().unwrap_or(0);
    (major, minor) >= minimum
}

fn find_tool(runner: &dyn CommandRunner, tool: Tool, platform: Platform) -> ToolStatus {
    tool.candidates(platform)
        .iter()
        .map(|command| check_tool(runner, command))
        .find(|status| matches!(status, ToolStatus::Present { .. }))
        .unwrap_or(ToolStatus::Missing)
}

fn find_interpreter(
    runner: &dyn CommandRunner,
    platform: Platform,
    minimum: (u64, u64),
) -> Result<(String, String), Option<String>> {
    let mut too_old = None;
    for command in Tool::Python.candidates(platform) {
        if let ToolStatus::Present {
            command,
            version: Some(version),
        } = check_tool(runner, command)
        {
            if version_at_least(&version, minimum) {
                return Ok((command, version));
            }
            debug!("{} is version {}, which is too old", command, version);
            too_old.get_or_insert(version);
        }
    }
    Err(too_old)
}

fn ensure_installed(
    runner: &dyn CommandRunner,
    tool: Tool,
    platform: Platform,
    settings: &ProbeSettings,
) -> Result<(), ProbeError> {
    if !settings.allow_system_install {
        return Err(ProbeError::ToolMissing {
            tool,
            url: tool.manual_url(),
        });
    }
    package_manager::install_with_first_available(platform, tool, runner).map(|_| ())
}

/// Detects the platform and makes sure git and a recent Python are usable,
/// installing them through the system package manager when allowed.
pub fn probe(
    runner: &dyn CommandRunner,
    settings: &ProbeSettings,
) -> Result<ProbeReport, ProbeError> {
    let platform = Platform::detect(runner);
    info!("Detected {}", platform);
    probe_platform(runner, platform, settings)
}

pub fn probe_platform(
    runner: &dyn CommandRunner,
    platform: Platform,
    settings: &ProbeSettings,
) -> Result<ProbeReport, ProbeError> {
    let mut warnings = Vec::new();

    let git_version = match find_tool(runner, Tool::Git, platform) {
        ToolStatus::Present { version, .. } => version,
        ToolStatus::Missing => {
            warn!("git was not found");
            ensure_installed(runner, Tool::Git, platform, settings)?;
            match find_tool(runner, Tool::Git, platform) {
                ToolStatus::Present { version, .. } => version,
                ToolStatus::Missing => {
                    return Err(ProbeError::ToolMissing {
                        tool: Tool::Git,
                        url: Tool::Git.manual_url(),
                    })
                }
            }
        }
    };
    info!(
        "Found git {}",
        git_version.as_deref().unwrap_or("(unknown version)")
    );

    let minimum = settings.minimum_python;
    let (interpreter, interpreter_version) = match find_interpreter(runner, platform, minimum) {
        Ok(found) => found,
        Err(too_old) => {
            warn!("No Python {}.{}+ interpreter was found", minimum.0, minimum.1);
            let attempt = ensure_installed(runner, Tool::Python, platform, settings);
            match find_interpreter(runner, platform, minimum) {
                Ok(found) => found,
                Err(still_too_old) => {
                    if let Some(found) = still_too_old.or(too_old) {
                        return Err(ProbeError::InterpreterTooOld {
                            found,
                            minimum: format!("{}.{}", minimum.0, minimum.1),
                            url: Tool::Python.manual_url(),
                        });
                    }
                    attempt?;
                    return Err(ProbeError::ToolMissing {
                        tool: Tool::Python,
                        url: Tool::Python.manual_url(),
                    });
                }
            }
        }
    };
    info!("Using {} (Python {})", interpreter, interpreter_version);

    let browser = match find_tool(runner, Tool::Browser, platform) {
        ToolStatus::Present { command, version } => {
            info!(
                "Found browser {} {}",
                command,
                version.as_deref().unwrap_or("")
            );
            Some(command)
        }
        ToolStatus::Missing => {
            let warning = format!(
                "{} was not found; browser automation will not work until it is installed from {}",
                Tool::Browser,
                Tool::Browser.manual_url()
            );
            warn!("{}", warning);
            warnings.push(warning);
            None
        }
    };

    Ok(ProbeReport {
        platform,
        git_version,
        interpreter,
        interpreter_version,
        browser,
        warnings,
    })
}
