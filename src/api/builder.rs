use std::{error::Error, path::PathBuf, time::Duration};

use home::home_dir;

use crate::{
    git::GitTransport,
    materialize::{PipBounds, DEFAULT_CRITICAL_IMPORTS},
    probe::{Platform, ProbeSettings},
    process::{CommandRunner, SystemRunner},
    sync::{
        decision::{DecisionPolicy, DEFAULT_PROMPT_TIMEOUT},
        DEFAULT_EXPECTED_FILES,
    },
    Installer,
};

pub const DEFAULT_REPOSITORY_URL: &str = "https://github.com/AryanVBW/AUTO-blogger.git";
const DEFAULT_INSTALL_DIR_NAME: &str = "AUTO-blogger";
const DEFAULT_MIN_FREE_SPACE_MB: u64 = 500;

#[derive(Default)]
pub struct InstallerBuilder {
    repository_url: Option<String>,
    install_dir: Option<PathBuf>,
    expected_files: Option<Vec<String>>,
    critical_imports: Option<Vec<String>>,
    interactive: Option<bool>,
    auto_update: bool,
    non_interactive: bool,
    prompt_timeout: Option<Duration>,
    system_install: Option<bool>,
    system_link: Option<bool>,
    pip_bounds: Option<PipBounds>,
    min_free_space_mb: Option<u64>,
    platform: Option<Platform>,
    runner: Option<Box<dyn CommandRunner>>,
    git_config: Option<git2::Config>,
}

impl InstallerBuilder {
    /// Repository to install from.
    ///
    /// Defaults to the upstream AUTO-blogger repository.
    pub fn repository_url(mut self, url: impl Into<String>) -> Self {
        self.repository_url = Some(url.into());
        self
    }

    /// Installation root.
    ///
    /// Defaults to `$HOME/AUTO-blogger`.
    pub fn install_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.install_dir = Some(path.into());
        self
    }

    /// Files, relative to the installation root, that a checkout must contain.
    pub fn expected_files(mut self, files: Vec<String>) -> Self {
        self.expected_files = Some(files);
        self
    }

    /// Python modules that must import in the finished environment.
    pub fn critical_imports(mut self, modules: Vec<String>) -> Self {
        self.critical_imports = Some(modules);
        self
    }

    /// Update an existing installation without asking.
    pub fn auto_update(mut self, auto_update: bool) -> Self {
        self.auto_update = auto_update;
        self
    }

    /// Never prompt.
    pub fn non_interactive(mut self, non_interactive: bool) -> Self {
        self.non_interactive = non_interactive;
        self
    }

    /// Forces interactivity on or off, ignoring whether stdin is a terminal.
    pub fn interactive(mut self, interactive: bool) -> Self {
        self.interactive = Some(interactive);
        self
    }

    /// How long to wait for an answer about an existing installation.
    ///
    /// Defaults to 30 seconds.
    pub fn prompt_timeout(mut self, timeout: Duration) -> Self {
        self.prompt_timeout = Some(timeout);
        self
    }

    /// Whether missing git or Python may be installed with the system package manager.
    ///
    /// Defaults to `true`.
    pub fn system_install(mut self, allowed: bool) -> Self {
        self.system_install = Some(allowed);
        self
    }

    /// Whether to link the launcher into `/usr/local/bin`.
    ///
    /// Defaults to `true`.
    pub fn system_link(mut self, link: bool) -> Self {
        self.system_link = Some(link);
        self
    }

    pub fn pip_bounds(mut self, bounds: PipBounds) -> Self {
        self.pip_bounds = Some(bounds);
        self
    }

    /// Free space required next to the installation root.
    ///
    /// Defaults to 500 MiB.
    pub fn min_free_space_mb(mut self, megabytes: u64) -> Self {
        self.min_free_space_mb = Some(megabytes);
        self
    }

    /// Skips platform detection.
    pub fn platform(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }

    /// Runs external programs through `runner` instead of spawning them directly.
    pub fn runner(mut self, runner: impl CommandRunner + 'static) -> Self {
        self.runner = Some(Box::new(runner));
        self
    }

    /// Git configuration used for credential helpers.
    ///
    /// Defaults to the user's git configuration.
    pub fn git_config(mut self, config: git2::Config) -> Self {
        self.git_config = Some(config);
        self
    }

    pub fn try_build(self) -> Result<Installer, Box<dyn Error>> {
        let Self {
            repository_url,
            install_dir,
            expected_files,
            critical_imports,
            interactive,
            auto_update,
            non_interactive,
            prompt_timeout,
            system_install,
            system_link,
            pip_bounds,
            min_free_space_mb,
            platform,
            runner,
            git_config,
        } = self;

        let install_dir = match install_dir {
            Some(install_dir) => install_dir,
            None => default_install_dir()?,
        };

        let timeout = prompt_timeout.unwrap_or(DEFAULT_PROMPT_TIMEOUT);
        let policy = match interactive {
            Some(interactive) => DecisionPolicy {
                interactive: interactive && !auto_update && !non_interactive,
                timeout,
            },
            None => DecisionPolicy::from_environment(auto_update, non_interactive, timeout),
        };

        let transport = match git_config {
            Some(git_config) => GitTransport::new(git_config),
            None => GitTransport::from_default_config()?,
        };

        Ok(Installer {
            repository_url: repository_url.unwrap_or_else(|| DEFAULT_REPOSITORY_URL.to_owned()),
            install_dir,
            expected_files: expected_files.unwrap_or_else(|| to_owned(DEFAULT_EXPECTED_FILES)),
            critical_imports: critical_imports
                .unwrap_or_else(|| to_owned(DEFAULT_CRITICAL_IMPORTS)),
            policy,
            probe_settings: ProbeSettings {
                allow_system_install: system_install.unwrap_or(true),
                ..ProbeSettings::default()
            },
            platform,
            pip_bounds: pip_bounds.unwrap_or_default(),
            min_free_space_mb: min_free_space_mb.unwrap_or(DEFAULT_MIN_FREE_SPACE_MB),
            system_link: system_link.unwrap_or(true),
            transport,
            runner: runner.unwrap_or_else(|| Box::new(SystemRunner)),
        })
    }
}

fn default_install_dir() -> Result<PathBuf, Box<dyn Error>> {
    let home = home_dir().ok_or("Could not find the home directory. Please set $HOME or pass --install-dir.")?;
    Ok(home.join(DEFAULT_INSTALL_DIR_NAME))
}

fn to_owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|item| item.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn toggles_disable_prompting() {
        let installer = Installer::builder()
            .install_dir("/tmp/autoblog")
            .interactive(true)
            .auto_update(true)
            .git_config(git2::Config::new().unwrap())
            .try_build()
            .unwrap();
        assert!(!installer.policy.interactive);
        assert_eq!(installer.policy.timeout, DEFAULT_PROMPT_TIMEOUT);
    }

    #[test]
    fn defaults() {
        let installer = Installer::builder()
            .install_dir("/tmp/autoblog")
            .git_config(git2::Config::new().unwrap())
            .try_build()
            .unwrap();
        assert_eq!(installer.repository_url, DEFAULT_REPOSITORY_URL);
        assert_eq!(installer.min_free_space_mb, 500);
        assert_eq!(installer.pip_bounds, PipBounds::default());
        assert_eq!(
            installer.expected_files,
            vec![
                "gui_blogger.py".to_owned(),
                "automation_engine.py".to_owned(),
                "requirements.txt".to_owned(),
            ]
        );
        assert!(installer.probe_settings.allow_system_install);
        assert!(installer.system_link);
    }
}
