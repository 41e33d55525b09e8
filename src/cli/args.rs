use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Installs and updates the AUTO-blogger desktop application.
#[derive(Debug, Parser)]
#[clap(version)]
pub struct CliArgs {
    #[clap(subcommand)]
    pub cmd: Option<Command>,
    /// Configuration file. Defaults to $HOME/.config/autoblog/install.toml
    #[clap(long, env = "AUTOBLOG_CONFIG", global = true)]
    pub config: Option<PathBuf>,
    /// Installation directory. Defaults to $HOME/AUTO-blogger
    #[clap(long, global = true)]
    pub install_dir: Option<PathBuf>,
    /// Repository to install from
    #[clap(long, global = true)]
    pub repository_url: Option<String>,
    /// Update an existing installation without asking
    #[clap(long, global = true)]
    pub auto_update: bool,
    /// Never prompt; existing installations are updated
    #[clap(long, global = true)]
    pub non_interactive: bool,
    /// Seconds to wait for an answer before updating
    #[clap(long, value_name = "SECONDS", global = true)]
    pub prompt_timeout: Option<u64>,
    /// Do not install missing git or Python with the system package manager
    #[clap(long, global = true)]
    pub no_system_install: bool,
    /// Do not link the launcher into /usr/local/bin
    #[clap(long, global = true)]
    pub no_system_link: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum Command {
    ///Installs the application, or updates an existing installation
    Install,
    ///Updates an existing installation in place without prompting
    Update,
    ///Checks prerequisites without changing anything
    Check,
    ///Verifies an existing installation without using the network
    Verify,
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn install_is_the_default() {
        let args = CliArgs::try_parse_from(["autoblog-install"]).unwrap();
        assert_eq!(args.cmd, None);
        assert!(!args.auto_update);
    }

    #[test]
    fn flags_after_subcommand() {
        let args = CliArgs::try_parse_from([
            "autoblog-install",
            "update",
            "--install-dir",
            "/opt/autoblog",
            "--prompt-timeout",
            "5",
            "--no-system-link",
        ])
        .unwrap();
        assert_eq!(args.cmd, Some(Command::Update));
        assert_eq!(args.install_dir, Some(PathBuf::from("/opt/autoblog")));
        assert_eq!(args.prompt_timeout, Some(5));
        assert!(args.no_system_link);
        assert!(!args.no_system_install);
    }
}
