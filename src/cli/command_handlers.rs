use std::{error::Error, time::Duration};

use log::{error, info, warn};

use crate::{
    api::{InstallError, InstallReport, RunStatus},
    cli::args::{CliArgs, Command},
    config::InstallerConfig,
    Installer,
};

/// Exit code of a run that failed.
pub const FAILURE_EXIT_CODE: i32 = 1;

/// Builds the installer from configuration, with command line flags taking precedence.
pub fn build_installer(
    args: &CliArgs,
    config: InstallerConfig,
) -> Result<Installer, Box<dyn Error>> {
    let mut builder = Installer::builder()
        .auto_update(args.auto_update || config.auto_update)
        .non_interactive(args.non_interactive || config.non_interactive)
        .system_install(!args.no_system_install)
        .system_link(!args.no_system_link);

    if let Some(url) = args.repository_url.clone().or(config.repository_url) {
        builder = builder.repository_url(url);
    }
    if let Some(dir) = args.install_dir.clone().or(config.install_dir) {
        builder = builder.install_dir(dir);
    }
    if let Some(seconds) = args.prompt_timeout.or(config.prompt_timeout_secs) {
        builder = builder.prompt_timeout(Duration::from_secs(seconds));
    }
    if let Some(megabytes) = config.min_free_space_mb {
        builder = builder.min_free_space_mb(megabytes);
    }
    builder.try_build()
}

/// Handler for every subcommand. Running without one installs.
pub fn do_command(
    command: Option<Command>,
    installer: &Installer,
) -> Result<InstallReport, InstallError> {
    match command.unwrap_or(Command::Install) {
        Command::Install => {
            info!("Installing into {}", installer.install_dir().display());
            installer.install()
        }
        Command::Update => {
            info!("Updating {}", installer.install_dir().display());
            installer.update()
        }
        Command::Check => installer.check(),
        Command::Verify => installer.verify(),
    }
}

/// Logs the result of a run and turns it into the process exit code.
pub fn exit_code(result: &Result<InstallReport, InstallError>) -> i32 {
    match result {
        Ok(report) => {
            for warning in &report.warnings {
                warn!("{}", warning);
            }
            match report.status {
                RunStatus::Success => info!("Done"),
                RunStatus::SucceededWithWarnings => warn!(
                    "Done with {} warning(s); the application may not work fully",
                    report.warnings.len()
                ),
            }
            report.status.exit_code()
        }
        Err(failure) => {
            error!("Step failed: {}", failure.step);
            error!("Cause: {}", failure.source);
            error!("Remedy: {}", failure.remedy);
            FAILURE_EXIT_CODE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Step;

    use pretty_assertions::assert_eq;

    #[test]
    fn exit_codes() {
        let clean = InstallReport {
            status: RunStatus::Success,
            warnings: vec![],
            outcome: None,
            receipt: None,
        };
        assert_eq!(exit_code(&Ok(clean)), 0);

        let degraded = InstallReport {
            status: RunStatus::SucceededWithWarnings,
            warnings: vec!["Failed to install: selenium".to_owned()],
            outcome: None,
            receipt: None,
        };
        assert_eq!(exit_code(&Ok(degraded)), 2);

        let failed = InstallError {
            step: Step::Sync,
            source: "network unreachable".into(),
            remedy: "Check the network connection.".to_owned(),
        };
        assert_eq!(exit_code(&Err(failed)), 1);
    }
}
