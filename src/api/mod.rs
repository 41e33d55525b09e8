use std::{
    error::Error,
    fmt::{self, Display},
    path::{Path, PathBuf},
};

use log::{info, warn};

use crate::{
    flock::FileLock,
    git::GitTransport,
    launcher,
    materialize::{self, Materializer, PipBounds, RuntimeEnvironment},
    model::receipt::InstallReceipt,
    probe::{self, preflight, Platform, ProbeReport, ProbeSettings},
    process::CommandRunner,
    smoke,
    sync::{
        self,
        decision::{ChoiceSource, DecisionPolicy, StdinChoice},
        InstallationTarget, SyncDecision, SyncOutcome, Synchronizer, TargetState,
    },
};

mod builder;

pub use builder::InstallerBuilder;

pub struct Installer {
    repository_url: String,
    install_dir: PathBuf,
    expected_files: Vec<String>,
    critical_imports: Vec<String>,
    policy: DecisionPolicy,
    probe_settings: ProbeSettings,
    platform: Option<Platform>,
    pip_bounds: PipBounds,
    min_free_space_mb: u64,
    system_link: bool,
    transport: GitTransport,
    runner: Box<dyn CommandRunner>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Lock,
    Probe,
    Preflight,
    Sync,
    Materialize,
    Verify,
}

impl Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Lock => f.write_str("acquiring the installer lock"),
            Step::Probe => f.write_str("checking prerequisites"),
            Step::Preflight => f.write_str("preflight checks"),
            Step::Sync => f.write_str("synchronizing the repository"),
            Step::Materialize => f.write_str("building the Python environment"),
            Step::Verify => f.write_str("verifying the installation"),
        }
    }
}

/// A fatal failure: which step broke, why, and what the operator can do about it.
#[derive(Debug)]
pub struct InstallError {
    pub step: Step,
    pub source: Box<dyn Error + Send + Sync>,
    pub remedy: String,
}

impl InstallError {
    fn new(step: Step, source: impl Into<Box<dyn Error + Send + Sync>>, remedy: String) -> Self {
        InstallError {
            step,
            source: source.into(),
            remedy,
        }
    }
}

impl Display for InstallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.step, self.source)
    }
}

impl Error for InstallError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(self.source.as_ref())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    SucceededWithWarnings,
}

impl RunStatus {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunStatus::Success => 0,
            RunStatus::SucceededWithWarnings => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    pub status: RunStatus,
    pub warnings: Vec<String>,
    pub outcome: Option<SyncOutcome>,
    pub receipt: Option<PathBuf>,
}

impl InstallReport {
    fn new(warnings: Vec<String>, outcome: Option<SyncOutcome>, receipt: Option<PathBuf>) -> Self {
        let status = if warnings.is_empty() {
            RunStatus::Success
        } else {
            RunStatus::SucceededWithWarnings
        };
        InstallReport {
            status,
            warnings,
            outcome,
            receipt,
        }
    }
}

/// Whether preflight may create the install directory's parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Preflight {
    CreateParent,
    ReadOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Install,
    /// Skips the prompt when a checkout already exists.
    Update,
}

impl Installer {
    pub fn builder() -> InstallerBuilder {
        InstallerBuilder::default()
    }

    pub fn install_dir(&self) -> &Path {
        &self.install_dir
    }

    /// Probes the machine and runs the preflight checks without changing anything:
    /// missing tools are reported rather than installed and no directory is created.
    pub fn check(&self) -> Result<InstallReport, InstallError> {
        let settings = ProbeSettings {
            allow_system_install: false,
            ..self.probe_settings
        };
        let probe_report = self.probe(&settings)?;
        self.preflight(Preflight::ReadOnly)?;
        Ok(InstallReport::new(probe_report.warnings, None, None))
    }

    /// Full run: probe, synchronize, rebuild the environment, write launchers.
    /// An existing installation is handled according to the configured policy,
    /// asking on standard input when the run is interactive.
    pub fn install(&self) -> Result<InstallReport, InstallError> {
        self.install_with(&mut StdinChoice)
    }

    pub fn install_with(
        &self,
        choices: &mut dyn ChoiceSource,
    ) -> Result<InstallReport, InstallError> {
        self.run(Mode::Install, choices)
    }

    /// Like [`Installer::install`], but an existing checkout is updated in place without asking.
    pub fn update(&self) -> Result<InstallReport, InstallError> {
        self.run(Mode::Update, &mut StdinChoice)
    }

    /// Checks an existing installation without touching the network.
    pub fn verify(&self) -> Result<InstallReport, InstallError> {
        let root = &self.install_dir;
        sync::verify_expected_files(root, &self.expected_files).map_err(|error| {
            let remedy = format!(
                "Re-run the installer to repair {}. ({})",
                root.display(),
                error.remedy()
            );
            InstallError::new(Step::Verify, error, remedy)
        })?;

        let receipt_path = InstallReceipt::path_in(root);
        let mut warnings = Vec::new();
        match InstallReceipt::from_file(&receipt_path) {
            Ok(receipt) => info!(
                "Installed from {} ({} at {})",
                receipt.repository_url, receipt.branch, receipt.revision
            ),
            Err(error) => warnings.push(format!("No readable install receipt: {error}")),
        }

        let environment = RuntimeEnvironment::in_root(root, self.platform());
        if !environment.interpreter().exists() {
            return Err(InstallError::new(
                Step::Verify,
                format!(
                    "the Python environment at {} is missing",
                    environment.path.display()
                ),
                "Re-run the installer to rebuild the environment.".to_owned(),
            ));
        }
        let failed_imports = materialize::missing_imports(
            self.runner.as_ref(),
            &environment,
            &self.critical_imports,
        );
        if !failed_imports.is_empty() {
            warnings.push(format!(
                "Modules that cannot be imported: {}",
                failed_imports.join(", ")
            ));
        }
        warnings.extend(smoke::smoke_test(self.runner.as_ref(), root, &environment));
        Ok(InstallReport::new(warnings, None, Some(receipt_path)))
    }

    fn run(&self, mode: Mode, choices: &mut dyn ChoiceSource) -> Result<InstallReport, InstallError> {
        let _lock = FileLock::for_target(&self.install_dir).map_err(|error| {
            let remedy = error.remedy();
            InstallError::new(Step::Lock, error, remedy)
        })?;

        let probe_report = self.probe(&self.probe_settings)?;
        let mut warnings = probe_report.warnings.clone();
        self.preflight(Preflight::CreateParent)?;

        let target = InstallationTarget::inspect(&self.install_dir);
        let decision = match (mode, target.state) {
            (Mode::Update, TargetState::PresentVcs) => SyncDecision::UpdateInPlace,
            _ => self.policy.decide(target.state, choices),
        };
        info!("Installing into {} ({:?})", target.path.display(), decision);

        let synchronizer = Synchronizer::new(&self.repository_url, &self.transport)
            .with_expected_files(self.expected_files.clone());
        let outcome = synchronizer
            .synchronize(&target.path, decision)
            .map_err(|error| {
                let remedy = error.remedy();
                InstallError::new(Step::Sync, error, remedy)
            })?;
        info!("Repository {}", outcome);
        if let SyncOutcome::Replaced {
            backup: Some(backup),
            ..
        } = &outcome
        {
            warnings.push(format!(
                "The previous contents of {} were moved to {}",
                target.path.display(),
                backup.display()
            ));
        }

        let materialized = self
            .materializer(&probe_report.interpreter)
            .materialize(&target.path)
            .map_err(|error| {
                let remedy = error.remedy();
                InstallError::new(Step::Materialize, error, remedy)
            })?;
        warnings.extend(materialized.warnings());

        match launcher::write_launchers(&target.path, probe_report.platform, self.system_link) {
            Ok(launchers) => {
                if let Some(link) = launchers.system_link {
                    info!("Run the application with {}", link.display());
                } else {
                    info!("Run the application with {}", launchers.script.display());
                }
            }
            Err(error) => {
                warn!("{} {}", error, error.remedy());
                warnings.push(error.to_string());
            }
        }

        warnings.extend(smoke::smoke_test(
            self.runner.as_ref(),
            &target.path,
            &materialized.environment,
        ));

        let remote = synchronizer.resolved_remote(&outcome);
        let receipt = InstallReceipt {
            repository_url: remote.url,
            branch: remote.branch.unwrap_or_default(),
            revision: outcome.revision().to_string(),
            environment: materialized.environment.path.clone(),
            warnings: warnings.clone(),
        };
        let receipt_path = match receipt.write_to(&target.path) {
            Ok(path) => Some(path),
            Err(error) => {
                warnings.push(format!("Could not write the install receipt: {error}"));
                None
            }
        };

        Ok(InstallReport::new(warnings, Some(outcome), receipt_path))
    }

    fn probe(&self, settings: &ProbeSettings) -> Result<ProbeReport, InstallError> {
        let result = match self.platform {
            Some(platform) => probe::probe_platform(self.runner.as_ref(), platform, settings),
            None => probe::probe(self.runner.as_ref(), settings),
        };
        result.map_err(|error| {
            let remedy = error.remedy();
            InstallError::new(Step::Probe, error, remedy)
        })
    }

    fn preflight(&self, mode: Preflight) -> Result<(), InstallError> {
        let parent = self
            .install_dir
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let location = match mode {
            Preflight::CreateParent => parent,
            Preflight::ReadOnly => preflight::nearest_existing(parent),
        };
        preflight::check_writable(location)
            .and_then(|_| preflight::check_free_space(location, self.min_free_space_mb))
            .and_then(|_| preflight::check_connectivity(&self.repository_url))
            .map_err(|error| {
                let remedy = error.remedy();
                InstallError::new(Step::Preflight, error, remedy)
            })
    }

    fn materializer(&self, interpreter: &str) -> Materializer<'_> {
        Materializer::new(self.runner.as_ref(), self.platform(), interpreter)
            .with_bounds(self.pip_bounds)
            .with_critical_imports(self.critical_imports.clone())
    }

    fn platform(&self) -> Platform {
        self.platform
            .unwrap_or_else(|| Platform::detect(self.runner.as_ref()))
    }
}
