//! Builds the isolated Python environment the application runs in.

use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use thiserror::Error;

use crate::{
    model::{
        manifest::{DependencyManifest, DEFAULT_MANIFEST_FILE},
        ParseError,
    },
    probe::Platform,
    process::{CommandRunner, Invocation},
};

pub const VENV_DIR: &str = "venv";

/// Modules the application cannot start without.
pub const DEFAULT_CRITICAL_IMPORTS: &[&str] =
    &["tkinter", "requests", "openai", "bs4", "selenium", "PIL"];

#[derive(Error, Debug)]
pub enum MaterializeError {
    #[error("Could not remove the old environment at {}: {source}", path.display())]
    Remove {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Could not create the environment with {interpreter}: {detail}")]
    Create { interpreter: String, detail: String },
    #[error(transparent)]
    Manifest(#[from] ParseError),
}

impl MaterializeError {
    pub fn remedy(&self) -> String {
        match self {
            MaterializeError::Remove { path, .. } => format!(
                "Close any program using {} and delete it manually, then re-run.",
                path.display()
            ),
            MaterializeError::Create { interpreter, .. } => format!(
                "Make sure the venv module is available for {interpreter} \
                 (on Debian/Ubuntu install python3-venv), then re-run."
            ),
            MaterializeError::Manifest(_) => {
                "The dependency manifest could not be read; reinstall to get a fresh copy."
                    .to_owned()
            }
        }
    }
}

/// Bounds applied to every package-manager invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipBounds {
    pub timeout_secs: u64,
    pub retries: u32,
}

impl Default for PipBounds {
    fn default() -> Self {
        PipBounds {
            timeout_secs: 300,
            retries: 3,
        }
    }
}

impl PipBounds {
    fn args(&self) -> [String; 4] {
        [
            "--timeout".to_owned(),
            self.timeout_secs.to_string(),
            "--retries".to_owned(),
            self.retries.to_string(),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeEnvironment {
    pub path: PathBuf,
    platform: Platform,
}

impl RuntimeEnvironment {
    pub fn in_root(root: &Path, platform: Platform) -> Self {
        RuntimeEnvironment {
            path: root.join(VENV_DIR),
            platform,
        }
    }

    pub fn interpreter(&self) -> PathBuf {
        match self.platform {
            Platform::Windows => self.path.join("Scripts").join("python.exe"),
            _ => self.path.join("bin").join("python"),
        }
    }

    fn python(&self) -> Invocation {
        Invocation::new(self.interpreter())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializeReport {
    pub environment: RuntimeEnvironment,
    pub pip_upgraded: bool,
    pub batch_succeeded: bool,
    pub failed_installs: Vec<String>,
    pub failed_imports: Vec<String>,
}

impl MaterializeReport {
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if !self.pip_upgraded {
            warnings.push("pip could not be upgraded".to_owned());
        }
        if !self.failed_installs.is_empty() {
            warnings.push(format!(
                "Failed to install: {}",
                self.failed_installs.join(", ")
            ));
        }
        if !self.failed_imports.is_empty() {
            warnings.push(format!(
                "Modules that cannot be imported: {}",
                self.failed_imports.join(", ")
            ));
        }
        warnings
    }
}

pub struct Materializer<'a> {
    runner: &'a dyn CommandRunner,
    platform: Platform,
    interpreter: String,
    bounds: PipBounds,
    critical_imports: Vec<String>,
}

impl<'a> Materializer<'a> {
    /// `interpreter` is the system Python found by the probe.
    pub fn new(runner: &'a dyn CommandRunner, platform: Platform, interpreter: &str) -> Self {
        Materializer {
            runner,
            platform,
            interpreter: interpreter.to_owned(),
            bounds: PipBounds::default(),
            critical_imports: DEFAULT_CRITICAL_IMPORTS
                .iter()
                .map(|module| module.to_string())
                .collect(),
        }
    }

    pub fn with_bounds(mut self, bounds: PipBounds) -> Self {
        self.bounds = bounds;
        self
    }

    pub fn with_critical_imports(mut self, modules: Vec<String>) -> Self {
        self.critical_imports = modules;
        self
    }

    /// Recreates `<root>/venv` from scratch and installs the manifest into it.
    /// Only failing to create the environment is fatal; package problems are reported.
    pub fn materialize(&self, root: &Path) -> Result<MaterializeReport, MaterializeError> {
        let environment = RuntimeEnvironment::in_root(root, self.platform);
        self.recreate(&environment)?;

        let pip_upgraded = self.pip(
            &environment,
            ["install", "--upgrade", "pip"].map(str::to_owned),
        );
        if !pip_upgraded {
            warn!("Could not upgrade pip, continuing with the bundled version");
        }

        let manifest_path = root.join(DEFAULT_MANIFEST_FILE);
        let batch_succeeded = self.pip(
            &environment,
            [
                "install".to_owned(),
                "-r".to_owned(),
                manifest_path.display().to_string(),
            ],
        );

        let mut failed_installs = Vec::new();
        if batch_succeeded {
            info!("Installed all requirements");
        } else {
            warn!("Batch install failed, installing requirements one at a time");
            let manifest = DependencyManifest::from_file(&manifest_path)?;
            for requirement in &manifest.requirements {
                if self.pip(
                    &environment,
                    ["install".to_owned(), requirement.specifier.clone()],
                ) {
                    debug!("Installed {}", requirement.specifier);
                } else {
                    warn!("Could not install {}", requirement.specifier);
                    failed_installs.push(requirement.name.clone());
                }
            }
        }

        let failed_imports = self.verify_imports(&environment);
        Ok(MaterializeReport {
            environment,
            pip_upgraded,
            batch_succeeded,
            failed_installs,
            failed_imports,
        })
    }

    pub fn verify_imports(&self, environment: &RuntimeEnvironment) -> Vec<String> {
        missing_imports(self.runner, environment, &self.critical_imports)
    }

    fn recreate(&self, environment: &RuntimeEnvironment) -> Result<(), MaterializeError> {
        if environment.path.exists() {
            info!("Removing existing environment {}", environment.path.display());
            std::fs::remove_dir_all(&environment.path).map_err(|source| {
                MaterializeError::Remove {
                    path: environment.path.clone(),
                    source,
                }
            })?;
        }

        let create = Invocation::new(&self.interpreter)
            .args(["-m", "venv"])
            .arg(&environment.path);
        info!("Creating environment: {}", create);
        let failure = |detail: String| MaterializeError::Create {
            interpreter: self.interpreter.clone(),
            detail,
        };
        match self.runner.run(&create) {
            Ok(output) if output.success => Ok(()),
            Ok(output) => Err(failure(output.summary().to_owned())),
            Err(error) => Err(failure(error.to_string())),
        }
    }

    fn pip<I>(&self, environment: &RuntimeEnvironment, args: I) -> bool
    where
        I: IntoIterator<Item = String>,
    {
        let invocation = environment
            .python()
            .args(["-m", "pip"])
            .args(args)
            .args(self.bounds.args());
        debug!("Running {}", invocation);
        match self.runner.run(&invocation) {
            Ok(output) if output.success => true,
            Ok(output) => {
                debug!("{} failed: {}", invocation, output.summary());
                false
            }
            Err(error) => {
                debug!("{} could not be started: {}", invocation, error);
                false
            }
        }
    }
}

/// Returns the modules the environment's interpreter cannot import.
pub fn missing_imports(
    runner: &dyn CommandRunner,
    environment: &RuntimeEnvironment,
    modules: &[String],
) -> Vec<String> {
    modules
        .iter()
        .filter(|module| {
            let imported = runner.succeeds(
                &environment
                    .python()
                    .arg("-c")
                    .arg(format!("import {module}")),
            );
            if !imported {
                warn!("Cannot import {}", module);
            }
            !imported
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::testing::ScriptedRunner;

    use pretty_assertions::assert_eq;

    struct Fixture {
        dir: tempfile::TempDir,
    }

    impl Fixture {
        fn new(requirements: &str) -> Fixture {
            let dir = tempfile::tempdir().unwrap();
            std::fs::write(dir.path().join("requirements.txt"), requirements).unwrap();
            Fixture { dir }
        }

        fn root(&self) -> &Path {
            self.dir.path()
        }

        fn python(&self) -> String {
            self.root()
                .join("venv")
                .join("bin")
                .join("python")
                .display()
                .to_string()
        }

        fn pip(&self, args: &str) -> String {
            format!(
                "{} -m pip install {} --timeout 300 --retries 3",
                self.python(),
                args
            )
        }

        fn create(&self) -> String {
            format!("python3 -m venv {}", self.root().join("venv").display())
        }
    }

    #[test]
    fn batch_install_success() {
        let fixture = Fixture::new("requests\n");
        let runner = ScriptedRunner::new()
            .ok(&fixture.create(), "")
            .ok_prefix(&fixture.python());
        let report = Materializer::new(&runner, Platform::Linux, "python3")
            .materialize(fixture.root())
            .unwrap();

        assert!(report.batch_succeeded);
        assert!(report.warnings().is_empty());
        assert!(runner.called(&fixture.pip(&format!(
            "-r {}",
            fixture.root().join("requirements.txt").display()
        ))));
        assert!(runner.called(&format!("{} -c import PIL", fixture.python())));
    }

    #[test]
    fn per_item_fallback_reports_failures() {
        let fixture = Fixture::new("requests>=2.0\n# comment\nopenai\nselenium==4.1\n");
        let runner = ScriptedRunner::new()
            .ok(&fixture.create(), "")
            .fail(
                &fixture.pip(&format!(
                    "-r {}",
                    fixture.root().join("requirements.txt").display()
                )),
                "ERROR: No matching distribution found for selenium==4.1",
            )
            .fail(
                &fixture.pip("selenium==4.1"),
                "ERROR: No matching distribution found for selenium==4.1",
            )
            .fail(
                &format!("{} -c import selenium", fixture.python()),
                "ModuleNotFoundError: No module named 'selenium'",
            )
            .ok_prefix(&fixture.python());

        let report = Materializer::new(&runner, Platform::Linux, "python3")
            .materialize(fixture.root())
            .unwrap();

        assert!(!report.batch_succeeded);
        assert!(runner.called(&fixture.pip("requests>=2.0")));
        assert!(runner.called(&fixture.pip("openai")));
        assert_eq!(report.failed_installs, vec!["selenium".to_owned()]);
        assert_eq!(report.failed_imports, vec!["selenium".to_owned()]);
        assert_eq!(report.warnings().len(), 2);
    }

    #[test]
    fn pip_upgrade_failure_is_a_warning() {
        let fixture = Fixture::new("requests\n");
        let runner = ScriptedRunner::new()
            .ok(&fixture.create(), "")
            .fail(&fixture.pip("--upgrade pip"), "network unreachable")
            .ok_prefix(&fixture.python());
        let report = Materializer::new(&runner, Platform::Linux, "python3")
            .materialize(fixture.root())
            .unwrap();
        assert!(!report.pip_upgraded);
        assert_eq!(report.warnings(), vec!["pip could not be upgraded".to_owned()]);
    }

    #[test]
    fn existing_environment_is_replaced() {
        let fixture = Fixture::new("requests\n");
        let stale = fixture.root().join("venv").join("stale.txt");
        std::fs::create_dir_all(stale.parent().unwrap()).unwrap();
        std::fs::write(&stale, "old").unwrap();

        let runner = ScriptedRunner::new()
            .ok(&fixture.create(), "")
            .ok_prefix(&fixture.python());
        Materializer::new(&runner, Platform::Linux, "python3")
            .materialize(fixture.root())
            .unwrap();
        assert!(!stale.exists());
    }

    #[test]
    fn creation_failure_is_fatal() {
        let fixture = Fixture::new("requests\n");
        let runner = ScriptedRunner::new().fail(
            &fixture.create(),
            "The virtual environment was not created successfully because ensurepip is not available.",
        );
        let error = Materializer::new(&runner, Platform::Linux, "python3")
            .materialize(fixture.root())
            .unwrap_err();
        match &error {
            MaterializeError::Create { detail, .. } => assert!(detail.contains("ensurepip")),
            other => panic!("unexpected error {other}"),
        }
        assert!(error.remedy().contains("python3-venv"));
    }

    #[test]
    fn windows_interpreter_location() {
        let environment = RuntimeEnvironment::in_root(Path::new("root"), Platform::Windows);
        assert_eq!(
            environment.interpreter(),
            Path::new("root")
                .join("venv")
                .join("Scripts")
                .join("python.exe")
        );
    }
}
