pub mod decision;

use std::{
    fmt::{self, Display},
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use git2::Oid;
use log::{debug, info, warn};
use thiserror::Error;

use crate::git::{GitError, GitTransport, InstallRepository};

/// Files a usable checkout must contain, relative to the installation root.
pub const DEFAULT_EXPECTED_FILES: &[&str] =
    &["gui_blogger.py", "automation_engine.py", "requirements.txt"];

#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Git(#[from] GitError),
    #[error("{} is missing expected files: {}", root.display(), missing.join(", "))]
    MissingFiles { root: PathBuf, missing: Vec<String> },
    #[error("Installation cancelled by operator")]
    Cancelled,
    #[error("IO error at {}: {source}", path.display())]
    IO {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl SyncError {
    pub fn remedy(&self) -> String {
        match self {
            SyncError::Git(GitError::Clone { .. }) | SyncError::Git(GitError::Fetch { .. }) => {
                "Check the network connection and the repository URL, then re-run the installer."
                    .to_owned()
            }
            SyncError::Git(GitError::BranchUnresolved { .. }) => {
                "The remote has neither a default branch nor main/master; check the repository URL."
                    .to_owned()
            }
            SyncError::Git(GitError::Diverged { .. }) => {
                "Local commits conflict with the update. Remove the installation directory and re-run the installer."
                    .to_owned()
            }
            SyncError::Git(GitError::Checkout { .. }) => {
                "Local files would be overwritten by the update. Move them aside or reinstall."
                    .to_owned()
            }
            SyncError::Git(GitError::ForeignCheckout { .. }) => {
                "Move that checkout elsewhere or pass a different --install-dir, then re-run the installer."
                    .to_owned()
            }
            SyncError::Git(GitError::Git(_)) => {
                "The existing checkout looks damaged. Choose reinstall or remove the directory and re-run."
                    .to_owned()
            }
            SyncError::MissingFiles { root, .. } => format!(
                "The installation at {} is damaged. Remove it (or choose reinstall) and re-run the installer.",
                root.display()
            ),
            SyncError::Cancelled => {
                "Re-run the installer and choose update or reinstall.".to_owned()
            }
            SyncError::IO { path, .. } => {
                format!("Check that {} is writable and not in use.", path.display())
            }
        }
    }

    fn io(path: &Path) -> impl FnOnce(std::io::Error) -> SyncError + '_ {
        move |source| SyncError::IO {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetState {
    Absent,
    PresentVcs,
    PresentNonVcs,
}

impl TargetState {
    /// An empty directory counts as absent.
    pub fn inspect(path: &Path) -> TargetState {
        if !path.exists() {
            return TargetState::Absent;
        }
        if InstallRepository::is_repository(path) {
            return TargetState::PresentVcs;
        }
        match std::fs::read_dir(path) {
            Ok(mut entries) => {
                if entries.next().is_none() {
                    TargetState::Absent
                } else {
                    TargetState::PresentNonVcs
                }
            }
            Err(_) => TargetState::PresentNonVcs,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallationTarget {
    pub path: PathBuf,
    pub state: TargetState,
}

impl InstallationTarget {
    pub fn inspect(path: impl Into<PathBuf>) -> InstallationTarget {
        let path = path.into();
        let state = TargetState::inspect(&path);
        debug!("{} is {:?}", path.display(), state);
        InstallationTarget { path, state }
    }
}

/// The repository an installation follows. The branch is only known once resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteReference {
    pub url: String,
    pub branch: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDecision {
    CloneFresh,
    UpdateInPlace,
    ReplaceAndClone,
    Abort,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Cloned {
        branch: String,
        revision: Oid,
    },
    /// `backup` is kept only when the replaced directory was not a checkout.
    Replaced {
        branch: String,
        revision: Oid,
        backup: Option<PathBuf>,
    },
    UpToDate {
        branch: String,
        revision: Oid,
    },
    Updated {
        branch: String,
        from: Option<Oid>,
        to: Oid,
        stashed: bool,
    },
}

impl SyncOutcome {
    pub fn branch(&self) -> &str {
        match self {
            SyncOutcome::Cloned { branch, .. }
            | SyncOutcome::Replaced { branch, .. }
            | SyncOutcome::UpToDate { branch, .. }
            | SyncOutcome::Updated { branch, .. } => branch,
        }
    }

    pub fn revision(&self) -> Oid {
        match self {
            SyncOutcome::Cloned { revision, .. }
            | SyncOutcome::Replaced { revision, .. }
            | SyncOutcome::UpToDate { revision, .. } => *revision,
            SyncOutcome::Updated { to, .. } => *to,
        }
    }
}

impl Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncOutcome::Cloned { branch, revision } => {
                write!(f, "cloned {} at {}", branch, short(*revision))
            }
            SyncOutcome::Replaced {
                branch, revision, ..
            } => write!(f, "reinstalled {} at {}", branch, short(*revision)),
            SyncOutcome::UpToDate { branch, revision } => {
                write!(f, "{} already up to date at {}", branch, short(*revision))
            }
            SyncOutcome::Updated {
                branch, from, to, ..
            } => match from {
                Some(from) => write!(
                    f,
                    "updated {} from {} to {}",
                    branch,
                    short(*from),
                    short(*to)
                ),
                None => write!(f, "updated {} to {}", branch, short(*to)),
            },
        }
    }
}

pub fn short(oid: Oid) -> String {
    let mut text = oid.to_string();
    text.truncate(7);
    text
}

/// Fails with every expected file that is not a regular file under `root`.
pub fn verify_expected_files<S: AsRef<str>>(root: &Path, expected: &[S]) -> Result<(), SyncError> {
    let missing: Vec<String> = expected
        .iter()
        .map(|file| file.as_ref())
        .filter(|file| !root.join(file).is_file())
        .map(str::to_owned)
        .collect();
    if missing.is_empty() {
        debug!("All expected files present in {}", root.display());
        Ok(())
    } else {
        Err(SyncError::MissingFiles {
            root: root.to_path_buf(),
            missing,
        })
    }
}

/// Brings an installation directory in line with a remote repository.
pub struct Synchronizer<'a> {
    remote: RemoteReference,
    transport: &'a GitTransport,
    expected_files: Vec<String>,
}

impl<'a> Synchronizer<'a> {
    pub fn new(url: impl Into<String>, transport: &'a GitTransport) -> Self {
        Synchronizer {
            remote: RemoteReference {
                url: url.into(),
                branch: None,
            },
            transport,
            expected_files: DEFAULT_EXPECTED_FILES
                .iter()
                .map(|file| file.to_string())
                .collect(),
        }
    }

    pub fn with_expected_files(mut self, expected_files: Vec<String>) -> Self {
        self.expected_files = expected_files;
        self
    }

    /// The followed remote with the branch this run settled on.
    pub fn resolved_remote(&self, outcome: &SyncOutcome) -> RemoteReference {
        RemoteReference {
            url: self.remote.url.clone(),
            branch: Some(outcome.branch().to_owned()),
        }
    }

    pub fn synchronize(
        &self,
        target: &Path,
        decision: SyncDecision,
    ) -> Result<SyncOutcome, SyncError> {
        match decision {
            SyncDecision::Abort => Err(SyncError::Cancelled),
            SyncDecision::CloneFresh => {
                let (branch, revision, _) = self.clone_into_place(target)?;
                Ok(SyncOutcome::Cloned { branch, revision })
            }
            SyncDecision::ReplaceAndClone => self.replace(target),
            SyncDecision::UpdateInPlace => self.update(target),
        }
    }

    fn update(&self, target: &Path) -> Result<SyncOutcome, SyncError> {
        let mut repo = InstallRepository::open(target)?;
        repo.check_origin(&self.remote.url)?;
        let advertised = repo.fetch(self.transport)?;
        let branch = repo.resolve_default_branch(advertised.as_deref())?;
        let remote_head = repo
            .remote_branch_head(&branch)?
            .ok_or_else(|| GitError::BranchUnresolved {
                url: self.remote.url.clone(),
                tried: vec![branch.clone()],
            })?;
        let local_head = repo.local_head()?;

        let outcome = if local_head == Some(remote_head) {
            info!("{} is up to date with origin/{}", target.display(), branch);
            SyncOutcome::UpToDate {
                branch,
                revision: remote_head,
            }
        } else {
            let label = format!(
                "autoblog-install: local changes before update to {}",
                short(remote_head)
            );
            let stashed = repo.stash_local_changes(&label);
            repo.fast_forward(&branch, remote_head)?;
            SyncOutcome::Updated {
                branch,
                from: local_head,
                to: remote_head,
                stashed,
            }
        };
        verify_expected_files(target, &self.expected_files)?;
        Ok(outcome)
    }

    fn replace(&self, target: &Path) -> Result<SyncOutcome, SyncError> {
        let (branch, revision, backup) = self.clone_into_place(target)?;
        Ok(SyncOutcome::Replaced {
            branch,
            revision,
            backup,
        })
    }

    /// Clones into a sibling directory and renames it over `target` only once the
    /// checkout is complete. A failure leaves `target` as it was.
    ///
    /// A directory that was not a checkout is moved aside and its new location returned.
    fn clone_into_place(
        &self,
        target: &Path,
    ) -> Result<(String, Oid, Option<PathBuf>), SyncError> {
        let partial = sibling(target, |name| format!(".{name}.partial"))?;
        if partial.exists() {
            debug!("Removing leftover {}", partial.display());
            std::fs::remove_dir_all(&partial).map_err(SyncError::io(&partial))?;
        }

        // Missing files are reported against the path the operator knows about
        let cloned = self.checkout_fresh(&partial).and_then(|head| {
            match verify_expected_files(&partial, &self.expected_files) {
                Ok(()) => Ok(head),
                Err(SyncError::MissingFiles { missing, .. }) => Err(SyncError::MissingFiles {
                    root: target.to_path_buf(),
                    missing,
                }),
                Err(error) => Err(error),
            }
        });
        let (branch, revision) = match cloned {
            Ok(head) => head,
            Err(error) => {
                if let Err(cleanup) = std::fs::remove_dir_all(&partial) {
                    debug!("Could not remove {}: {}", partial.display(), cleanup);
                }
                return Err(error);
            }
        };

        match TargetState::inspect(target) {
            TargetState::Absent if target.exists() => {
                std::fs::remove_dir(target).map_err(SyncError::io(target))?;
            }
            TargetState::Absent => {}
            TargetState::PresentVcs => {
                let old = backup_path(target)?;
                swap_into_place(&partial, target, &old)?;
                if let Err(error) = std::fs::remove_dir_all(&old) {
                    warn!(
                        "Could not remove the previous installation at {}: {}",
                        old.display(),
                        error
                    );
                }
                return Ok((branch, revision, None));
            }
            TargetState::PresentNonVcs => {
                let backup = backup_path(target)?;
                swap_into_place(&partial, target, &backup)?;
                warn!(
                    "Moved the existing directory {} to {}",
                    target.display(),
                    backup.display()
                );
                return Ok((branch, revision, Some(backup)));
            }
        }
        std::fs::rename(&partial, target).map_err(SyncError::io(target))?;
        Ok((branch, revision, None))
    }

    fn checkout_fresh(&self, path: &Path) -> Result<(String, Oid), SyncError> {
        let repo = InstallRepository::clone(&self.remote.url, path, self.transport)?;
        let branch = repo.resolve_default_branch(None)?;
        let revision = repo
            .remote_branch_head(&branch)?
            .ok_or_else(|| GitError::BranchUnresolved {
                url: self.remote.url.clone(),
                tried: vec![branch.clone()],
            })?;
        // The remote HEAD may name a branch that does not exist
        if repo.local_head()? != Some(revision) {
            repo.fast_forward(&branch, revision)?;
        }
        info!("Cloned {} at {}", branch, short(revision));
        Ok((branch, revision))
    }
}

fn sibling(target: &Path, name: impl FnOnce(&str) -> String) -> Result<PathBuf, SyncError> {
    let file_name = target
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| SyncError::IO {
            path: target.to_path_buf(),
            source: std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "installation path has no directory name",
            ),
        })?;
    Ok(target.with_file_name(name(&file_name)))
}

/// Moves `target` to `aside` and `partial` into its place. When the second move fails
/// `target` is moved back, so the previous installation stays where it was.
fn swap_into_place(partial: &Path, target: &Path, aside: &Path) -> Result<(), SyncError> {
    std::fs::rename(target, aside).map_err(SyncError::io(target))?;
    if let Err(source) = std::fs::rename(partial, target) {
        if let Err(restore) = std::fs::rename(aside, target) {
            warn!(
                "Could not move {} back to {}: {}",
                aside.display(),
                target.display(),
                restore
            );
        }
        return Err(SyncError::IO {
            path: target.to_path_buf(),
            source,
        });
    }
    Ok(())
}

/// `<name>.backup-<unix seconds>`, suffixed further if that already exists.
fn backup_path(target: &Path) -> Result<PathBuf, SyncError> {
    let seconds = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default();
    let mut candidate = sibling(target, |name| format!("{name}.backup-{seconds}"))?;
    let mut attempt = 1;
    while candidate.exists() {
        candidate = sibling(target, |name| format!("{name}.backup-{seconds}-{attempt}"))?;
        attempt += 1;
    }
    Ok(candidate)
}
