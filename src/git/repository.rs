use std::path::Path;

use git2::{
    build::{CheckoutBuilder, RepoBuilder},
    BranchType, ErrorCode, Oid, Repository, Signature, StashFlags,
};
use log::{debug, info, trace, warn};
use thiserror::Error;

use super::remote::GitTransport;

const REMOTE_NAME: &str = "origin";
/// Branches probed, in order, when the remote does not say which one is the default.
pub const FALLBACK_BRANCHES: &[&str] = &["main", "master"];

#[derive(Error, Debug)]
pub enum GitError {
    #[error("Git error: {0}")]
    Git(#[from] git2::Error),
    #[error("Could not clone {url}: {source}")]
    Clone { url: String, source: git2::Error },
    #[error("Could not fetch from {url}: {source}")]
    Fetch { url: String, source: git2::Error },
    #[error("Could not determine the default branch of {url}; tried {}", tried.join(", "))]
    BranchUnresolved { url: String, tried: Vec<String> },
    #[error("Local history has diverged from origin/{branch}")]
    Diverged { branch: String },
    #[error("Could not check out origin/{branch}: {source}")]
    Checkout { branch: String, source: git2::Error },
    #[error("The existing checkout follows {found}, not {expected}")]
    ForeignCheckout { found: String, expected: String },
}

/// A working copy with an `origin` remote, as produced by [`InstallRepository::clone`].
pub struct InstallRepository {
    git_repo: Repository,
}

impl InstallRepository {
    pub fn new(git_repo: Repository) -> InstallRepository {
        InstallRepository { git_repo }
    }

    pub fn open(path: &Path) -> Result<InstallRepository, GitError> {
        trace!("Opening existing repository at {}", path.display());
        Ok(Self::new(Repository::open(path)?))
    }

    /// True when `path` itself holds a repository; parent directories are not searched.
    pub fn is_repository(path: &Path) -> bool {
        Repository::open(path).is_ok()
    }

    pub fn clone(
        url: &str,
        path: &Path,
        transport: &GitTransport,
    ) -> Result<InstallRepository, GitError> {
        info!("Cloning {} into {}", url, path.display());
        let git_repo = RepoBuilder::new()
            .fetch_options(transport.fetch_options())
            .clone(url, path)
            .map_err(|source| GitError::Clone {
                url: url.to_owned(),
                source,
            })?;
        Ok(Self::new(git_repo))
    }

    pub fn remote_url(&self) -> Result<String, GitError> {
        let remote = self.git_repo.find_remote(REMOTE_NAME)?;
        Ok(remote.url().unwrap_or_default().to_owned())
    }

    /// Fails when `origin` names a different repository than `url`. The remote is never rewritten.
    pub fn check_origin(&self, url: &str) -> Result<(), GitError> {
        let current = self.remote_url()?;
        if repository_identity(&current) != repository_identity(url) {
            return Err(GitError::ForeignCheckout {
                found: current,
                expected: url.to_owned(),
            });
        }
        if current != url {
            debug!("origin {} is another spelling of {}", current, url);
        }
        Ok(())
    }

    /// Updates the remote-tracking refs without touching the working tree.
    ///
    /// Returns the branch the remote advertises as its HEAD, when it does.
    pub fn fetch(&self, transport: &GitTransport) -> Result<Option<String>, GitError> {
        let mut remote = self.git_repo.find_remote(REMOTE_NAME)?;
        let url = remote.url().unwrap_or_default().to_owned();
        let refspecs: Vec<String> = remote
            .fetch_refspecs()?
            .iter()
            .flatten()
            .map(str::to_owned)
            .collect();
        debug!("Fetching {:?} from {}", refspecs, url);
        remote
            .fetch(&refspecs, Some(&mut transport.fetch_options()), None)
            .map_err(|source| GitError::Fetch { url, source })?;

        let advertised = remote
            .default_branch()
            .ok()
            .and_then(|name| name.as_str().map(str::to_owned))
            .map(|name| name.trim_start_matches("refs/heads/").to_owned());
        trace!("Remote advertised default branch {:?}", advertised);
        Ok(advertised)
    }

    /// Picks the branch to follow: the advertised HEAD, the recorded `origin/HEAD`,
    /// then each of [`FALLBACK_BRANCHES`]. Only branches that exist under `origin/` count.
    pub fn resolve_default_branch(&self, advertised: Option<&str>) -> Result<String, GitError> {
        let mut tried = Vec::new();
        let recorded = self.recorded_remote_head();
        let candidates = advertised
            .map(str::to_owned)
            .into_iter()
            .chain(recorded)
            .chain(FALLBACK_BRANCHES.iter().map(|branch| branch.to_string()));

        for candidate in candidates {
            if self.remote_branch_head(&candidate)?.is_some() {
                debug!("Following origin/{}", candidate);
                return Ok(candidate);
            }
            tried.push(candidate);
        }

        Err(GitError::BranchUnresolved {
            url: self.remote_url()?,
            tried,
        })
    }

    fn recorded_remote_head(&self) -> Option<String> {
        let reference = self
            .git_repo
            .find_reference(&format!("refs/remotes/{REMOTE_NAME}/HEAD"))
            .ok()?;
        let target = reference.symbolic_target()?;
        target
            .strip_prefix(&format!("refs/remotes/{REMOTE_NAME}/"))
            .map(str::to_owned)
    }

    pub fn remote_branch_head(&self, branch: &str) -> Result<Option<Oid>, GitError> {
        match self
            .git_repo
            .refname_to_id(&format!("refs/remotes/{REMOTE_NAME}/{branch}"))
        {
            Ok(oid) => Ok(Some(oid)),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Commit checked out in the working copy, `None` for an unborn HEAD.
    pub fn local_head(&self) -> Result<Option<Oid>, GitError> {
        match self.git_repo.head() {
            Ok(head) => Ok(Some(head.peel_to_commit()?.id())),
            Err(e) if e.code() == ErrorCode::UnbornBranch || e.code() == ErrorCode::NotFound => {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Shelves uncommitted changes under `label`. Best effort: returns whether
    /// anything was stashed and never fails.
    pub fn stash_local_changes(&mut self, label: &str) -> bool {
        let signature = self
            .git_repo
            .signature()
            .or_else(|_| Signature::now("autoblog-install", "autoblog-install@localhost"));
        let signature = match signature {
            Ok(signature) => signature,
            Err(error) => {
                debug!("No signature available for stashing: {}", error);
                return false;
            }
        };
        match self
            .git_repo
            .stash_save(&signature, label, Some(StashFlags::DEFAULT))
        {
            Ok(oid) => {
                info!("Saved local changes as stash {} ({})", oid, label);
                true
            }
            Err(e) if e.code() == ErrorCode::NotFound => {
                debug!("No local changes to stash");
                false
            }
            Err(e) => {
                warn!("Could not stash local changes: {}", e);
                false
            }
        }
    }

    /// Advances `branch` to `target` and checks it out. Fails instead of merging
    /// when the local head is not an ancestor of `target`.
    pub fn fast_forward(&self, branch: &str, target: Oid) -> Result<(), GitError> {
        if let Some(local) = self.local_head()? {
            if local != target && !self.git_repo.graph_descendant_of(target, local)? {
                return Err(GitError::Diverged {
                    branch: branch.to_owned(),
                });
            }
        }

        let target_commit = self.git_repo.find_commit(target)?;
        self.git_repo
            .checkout_tree(
                target_commit.as_object(),
                Some(CheckoutBuilder::new().safe()),
            )
            .map_err(|source| GitError::Checkout {
                branch: branch.to_owned(),
                source,
            })?;

        let message = format!("autoblog-install: fast-forward to {target}");
        match self.git_repo.find_branch(branch, BranchType::Local) {
            Ok(local_branch) => {
                local_branch.into_reference().set_target(target, &message)?;
            }
            Err(e) if e.code() == ErrorCode::NotFound => {
                let mut created = self.git_repo.branch(branch, &target_commit, false)?;
                created.set_upstream(Some(&format!("{REMOTE_NAME}/{branch}")))?;
            }
            Err(e) => return Err(e.into()),
        }
        self.git_repo.set_head(&format!("refs/heads/{branch}"))?;
        Ok(())
    }

    #[cfg(test)]
    pub fn stash_count(&mut self) -> Result<usize, GitError> {
        let mut count = 0;
        self.git_repo.stash_foreach(|_, _, _| {
            count += 1;
            true
        })?;
        Ok(count)
    }

    pub fn git_repo(&self) -> &Repository {
        &self.git_repo
    }
}

/// Host and path of a remote, so that https, ssh and scp-like spellings of one
/// repository compare equal. Local paths are kept as they are.
fn repository_identity(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    let trimmed = trimmed.strip_suffix(".git").unwrap_or(trimmed);
    let location = match trimmed.split_once("://") {
        Some((_, rest)) => rest.to_owned(),
        None => match trimmed.split_once(':') {
            // scp-like `user@host:path`; a single letter before the colon is a Windows drive
            Some((host, path)) if host.len() > 1 && !host.contains('/') => format!("{host}/{path}"),
            _ => return trimmed.to_owned(),
        },
    };
    let location = location
        .split_once('@')
        .filter(|(user, _)| !user.contains('/'))
        .map_or(location.as_str(), |(_, rest)| rest);
    location.to_lowercase()
}


#[cfg(test)]
mod tests {
    use super::testing::{commit_file, upstream};
    use super::*;

    use pretty_assertions::assert_eq;

    fn transport() -> GitTransport {
        GitTransport::new(git2::Config::new().unwrap())
    }

    #[test]
    fn clone_fetch_and_fast_forward() {
        let dir = tempfile::tempdir().unwrap();
        let remote = upstream(&dir.path().join("remote"), "main", &["gui_blogger.py"]);
        let url = dir.path().join("remote").to_string_lossy().into_owned();

        let local = InstallRepository::clone(&url, &dir.path().join("local"), &transport()).unwrap();
        let first = local.local_head().unwrap();

        let second = commit_file(&remote, "automation_engine.py", "pass\n", "Add engine");
        local.fetch(&transport()).unwrap();
        let branch = local.resolve_default_branch(None).unwrap();
        assert_eq!(branch, "main");
        assert_eq!(local.remote_branch_head(&branch).unwrap(), Some(second));
        assert_ne!(first, Some(second));

        local.fast_forward(&branch, second).unwrap();
        assert_eq!(local.local_head().unwrap(), Some(second));
        assert!(dir.path().join("local").join("automation_engine.py").exists());
    }

    #[test]
    fn falls_back_to_master() {
        let dir = tempfile::tempdir().unwrap();
        upstream(&dir.path().join("remote"), "master", &["gui_blogger.py"]);
        let url = dir.path().join("remote").to_string_lossy().into_owned();
        let local = InstallRepository::clone(&url, &dir.path().join("local"), &transport()).unwrap();
        local
            .git_repo()
            .find_reference("refs/remotes/origin/HEAD")
            .and_then(|mut reference| reference.delete())
            .ok();

        assert_eq!(local.resolve_default_branch(None).unwrap(), "master");
        assert_eq!(
            local.resolve_default_branch(Some("develop")).unwrap(),
            "master"
        );
    }

    #[test]
    fn unresolvable_branch() {
        let dir = tempfile::tempdir().unwrap();
        upstream(&dir.path().join("remote"), "trunk", &["gui_blogger.py"]);
        let url = dir.path().join("remote").to_string_lossy().into_owned();
        let local = InstallRepository::clone(&url, &dir.path().join("local"), &transport()).unwrap();
        local
            .git_repo()
            .find_reference("refs/remotes/origin/HEAD")
            .and_then(|mut reference| reference.delete())
            .ok();

        match local.resolve_default_branch(None).unwrap_err() {
            GitError::BranchUnresolved { tried, .. } => {
                assert_eq!(tried, vec!["main".to_owned(), "master".to_owned()])
            }
            other => panic!("unexpected error {other}"),
        }
        assert_eq!(
            local.resolve_default_branch(Some("trunk")).unwrap(),
            "trunk"
        );
    }

    #[test]
    fn diverged_history_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let remote = upstream(&dir.path().join("remote"), "main", &["gui_blogger.py"]);
        let url = dir.path().join("remote").to_string_lossy().into_owned();
        let local = InstallRepository::clone(&url, &dir.path().join("local"), &transport()).unwrap();

        commit_file(local.git_repo(), "local.txt", "mine\n", "Local commit");
        let theirs = commit_file(&remote, "remote.txt", "theirs\n", "Remote commit");
        local.fetch(&transport()).unwrap();

        let error = local.fast_forward("main", theirs).unwrap_err();
        assert!(matches!(error, GitError::Diverged { .. }));
    }

    #[test]
    fn stash_is_best_effort() {
        let dir = tempfile::tempdir().unwrap();
        upstream(&dir.path().join("remote"), "main", &["gui_blogger.py"]);
        let url = dir.path().join("remote").to_string_lossy().into_owned();
        let mut local =
            InstallRepository::clone(&url, &dir.path().join("local"), &transport()).unwrap();

        assert!(!local.stash_local_changes("nothing to keep"));
        std::fs::write(dir.path().join("local").join("gui_blogger.py"), "edited\n").unwrap();
        assert!(local.stash_local_changes("keep my edit"));
        assert_eq!(local.stash_count().unwrap(), 1);
    }

    #[test]
    fn remote_spellings_of_one_repository() {
        let https = repository_identity("https://github.com/AryanVBW/AUTO-blogger.git");
        assert_eq!(https, "github.com/aryanvbw/auto-blogger");
        assert_eq!(
            repository_identity("git@github.com:AryanVBW/AUTO-blogger.git"),
            https
        );
        assert_eq!(
            repository_identity("ssh://git@github.com/AryanVBW/AUTO-blogger/"),
            https
        );
        assert_ne!(
            repository_identity("https://github.com/someone/else.git"),
            https
        );
        assert_eq!(repository_identity("/srv/git/autoblog"), "/srv/git/autoblog");
        assert_eq!(repository_identity("C:\\src\\autoblog"), "C:\\src\\autoblog");
    }
}
