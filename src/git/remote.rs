use std::path::{Path, PathBuf};

use git2::{
    cert::Cert, AutotagOption, CertificateCheckStatus, Config, Cred, CredentialType,
    FetchOptions, RemoteCallbacks,
};
use log::trace;
use regex_lite::Regex;
use ssh_key::{known_hosts::HostPatterns, KnownHosts};

const GLOBAL_KNOWN_HOSTS: &str = "/etc/ssh/ssh_known_hosts";

/// Authentication and certificate handling shared by clone and fetch.
pub struct GitTransport {
    git_config: Config,
}

impl GitTransport {
    pub fn new(git_config: Config) -> GitTransport {
        GitTransport { git_config }
    }

    /// Uses the user's git configuration for credential helpers.
    pub fn from_default_config() -> Result<GitTransport, git2::Error> {
        Ok(Self::new(Config::open_default()?))
    }

    pub fn callbacks(&self) -> RemoteCallbacks<'_> {
        let mut callbacks = RemoteCallbacks::new();
        callbacks.credentials(move |url, username, allowed| {
            trace!("{} asks for {:?} credentials (user {:?})", url, allowed, username);
            if allowed.contains(CredentialType::USERNAME) {
                Cred::username("git")
            } else if allowed.contains(CredentialType::SSH_KEY) {
                Cred::ssh_key_from_agent(username.unwrap_or("git"))
            } else if allowed.contains(CredentialType::USER_PASS_PLAINTEXT) {
                Cred::credential_helper(&self.git_config, url, username)
            } else {
                Err(git2::Error::from_str(&format!(
                    "cannot provide {allowed:?} credentials for {url}"
                )))
            }
        });
        callbacks.certificate_check(|certificate, host| Ok(trust_host_key(certificate, host)));
        callbacks
    }

    pub fn fetch_options(&self) -> FetchOptions<'_> {
        let mut fetch_options = FetchOptions::new();
        fetch_options
            .remote_callbacks(self.callbacks())
            .download_tags(AutotagOption::None);
        fetch_options
    }
}

/// Accepts an ssh host key listed in a known-hosts file. Anything else is left to libgit2.
fn trust_host_key(certificate: &Cert<'_>, host: &str) -> CertificateCheckStatus {
    let Some(hostkey) = certificate.as_hostkey().and_then(|key| key.hostkey()) else {
        return CertificateCheckStatus::CertificatePassthrough;
    };
    let host = host.to_lowercase();
    if known_hosts_files()
        .iter()
        .any(|file| lists_host_key(file, &host, hostkey))
    {
        CertificateCheckStatus::CertificateOk
    } else {
        CertificateCheckStatus::CertificatePassthrough
    }
}

fn known_hosts_files() -> Vec<PathBuf> {
    let mut files = vec![PathBuf::from(GLOBAL_KNOWN_HOSTS)];
    if let Some(home) = home::home_dir() {
        files.push(home.join(".ssh").join("known_hosts"));
    }
    files
}

fn lists_host_key(file: &Path, host: &str, hostkey: &[u8]) -> bool {
    let entries = match KnownHosts::read_file(file) {
        Ok(entries) => entries,
        Err(error) => {
            trace!("Skipping {}: {}", file.display(), error);
            return false;
        }
    };
    let listed = entries
        .iter()
        .filter(|entry| host_listed(host, entry.host_patterns()))
        .any(|entry| entry.public_key().to_bytes().as_deref() == Ok(hostkey));
    trace!("{} lists a matching key for {}: {}", file.display(), host, listed);
    listed
}

/// A negated pattern that matches excludes the host even when another pattern lists it.
/// Hashed host names are never matched.
fn host_listed(host: &str, patterns: &HostPatterns) -> bool {
    let HostPatterns::Patterns(patterns) = patterns else {
        return false;
    };
    let mut listed = false;
    for pattern in patterns.iter().map(|pattern| pattern.to_lowercase()) {
        match pattern.strip_prefix('!') {
            Some(negated) if wildcard_match(negated, host) => return false,
            Some(_) => {}
            None => listed |= wildcard_match(&pattern, host),
        }
    }
    listed
}

/// OpenSSH host pattern: `*` is any run of characters, `?` exactly one.
fn wildcard_match(pattern: &str, host: &str) -> bool {
    let expression = regex_lite::escape(pattern)
        .replace(r"\*", ".*")
        .replace(r"\?", ".");
    Regex::new(&format!("^{expression}$")).is_ok_and(|regex| regex.is_match(host))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negated_pattern_wins() {
        let patterns = HostPatterns::Patterns(vec![
            "github.com".to_owned(),
            "!github.com".to_owned(),
        ]);
        assert!(!host_listed("github.com", &patterns));
    }

    #[test]
    fn plain_pattern_matches_case_insensitively() {
        let patterns = HostPatterns::Patterns(vec!["GitHub.com".to_owned()]);
        assert!(host_listed("github.com", &patterns));
        assert!(!host_listed("gitlab.com", &patterns));
    }

    #[test]
    fn wildcards_follow_openssh_rules() {
        let patterns = HostPatterns::Patterns(vec![
            "*.example.com".to_owned(),
            "git?.internal".to_owned(),
            "!secret.example.com".to_owned(),
        ]);
        assert!(host_listed("git.example.com", &patterns));
        assert!(host_listed("git1.internal", &patterns));
        assert!(!host_listed("git12.internal", &patterns));
        assert!(!host_listed("secret.example.com", &patterns));
        assert!(!host_listed("example.com", &patterns));
    }
}
