use std::{
    net::{TcpStream, ToSocketAddrs},
    path::Path,
    time::Duration,
};

use log::{debug, info};
use regex_lite::Regex;

use super::ProbeError;

const WRITE_PROBE_FILE: &str = ".autoblog-write-test";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Creates `dir` if needed and checks a file can be created and removed in it.
pub fn check_writable(dir: &Path) -> Result<(), ProbeError> {
    let not_writable = |source| ProbeError::NotWritable {
        path: dir.to_path_buf(),
        source,
    };
    std::fs::create_dir_all(dir).map_err(not_writable)?;
    let probe = dir.join(WRITE_PROBE_FILE);
    std::fs::write(&probe, b"").map_err(not_writable)?;
    std::fs::remove_file(&probe).map_err(not_writable)?;
    debug!("{} is writable", dir.display());
    Ok(())
}

/// Closest directory at or above `path` that already exists.
pub fn nearest_existing(path: &Path) -> &Path {
    path.ancestors()
        .find(|ancestor| ancestor.is_dir())
        .unwrap_or_else(|| Path::new("."))
}

pub fn check_free_space(dir: &Path, required_mb: u64) -> Result<(), ProbeError> {
    let available = fs4::available_space(dir).map_err(|source| ProbeError::NotWritable {
        path: dir.to_path_buf(),
        source,
    })?;
    let available_mb = available / (1024 * 1024);
    if available_mb < required_mb {
        return Err(ProbeError::InsufficientSpace {
            path: dir.to_path_buf(),
            available_mb,
            required_mb,
        });
    }
    debug!("{} MiB free in {}", available_mb, dir.display());
    Ok(())
}

/// Host and port a git remote URL connects to. Local paths and `file://` URLs yield `None`.
pub fn remote_endpoint(url: &str) -> Option<(String, u16)> {
    let with_scheme =
        Regex::new(r"^(?P<scheme>[a-z][a-z0-9+]*)://(?:[^@/]+@)?(?P<host>[^/:]+)(?::(?P<port>\d+))?")
            .ok()?;
    if let Some(captures) = with_scheme.captures(url) {
        let scheme = captures.name("scheme")?.as_str();
        let default_port = match scheme {
            "https" => 443,
            "http" => 80,
            "ssh" | "git+ssh" => 22,
            "git" => 9418,
            _ => return None,
        };
        let host = captures.name("host")?.as_str().to_owned();
        let port = captures
            .name("port")
            .and_then(|port| port.as_str().parse().ok())
            .unwrap_or(default_port);
        return Some((host, port));
    }
    if url.contains("://") {
        return None;
    }

    // scp-like syntax: git@github.com:owner/repo.git
    let scp_like = Regex::new(r"^(?:[^@/]+@)?(?P<host>[^/:]{2,}):").ok()?;
    scp_like
        .captures(url)
        .and_then(|captures| captures.name("host"))
        .map(|host| (host.as_str().to_owned(), 22))
}

pub fn check_connectivity(url: &str) -> Result<(), ProbeError> {
    let Some((host, port)) = remote_endpoint(url) else {
        debug!("{} is local, skipping the connectivity check", url);
        return Ok(());
    };
    let unreachable = |source| ProbeError::Unreachable {
        host: host.clone(),
        port,
        source,
    };
    let addresses = (host.as_str(), port)
        .to_socket_addrs()
        .map_err(unreachable)?
        .collect::<Vec<_>>();

    let mut last_error = std::io::Error::new(
        std::io::ErrorKind::NotFound,
        "host name resolved to no addresses",
    );
    for address in addresses {
        match TcpStream::connect_timeout(&address, CONNECT_TIMEOUT) {
            Ok(_) => {
                info!("{}:{} is reachable", host, port);
                return Ok(());
            }
            Err(error) => {
                debug!("Connecting to {} failed: {}", address, error);
                last_error = error;
            }
        }
    }
    Err(unreachable(last_error))
}
