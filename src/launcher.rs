use std::path::{Path, PathBuf};

use log::{debug, info};
use thiserror::Error;

use crate::{materialize::VENV_DIR, probe::Platform};

pub const LAUNCHER_NAME: &str = "autoblog";
pub const ENTRY_POINT: &str = "gui_blogger.py";
const SYSTEM_BIN_DIR: &str = "/usr/local/bin";

#[derive(Error, Debug)]
#[error("Could not write launcher {}: {source}", path.display())]
pub struct LauncherError {
    path: PathBuf,
    source: std::io::Error,
}

impl LauncherError {
    pub fn remedy(&self) -> String {
        format!(
            "Start the application with {} {} from the installation directory.",
            Path::new(VENV_DIR).join("bin").join("python").display(),
            ENTRY_POINT
        )
    }
}

/// Launchers written into an installation root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Launchers {
    pub script: PathBuf,
    pub batch: Option<PathBuf>,
    pub system_link: Option<PathBuf>,
}

pub fn shell_script() -> String {
    format!(
        r#"#!/bin/sh
# Starts AUTO-blogger with its private Python environment.
ROOT="$(cd "$(dirname "$0")" && pwd -P)"
if [ -L "$0" ]; then
    ROOT="$(cd "$(dirname "$(readlink "$0")")" && pwd -P)"
fi
PYTHON="$ROOT/{VENV_DIR}/bin/python"
if [ ! -x "$PYTHON" ]; then
    echo "The AUTO-blogger environment is missing; re-run the installer." >&2
    exit 1
fi
cd "$ROOT" || exit 1
exec "$PYTHON" "$ROOT/{ENTRY_POINT}" "$@"
"#
    )
}

pub fn batch_script() -> String {
    format!(
        "@echo off\r\n\
         set ROOT=%~dp0\r\n\
         if not exist \"%ROOT%{VENV_DIR}\\Scripts\\python.exe\" (\r\n\
         \x20   echo The AUTO-blogger environment is missing; re-run the installer. 1>&2\r\n\
         \x20   exit /b 1\r\n\
         )\r\n\
         cd /d \"%ROOT%\"\r\n\
         \"%ROOT%{VENV_DIR}\\Scripts\\python.exe\" \"%ROOT%{ENTRY_POINT}\" %*\r\n"
    )
}

/// Writes the launchers for `platform` into `root`. Linking into the system
/// bin directory is attempted only when `system_link` is set and never fails the call.
pub fn write_launchers(
    root: &Path,
    platform: Platform,
    system_link: bool,
) -> Result<Launchers, LauncherError> {
    let script = root.join(LAUNCHER_NAME);
    write_file(&script, &shell_script())?;
    make_executable(&script)?;
    info!("Wrote launcher {}", script.display());

    let batch = if platform == Platform::Windows {
        let batch = root.join(format!("{LAUNCHER_NAME}.bat"));
        write_file(&batch, &batch_script())?;
        info!("Wrote launcher {}", batch.display());
        Some(batch)
    } else {
        None
    };

    let system_link = if system_link && platform != Platform::Windows {
        link_into(&script, Path::new(SYSTEM_BIN_DIR))
    } else {
        None
    };

    Ok(Launchers {
        script,
        batch,
        system_link,
    })
}

fn write_file(path: &Path, contents: &str) -> Result<(), LauncherError> {
    std::fs::write(path, contents).map_err(|source| LauncherError {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<(), LauncherError> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).map_err(|source| {
        LauncherError {
            path: path.to_path_buf(),
            source,
        }
    })
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<(), LauncherError> {
    Ok(())
}

/// Best effort: any problem is logged at debug level and yields `None`.
#[cfg(unix)]
fn link_into(script: &Path, bin_dir: &Path) -> Option<PathBuf> {
    let link = bin_dir.join(LAUNCHER_NAME);
    if let Ok(existing) = std::fs::read_link(&link) {
        if existing == script {
            debug!("{} already points to {}", link.display(), script.display());
            return Some(link);
        }
        if let Err(error) = std::fs::remove_file(&link) {
            debug!("Could not replace {}: {}", link.display(), error);
            return None;
        }
    }
    match std::os::unix::fs::symlink(script, &link) {
        Ok(()) => {
            info!("Linked {} to {}", link.display(), script.display());
            Some(link)
        }
        Err(error) => {
            debug!("Could not link {}: {}", link.display(), error);
            None
        }
    }
}

#[cfg(not(unix))]
fn link_into(_script: &Path, _bin_dir: &Path) -> Option<PathBuf> {
    None
}
