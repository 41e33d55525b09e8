use std::{
    fs::File,
    path::{Path, PathBuf},
};

use fs4::fs_std::FileExt;
use log::debug;
use thiserror::Error;

/// Exclusive lock held for the whole run. One installer run per install root is supported;
/// a second run fails instead of waiting.
#[derive(Debug)]
pub struct FileLock {
    _file: File,
    path: PathBuf,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("another installer run is in progress (lock {})", path.display())]
    Busy { path: PathBuf },
    #[error(transparent)]
    IO(#[from] std::io::Error),
}

impl Error {
    pub fn remedy(&self) -> String {
        match self {
            Error::Busy { path } => format!(
                "Wait for the other run to finish. If none is running, delete {} and re-run.",
                path.display()
            ),
            Error::IO(_) => "Check that the install directory's parent is writable.".to_owned(),
        }
    }
}

impl FileLock {
    pub fn new(path: &Path) -> Result<Self, Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        match file.try_lock_exclusive() {
            Ok(true) => {
                debug!("Acquired lock {}", path.display());
                Ok(Self {
                    _file: file,
                    path: path.to_path_buf(),
                })
            }
            Ok(false) => Err(Error::Busy {
                path: path.to_path_buf(),
            }),
            Err(error)
                if error.raw_os_error() == fs4::lock_contended_error().raw_os_error() =>
            {
                Err(Error::Busy {
                    path: path.to_path_buf(),
                })
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Lock file for an install root, kept next to it since the root itself may be replaced.
    pub fn for_target(target: &Path) -> Result<Self, Error> {
        let name = target
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "autoblog".to_owned());
        let parent = target.parent().unwrap_or_else(|| Path::new("."));
        Self::new(&parent.join(format!(".{name}.lock")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
