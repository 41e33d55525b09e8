use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::ParseError;

pub const RECEIPT_FILE: &str = ".autoblog-install.toml";

const VERSION: i64 = 1;

/// Record of the last successful installation, stored in the install root.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstallReceipt {
    pub repository_url: String,
    pub branch: String,
    pub revision: String,
    pub environment: PathBuf,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
struct VersionedReceipt<'a> {
    pub version: i64,
    #[serde(flatten)]
    pub content: &'a InstallReceipt,
}

impl InstallReceipt {
    pub fn path_in(root: &Path) -> PathBuf {
        root.join(RECEIPT_FILE)
    }

    pub fn from_file(file: &Path) -> Result<InstallReceipt, ParseError> {
        let contents = std::fs::read_to_string(file).map_err(|source| ParseError::IO {
            path: file.display().to_string(),
            source,
        })?;
        InstallReceipt::from_str(&contents)
    }

    pub fn from_str(s: &str) -> Result<InstallReceipt, ParseError> {
        let mut table = toml::from_str::<toml::Table>(s)?;
        match table.remove("version") {
            Some(toml::Value::Integer(VERSION)) => {
                table.try_into::<InstallReceipt>().map_err(Into::into)
            }
            Some(other) => Err(ParseError::UnsupportedReceiptVersion(other)),
            None => Err(ParseError::MissingReceiptVersion),
        }
    }

    pub fn to_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(&VersionedReceipt {
            version: VERSION,
            content: self,
        })
    }

    pub fn write_to(&self, root: &Path) -> anyhow::Result<PathBuf> {
        let path = Self::path_in(root);
        std::fs::write(&path, self.to_string()?)?;
        Ok(path)
    }
}
