use thiserror::Error;

pub mod manifest;
pub mod receipt;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("IO error reading {path}: {source}")]
    IO {
        path: String,
        source: std::io::Error,
    },
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Unsupported receipt version {0}")]
    UnsupportedReceiptVersion(toml::Value),
    #[error("Receipt has no version field")]
    MissingReceiptVersion,
}
