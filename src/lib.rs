pub mod cli;
pub mod config;
pub mod flock;
pub mod git;
pub mod launcher;
pub mod materialize;
pub mod model;
pub mod probe;
pub mod process;
pub mod smoke;
pub mod sync;

mod api;

pub use api::{InstallError, InstallReport, Installer, InstallerBuilder, RunStatus, Step};
