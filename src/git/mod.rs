pub mod remote;
pub mod repository;

pub use remote::GitTransport;
pub use repository::{GitError, InstallRepository};
