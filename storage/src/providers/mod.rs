pub mod aws;
pub mod fs;

pub use aws::{ProviderKind, S3Provider};
pub use fs::FsProvider;
