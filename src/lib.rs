pub mod cli;
pub mod colors;
pub mod config;
pub mod error;
pub mod fetch;
pub mod fsutil;
pub mod git;
pub mod graph;
pub mod installation;
pub mod installer;
pub mod lockfile;
pub mod manifest;
pub mod package;
pub mod progress;
pub mod resolver;
#[cfg(test)]
pub mod tests;

pub use config::InstallConfig;
pub use error::InstallError;
pub use installation::{
    Collaborators, DependencyRequest, FailedPackage, InstallOptions, Installation,
    InstallationReport,
};
pub use package::Package;
