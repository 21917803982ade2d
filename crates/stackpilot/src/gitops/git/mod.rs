//! Git access for GitOps syncs.

pub mod auth;
pub mod client;
pub mod parse;
pub mod types;

pub use client::{resolve_in_checkout, CliGitClient, GitClient};
pub use types::*;
