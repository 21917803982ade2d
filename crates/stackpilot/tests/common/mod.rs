//! Shared utilities for stackpilot integration tests.
//!
//! - `TestEnv`: temp projects root, in-memory database and a fully wired
//!   orchestrator and sync engine
//! - In-memory fakes for the compose, container and git collaborators

pub mod harness;

pub use harness::*;
