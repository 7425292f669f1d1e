//! Integration test suite for tscope
//!
//! End-to-end tests of the public API and the `tscope` binary.
//!
//! # Running Integration Tests
//!
//! ```bash
//! cargo test --test integration
//! ```
//!
//! # Test Organization
//!
//! - **resolution**: remote fetching, single-flight loading, cycles, purging
//! - **scopes**: compile caching, isolation and the synchronous path
//! - **escaping**: nested local templates surviving the outer compile
//! - **config**: `tscope.toml` driven engines backed by a directory
//! - **cli**: the `tscope` binary

mod cli;
mod config;
mod escaping;
mod resolution;
mod scopes;
