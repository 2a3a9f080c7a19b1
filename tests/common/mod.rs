//! Common test utilities for muxstore integration tests.
//!
//! Provides `TestEnv` for isolated test environments that don't touch the
//! user's `~/.muxstore/` directory.

#![allow(dead_code)]

use assert_cmd::Command;
pub use tempfile::TempDir;

/// A test environment with an isolated muxstore home.
///
/// The `muxstore()` method returns a `Command` that sets `MUXSTORE_HOME`
/// per-invocation, making tests parallel-safe.
pub struct TestEnv {
    pub home_dir: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        Self {
            home_dir: TempDir::new().unwrap(),
        }
    }

    /// Create a new test environment and run `muxstore init`.
    pub fn init() -> Self {
        let env = Self::new();
        env.muxstore().arg("init").assert().success();
        env
    }

    /// Get a Command for the muxstore binary with an isolated home.
    pub fn muxstore(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_muxstore"));
        cmd.env("MUXSTORE_HOME", self.home_dir.path());
        cmd.env_remove("MUXSTORE_BUSY_TIMEOUT_MS");
        cmd.env_remove("RUST_LOG");
        cmd
    }

    /// Run a command that must succeed and parse its stdout as JSON.
    pub fn json(&self, args: &[&str]) -> serde_json::Value {
        let output = self.muxstore().args(args).assert().success();
        let stdout = String::from_utf8_lossy(&output.get_output().stdout).to_string();
        serde_json::from_str(stdout.trim()).unwrap()
    }

    pub fn home(&self) -> &std::path::Path {
        self.home_dir.path()
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}
