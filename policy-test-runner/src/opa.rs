use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use thiserror::Error;
use tokio::process::Command;
use tracing::info;

pub const DEFAULT_ENGINE_BINARY: &str = "./opa_envoy_linux_amd64";

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to launch policy engine '{binary}': {source}")]
    Spawn {
        binary: String,
        #[source]
        source: io::Error,
    },
    #[error("policy engine {operation} failed ({status})")]
    Failed {
        operation: &'static str,
        status: ExitStatus,
    },
}

/// External OPA executable used as a pass/fail checker.
#[derive(Debug, Clone)]
pub struct PolicyEngine {
    binary: PathBuf,
}

impl PolicyEngine {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn check_args(policy: &Path) -> Vec<OsString> {
        vec!["check".into(), "-S".into(), policy.into()]
    }

    pub fn test_args(policy: &Path, tests: &Path) -> Vec<OsString> {
        vec!["test".into(), policy.into(), tests.into(), "-v".into()]
    }

    /// Strict syntax check of the rendered policy.
    pub async fn check(&self, policy: &Path) -> Result<(), EngineError> {
        self.run("check", Self::check_args(policy)).await
    }

    /// Runs the rendered test suite against the rendered policy.
    pub async fn test(&self, policy: &Path, tests: &Path) -> Result<(), EngineError> {
        self.run("test", Self::test_args(policy, tests)).await
    }

    async fn run(&self, operation: &'static str, args: Vec<OsString>) -> Result<(), EngineError> {
        info!(binary = %self.binary.display(), ?args, "Executing policy engine {operation}");

        let status = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|source| EngineError::Spawn {
                binary: self.binary.display().to_string(),
                source,
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(EngineError::Failed { operation, status })
        }
    }
}
