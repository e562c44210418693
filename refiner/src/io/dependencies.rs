//! Resolution of third-party packages referenced by generated code.

use std::collections::BTreeSet;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::io::config::DependencyConfig;
use crate::io::interaction::Interactor;
use crate::io::process::{command_from_parts, run_command_with_timeout};

const OUTPUT_LIMIT_BYTES: usize = 20_000;

/// Makes packages available before generated code that imports them is written.
pub trait DependencyResolver {
    /// Failures to install are logged by implementors; an `Err` is reserved
    /// for failures to ask the operator.
    fn resolve(&self, packages: &BTreeSet<String>) -> Result<()>;
}

/// Resolver used when dependency handling is disabled.
#[derive(Debug, Default)]
pub struct NoopResolver;

impl DependencyResolver for NoopResolver {
    fn resolve(&self, packages: &BTreeSet<String>) -> Result<()> {
        if !packages.is_empty() {
            debug!(?packages, "dependency resolution disabled");
        }
        Ok(())
    }
}

/// Check each package with an import probe, then ask before installing.
pub struct PipResolver<'a, I: Interactor> {
    config: &'a DependencyConfig,
    interactor: &'a I,
}

impl<'a, I: Interactor> PipResolver<'a, I> {
    pub fn new(config: &'a DependencyConfig, interactor: &'a I) -> Self {
        Self { config, interactor }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_secs)
    }

    fn is_available(&self, package: &str) -> bool {
        let mut parts = self.config.check_command.clone();
        parts.push(format!("import {package}"));
        let output = command_from_parts(&parts)
            .and_then(|cmd| run_command_with_timeout(cmd, None, self.timeout(), OUTPUT_LIMIT_BYTES));
        match output {
            Ok(output) => output.status.success() && !output.timed_out,
            Err(err) => {
                warn!(package, err = %err, "import probe failed to run");
                false
            }
        }
    }

    fn install(&self, package: &str) {
        let mut parts = self.config.install_command.clone();
        parts.push(package.to_string());
        let output = command_from_parts(&parts)
            .and_then(|cmd| run_command_with_timeout(cmd, None, self.timeout(), OUTPUT_LIMIT_BYTES));
        match output {
            Ok(output) if output.status.success() && !output.timed_out => {
                info!(package, "installed package");
            }
            Ok(output) => warn!(
                package,
                exit_code = ?output.status.code(),
                timed_out = output.timed_out,
                stderr = %output.stderr_text().trim(),
                "package install failed"
            ),
            Err(err) => warn!(package, err = %err, "package install failed to run"),
        }
    }
}

impl<I: Interactor> DependencyResolver for PipResolver<'_, I> {
    #[instrument(skip_all, fields(count = packages.len()))]
    fn resolve(&self, packages: &BTreeSet<String>) -> Result<()> {
        for package in packages {
            if self.is_available(package) {
                debug!(package, "package already available");
                continue;
            }
            let question = format!("Package '{package}' is required but not installed. Install it?");
            if self.interactor.confirm(&question)? {
                self.install(package);
            } else {
                info!(package, "install declined");
            }
        }
        Ok(())
    }
}
