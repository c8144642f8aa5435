//! Language-specific adapters

mod c;
mod cpp;
mod java;
mod python;

pub use c::CAdapter;
pub use cpp::CppAdapter;
pub use java::JavaAdapter;
pub use python::PythonAdapter;

use async_trait::async_trait;
use nix::sys::signal::Signal;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use which::which;

use crate::{
    artifact::CompileArtifact,
    config::JudgeConfig,
    error::Error,
    sandbox::{Invocation, Outcome, Sandbox, Termination},
    types::Language,
    Result,
};

/// What a finished run produced. Only runs that are worth judging make it
/// this far; crashes and timeouts are reported as [`Error`]s instead.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub elapsed: Duration,
}

/// Per-language strategy for turning source code into something runnable.
#[async_trait]
pub trait LanguageAdapter: Send + Sync {
    fn language(&self) -> Language;

    /// File name the submitted source is written to
    fn source_file(&self) -> &str;

    /// The compile step, for languages that have one
    fn compile_invocation(&self, _artifact: &CompileArtifact) -> Option<Invocation> {
        None
    }

    /// How to run the prepared program; stdin and timeout are filled in per test case
    fn run_invocation(&self, artifact: &CompileArtifact) -> Invocation;

    /// Write the source into a fresh artifact and compile it once. The
    /// artifact holds the job's sandbox identity until it is dropped.
    async fn prepare(
        &self,
        sandbox: &Sandbox,
        work_root: &Path,
        code: &str,
    ) -> Result<CompileArtifact> {
        let lease = sandbox.lease().await?;
        let artifact =
            CompileArtifact::create(work_root, self.language(), self.source_file(), code)
                .await?
                .owned_by(lease)?;

        if let Some(invocation) = self.compile_invocation(&artifact) {
            let invocation = invocation.run_as(artifact.identity());
            let outcome = sandbox.spawn(&invocation).await?;
            if !outcome.success() {
                debug!(language = %self.language(), termination = ?outcome.termination, "Compilation failed");
                return Err(Error::Compile(compile_diagnostics(
                    &artifact,
                    &outcome,
                    &invocation,
                )));
            }
        }

        Ok(artifact)
    }

    /// Run the prepared program once with `input` on stdin.
    async fn run(
        &self,
        sandbox: &Sandbox,
        artifact: &CompileArtifact,
        input: &str,
        timeout: Duration,
    ) -> Result<RunOutput> {
        let invocation = self
            .run_invocation(artifact)
            .stdin(input)
            .timeout(timeout)
            .run_as(artifact.identity());
        let outcome = sandbox.spawn(&invocation).await?;
        interpret_run(artifact, outcome, &invocation)
    }
}

/// Resolve a toolchain binary to an absolute path.
pub(crate) fn resolve_tool(tool: &str) -> Result<PathBuf> {
    which(tool).map_err(|_| Error::Config(format!("toolchain binary not found: {}", tool)))
}

/// Build an adapter for every enabled language whose toolchain is installed.
pub(crate) fn available_adapters(
    config: &JudgeConfig,
) -> HashMap<Language, Arc<dyn LanguageAdapter>> {
    let mut adapters: HashMap<Language, Arc<dyn LanguageAdapter>> = HashMap::new();

    for language in Language::ALL {
        if !config.toolchains.enabled(language) {
            debug!("{} disabled by configuration", language);
            continue;
        }

        let adapter: Result<Arc<dyn LanguageAdapter>> = match language {
            Language::Python => PythonAdapter::from_config(config).map(|a| Arc::new(a) as _),
            Language::C => CAdapter::from_config(config).map(|a| Arc::new(a) as _),
            Language::Cpp => CppAdapter::from_config(config).map(|a| Arc::new(a) as _),
            Language::Java => JavaAdapter::from_config(config).map(|a| Arc::new(a) as _),
        };

        match adapter {
            Ok(adapter) => {
                adapters.insert(language, adapter);
            }
            Err(e) => warn!("{} unavailable: {}", language, e),
        }
    }

    adapters
}

fn interpret_run(
    artifact: &CompileArtifact,
    outcome: Outcome,
    invocation: &Invocation,
) -> Result<RunOutput> {
    let stderr = artifact.redact(&outcome.stderr);

    match outcome.termination {
        Termination::Exited(code) if code == 0 || !outcome.stdout.trim().is_empty() => {
            Ok(RunOutput {
                stdout: outcome.stdout,
                stderr,
                exit_code: code,
                elapsed: outcome.elapsed,
            })
        }
        Termination::Exited(code) => Err(Error::Runtime(with_detail(
            format!("exited with code {}", code),
            &stderr,
        ))),
        Termination::Signaled(signal) => Err(Error::Runtime(with_detail(
            format!("terminated by {}", signal_name(signal)),
            &stderr,
        ))),
        Termination::TimedOut => Err(Error::Timeout(invocation.timeout)),
        Termination::CpuLimitExceeded => Err(Error::Timeout(Duration::from_secs(
            invocation.limits.cpu_time,
        ))),
        Termination::OutputLimitExceeded => Err(Error::Runtime(format!(
            "output limit of {} bytes exceeded",
            invocation.limits.output
        ))),
    }
}

fn compile_diagnostics(
    artifact: &CompileArtifact,
    outcome: &Outcome,
    invocation: &Invocation,
) -> String {
    match outcome.termination {
        Termination::TimedOut => format!(
            "compilation did not finish within {} s",
            invocation.timeout.as_secs()
        ),
        Termination::CpuLimitExceeded => format!(
            "compiler exceeded its CPU time limit of {} s",
            invocation.limits.cpu_time
        ),
        Termination::OutputLimitExceeded => format!(
            "{}\n(diagnostics truncated)",
            artifact.redact(outcome.stderr.trim_end())
        ),
        Termination::Exited(_) | Termination::Signaled(_) => {
            let text = if !outcome.stderr.trim().is_empty() {
                &outcome.stderr
            } else {
                &outcome.stdout
            };
            if text.trim().is_empty() {
                format!("compiler failed with {:?}", outcome.termination)
            } else {
                artifact.redact(text.trim_end())
            }
        }
    }
}

fn with_detail(summary: String, stderr: &str) -> String {
    if stderr.trim().is_empty() {
        summary
    } else {
        format!("{}: {}", summary, stderr.trim_end())
    }
}

fn signal_name(signal: i32) -> String {
    match Signal::try_from(signal) {
        Ok(Signal::SIGXFSZ) => "SIGXFSZ (file size limit exceeded)".to_string(),
        Ok(signal) => signal.as_str().to_string(),
        Err(_) => format!("signal {}", signal),
    }
}

#[cfg(test)]
pub(crate) fn skip_if_not_available(tools: &[&str]) -> bool {
    let missing: Vec<_> = tools
        .iter()
        .filter(|tool| which(**tool).is_err())
        .map(|s| (*s).to_string())
        .collect();

    if !missing.is_empty() {
        eprintln!("Skipping test: {} not available", missing.join(", "));
        return true;
    }
    false
}
