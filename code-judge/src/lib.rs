//! # Code Judge
//!
//! Compiles and runs untrusted Python, Java, C and C++ submissions against
//! hidden test cases and reports an ordered verdict per test case.
//! Every process runs under OS-level resource limits in its own process
//! group, inside a private working directory that is removed when the job
//! ends. Running as root, each job also gets its own unprivileged uid and
//! private scratch directories.

mod artifact;
mod config;
mod coordinator;
mod error;
mod isolation;
mod languages;
mod sandbox;
mod service;
mod types;

#[cfg(test)]
mod tests;

pub use artifact::CompileArtifact;
pub use config::{
    JavaToolchain, JudgeConfig, NativeToolchain, PythonToolchain, SandboxConfig, Toolchains,
};
pub use coordinator::JobCoordinator;
pub use error::Error;
pub use isolation::{Identity, IdentityLease};
pub use languages::{CAdapter, CppAdapter, JavaAdapter, LanguageAdapter, PythonAdapter, RunOutput};
pub use sandbox::{Invocation, Isolation, Outcome, Sandbox, Termination};
pub use service::CodeJudgeService;
pub use types::{CompileRequest, ExecutionResult, ExecutionStatus, Language, ResourceLimits, TestCase};

/// Result type for judge operations
pub type Result<T> = std::result::Result<T, Error>;
