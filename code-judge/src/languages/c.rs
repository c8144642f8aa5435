use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;

use crate::{
    artifact::CompileArtifact,
    config::JudgeConfig,
    languages::{resolve_tool, LanguageAdapter},
    sandbox::Invocation,
    types::{Language, ResourceLimits},
    Result,
};

const SOURCE_FILE: &str = "main.c";
const EXECUTABLE: &str = "main";
const DEFAULT_COMPILER: &str = "gcc";
const DEFAULT_FLAGS: &[&str] = &["-O2", "-std=c11", "-pipe"];

pub struct CAdapter {
    compiler: PathBuf,
    flags: Vec<String>,
    compile_timeout: Duration,
    compile_limits: ResourceLimits,
    run_limits: ResourceLimits,
}

impl CAdapter {
    pub fn from_config(config: &JudgeConfig) -> Result<Self> {
        let toolchain = &config.toolchains.c;
        Ok(Self {
            compiler: resolve_tool(toolchain.compiler_or(DEFAULT_COMPILER))?,
            flags: toolchain.flags_or(DEFAULT_FLAGS),
            compile_timeout: config.compile_timeout,
            compile_limits: config.compile_limits,
            run_limits: config.run_limits,
        })
    }
}

#[async_trait]
impl LanguageAdapter for CAdapter {
    fn language(&self) -> Language {
        Language::C
    }

    fn source_file(&self) -> &str {
        SOURCE_FILE
    }

    fn compile_invocation(&self, artifact: &CompileArtifact) -> Option<Invocation> {
        Some(
            Invocation::new(&self.compiler, artifact.path())
                .args(self.flags.iter().cloned())
                .args(["-o", EXECUTABLE, SOURCE_FILE, "-lm"])
                .timeout(self.compile_timeout)
                .limits(self.compile_limits),
        )
    }

    fn run_invocation(&self, artifact: &CompileArtifact) -> Invocation {
        Invocation::new(artifact.file(EXECUTABLE), artifact.path()).limits(self.run_limits)
    }
}
