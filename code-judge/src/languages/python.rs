use async_trait::async_trait;
use std::path::PathBuf;

use crate::{
    artifact::CompileArtifact,
    config::JudgeConfig,
    languages::{resolve_tool, LanguageAdapter},
    sandbox::Invocation,
    types::{Language, ResourceLimits},
    Result,
};

const SOURCE_FILE: &str = "main.py";

/// Python has no compile step; the script is handed straight to the interpreter.
pub struct PythonAdapter {
    interpreter: PathBuf,
    run_limits: ResourceLimits,
}

impl PythonAdapter {
    pub fn new(interpreter: PathBuf, run_limits: ResourceLimits) -> Self {
        Self {
            interpreter,
            run_limits,
        }
    }

    pub fn from_config(config: &JudgeConfig) -> Result<Self> {
        let interpreter = resolve_tool(&config.toolchains.python.interpreter)?;
        Ok(Self::new(interpreter, config.run_limits))
    }
}

#[async_trait]
impl LanguageAdapter for PythonAdapter {
    fn language(&self) -> Language {
        Language::Python
    }

    fn source_file(&self) -> &str {
        SOURCE_FILE
    }

    fn run_invocation(&self, artifact: &CompileArtifact) -> Invocation {
        // -B: no .pyc files in the artifact, -I: ignore PYTHON* variables and user site
        Invocation::new(&self.interpreter, artifact.path())
            .args(["-B", "-I", SOURCE_FILE])
            .limits(self.run_limits)
    }
}
