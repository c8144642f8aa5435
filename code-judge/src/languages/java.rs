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

/// Compiles to bytecode with `javac` and runs the configured entry class.
///
/// The JVM reserves far more address space than it uses, so the heap is
/// capped with `-Xmx` and the address-space limit only adds a fixed headroom
/// on top of it. JVM threads count against the process limit; the runtime is
/// told to size its worker pools for two processors so it starts well
/// inside that limit.
pub struct JavaAdapter {
    javac: PathBuf,
    java: PathBuf,
    main_class: String,
    source_file: String,
    compile_timeout: Duration,
    compile_limits: ResourceLimits,
    run_limits: ResourceLimits,
}

impl JavaAdapter {
    pub fn from_config(config: &JudgeConfig) -> Result<Self> {
        let toolchain = &config.toolchains.java;
        Ok(Self {
            javac: resolve_tool(&toolchain.compiler)?,
            java: resolve_tool(&toolchain.runtime)?,
            main_class: toolchain.main_class.clone(),
            source_file: format!("{}.java", toolchain.main_class),
            compile_timeout: config.compile_timeout,
            compile_limits: config.compile_limits,
            run_limits: config.run_limits,
        })
    }

    pub fn main_class(&self) -> &str {
        &self.main_class
    }
}

fn heap_flag(prefix: &str, memory: Option<u64>) -> Option<String> {
    memory.map(|bytes| format!("{}-Xmx{}m", prefix, (bytes / (1024 * 1024)).max(16)))
}

/// Address space the JVM maps beyond its heap: class metadata, code cache,
/// thread stacks and the reservations it never touches.
const JVM_ADDRESS_SPACE_HEADROOM: u64 = 4 * 1024 * 1024 * 1024;

const JVM_RUN_FLAGS: &[&str] = &[
    "-Xss64m",
    "-XX:+UseSerialGC",
    "-XX:-UsePerfData",
    "-XX:ActiveProcessorCount=2",
];

fn jvm_limits(limits: ResourceLimits) -> ResourceLimits {
    ResourceLimits {
        memory: limits
            .memory
            .map(|bytes| bytes.saturating_add(JVM_ADDRESS_SPACE_HEADROOM)),
        ..limits
    }
}

#[async_trait]
impl LanguageAdapter for JavaAdapter {
    fn language(&self) -> Language {
        Language::Java
    }

    fn source_file(&self) -> &str {
        &self.source_file
    }

    fn compile_invocation(&self, artifact: &CompileArtifact) -> Option<Invocation> {
        Some(
            Invocation::new(&self.javac, artifact.path())
                .args(heap_flag("-J", self.compile_limits.memory))
                .args(["-encoding", "UTF-8", "-d", "."])
                .arg(self.source_file.clone())
                .timeout(self.compile_timeout)
                .limits(jvm_limits(self.compile_limits)),
        )
    }

    fn run_invocation(&self, artifact: &CompileArtifact) -> Invocation {
        Invocation::new(&self.java, artifact.path())
            .args(heap_flag("", self.run_limits.memory))
            .args(JVM_RUN_FLAGS.iter().copied())
            .args(["-cp", "."])
            .arg(self.main_class.clone())
            .limits(jvm_limits(self.run_limits))
    }
}
