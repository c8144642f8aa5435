use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{error::Error, types::duration_serde, ResourceLimits, Result};

/// Process-wide judge configuration, passed to the service at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JudgeConfig {
    /// Directory under which per-job working directories are created
    pub work_root: PathBuf,
    /// Maximum number of jobs judged at the same time
    pub max_concurrent_jobs: usize,
    /// Wall-clock budget for one compile step
    #[serde(with = "duration_serde")]
    pub compile_timeout: Duration,
    /// Wall-clock budget for one test case run
    #[serde(with = "duration_serde")]
    pub run_timeout: Duration,
    pub compile_limits: ResourceLimits,
    pub run_limits: ResourceLimits,
    /// `PATH` seen by toolchains and submissions
    pub path_env: String,
    pub sandbox: SandboxConfig,
    pub toolchains: Toolchains,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            work_root: std::env::temp_dir().join("code-judge"),
            max_concurrent_jobs: 4,
            compile_timeout: Duration::from_secs(30),
            run_timeout: Duration::from_secs(5),
            compile_limits: ResourceLimits::for_compiler(),
            run_limits: ResourceLimits::default(),
            path_env: "/usr/local/bin:/usr/bin:/bin".to_string(),
            sandbox: SandboxConfig::default(),
            toolchains: Toolchains::default(),
        }
    }
}

impl JudgeConfig {
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: JudgeConfig =
            toml::from_str(source).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&source)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_jobs == 0 {
            return Err(Error::Config("max_concurrent_jobs must be at least 1".into()));
        }
        if self.compile_timeout.is_zero() || self.run_timeout.is_zero() {
            return Err(Error::Config("timeouts must be non-zero".into()));
        }
        for (name, limits) in [("compile_limits", &self.compile_limits), ("run_limits", &self.run_limits)] {
            if limits.cpu_time == 0 || limits.output == 0 || limits.file_size == 0 {
                return Err(Error::Config(format!(
                    "{}: cpu_time, output and file_size must be non-zero",
                    name
                )));
            }
        }
        if self.sandbox.isolate {
            if self.sandbox.uid_base == 0 || self.sandbox.uid_count == 0 {
                return Err(Error::Config(
                    "sandbox uid_base and uid_count must be non-zero".into(),
                ));
            }
            if self.sandbox.uid_base.checked_add(self.sandbox.uid_count).is_none() {
                return Err(Error::Config("sandbox uid range overflows".into()));
            }
        }
        if self.toolchains.java.main_class.trim().is_empty() {
            return Err(Error::Config("java main_class must not be empty".into()));
        }
        Ok(())
    }
}

/// Process isolation for submissions.
///
/// Isolation needs root: each job then runs under its own uid taken from
/// `uid_base..uid_base + uid_count`, which also bounds how many jobs can hold
/// an identity at once. Without root these settings are ignored and
/// submissions share the judge's uid.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub isolate: bool,
    pub uid_base: u32,
    pub uid_count: u32,
    /// Give each process fresh, empty `/tmp`, `/var/tmp` and `/dev/shm`
    pub private_tmp: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            isolate: true,
            uid_base: 60000,
            uid_count: 64,
            private_tmp: true,
        }
    }
}

/// Toolchain binaries and flags for each language.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Toolchains {
    pub python: PythonToolchain,
    pub c: NativeToolchain,
    pub cpp: NativeToolchain,
    pub java: JavaToolchain,
}

impl Toolchains {
    pub fn enabled(&self, language: crate::Language) -> bool {
        use crate::Language;
        match language {
            Language::Python => self.python.enabled,
            Language::C => self.c.enabled,
            Language::Cpp => self.cpp.enabled,
            Language::Java => self.java.enabled,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PythonToolchain {
    pub enabled: bool,
    pub interpreter: String,
}

impl Default for PythonToolchain {
    fn default() -> Self {
        Self {
            enabled: true,
            interpreter: "python3".to_string(),
        }
    }
}

/// A C or C++ compiler. Empty fields fall back to the adapter's defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NativeToolchain {
    pub enabled: bool,
    /// Empty means the language default (`gcc` or `g++`)
    pub compiler: String,
    /// Empty means the language default flags
    pub flags: Vec<String>,
}

impl Default for NativeToolchain {
    fn default() -> Self {
        Self {
            enabled: true,
            compiler: String::new(),
            flags: Vec::new(),
        }
    }
}

impl NativeToolchain {
    pub fn compiler_or<'a>(&'a self, default: &'a str) -> &'a str {
        if self.compiler.trim().is_empty() {
            default
        } else {
            &self.compiler
        }
    }

    pub fn flags_or(&self, default: &[&str]) -> Vec<String> {
        if self.flags.is_empty() {
            default.iter().map(|s| s.to_string()).collect()
        } else {
            self.flags.clone()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JavaToolchain {
    pub enabled: bool,
    pub compiler: String,
    pub runtime: String,
    /// Class whose `main` method is invoked; the source file is named after it
    pub main_class: String,
}

impl Default for JavaToolchain {
    fn default() -> Self {
        Self {
            enabled: true,
            compiler: "javac".to_string(),
            runtime: "java".to_string(),
            main_class: "Solution".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Language;
    use assert_fs::prelude::*;

    #[test]
    fn defaults_are_valid() {
        let config = JudgeConfig::default();
        config.validate().unwrap();
        assert_eq!(config.run_timeout, Duration::from_secs(5));
        assert_eq!(config.toolchains.java.main_class, "Solution");
        assert!(Language::ALL.iter().all(|l| config.toolchains.enabled(*l)));
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = assert_fs::TempDir::new().unwrap();
        let file = dir.child("judge.toml");
        file.write_str(
            r#"
run_timeout = 2
max_concurrent_jobs = 8

[run_limits]
cpu_time = 1
output = 4096

[toolchains.java]
enabled = false

[toolchains.cpp]
flags = ["-O0", "-std=c++20"]
"#,
        )
        .unwrap();

        let config = JudgeConfig::from_file(file.path()).unwrap();
        assert_eq!(config.run_timeout, Duration::from_secs(2));
        assert_eq!(config.compile_timeout, Duration::from_secs(30));
        assert_eq!(config.max_concurrent_jobs, 8);
        assert_eq!(config.run_limits.cpu_time, 1);
        assert_eq!(config.run_limits.output, 4096);
        assert_eq!(config.run_limits.memory, ResourceLimits::default().memory);
        assert!(!config.toolchains.enabled(Language::Java));
        assert!(config.toolchains.enabled(Language::Python));
        assert_eq!(config.toolchains.cpp.flags_or(&["-O2"]), vec!["-O0", "-std=c++20"]);
        assert_eq!(config.toolchains.c.flags_or(&["-O2"]), vec!["-O2"]);
        assert_eq!(config.toolchains.c.compiler_or("gcc"), "gcc");
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let result = JudgeConfig::from_toml_str("run_timeout = 0");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn sandbox_section_is_parsed() {
        let config = JudgeConfig::from_toml_str(
            r#"
[sandbox]
uid_base = 70000
private_tmp = false
"#,
        )
        .unwrap();
        assert!(config.sandbox.isolate);
        assert_eq!(config.sandbox.uid_base, 70000);
        assert_eq!(config.sandbox.uid_count, 64);
        assert!(!config.sandbox.private_tmp);
    }

    #[test]
    fn root_uid_range_is_rejected() {
        let result = JudgeConfig::from_toml_str("[sandbox]\nuid_base = 0");
        assert!(matches!(result, Err(Error::Config(_))));

        let result = JudgeConfig::from_toml_str("[sandbox]\nuid_base = 4294967290\nuid_count = 64");
        assert!(matches!(result, Err(Error::Config(_))));

        // Ranges only matter when isolation is on.
        let config = JudgeConfig::from_toml_str("[sandbox]\nisolate = false\nuid_base = 0").unwrap();
        assert!(!config.sandbox.isolate);
    }

    #[test]
    fn malformed_file_is_rejected() {
        let result = JudgeConfig::from_toml_str("run_timeout = \"soon\"");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let dir = assert_fs::TempDir::new().unwrap();
        let result = JudgeConfig::from_file(dir.path().join("absent.toml"));
        assert!(matches!(result, Err(Error::Config(msg)) if msg.contains("absent.toml")));
    }
}
