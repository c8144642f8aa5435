pub mod defaults {
    use crate::{CodeJudgeService, JudgeConfig, ResourceLimits, Result, SandboxConfig};
    use std::path::Path;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;
    use tokio::time::Duration;

    const TEST_UIDS_PER_SERVICE: u32 = 8;

    /// Each test gets its own uids so a sweep in one test never hits the
    /// processes of another running in parallel.
    pub fn test_sandbox_config() -> SandboxConfig {
        static NEXT_UID: AtomicU32 = AtomicU32::new(100_000);
        SandboxConfig {
            uid_base: NEXT_UID.fetch_add(TEST_UIDS_PER_SERVICE, Ordering::Relaxed),
            uid_count: TEST_UIDS_PER_SERVICE,
            ..SandboxConfig::default()
        }
    }

    pub fn default_test_limits() -> ResourceLimits {
        ResourceLimits {
            cpu_time: 5,
            memory: Some(256 * 1024 * 1024), // 256MB
            file_size: 10 * 1024 * 1024,     // 10MB
            processes: Some(64),
            output: 64 * 1024, // 64KB
        }
    }

    pub fn default_timeout() -> Duration {
        Duration::from_secs(5)
    }

    pub fn short_timeout() -> Duration {
        Duration::from_secs(2)
    }

    pub fn test_config(work_root: &Path) -> JudgeConfig {
        JudgeConfig {
            work_root: work_root.to_path_buf(),
            max_concurrent_jobs: 4,
            run_timeout: short_timeout(),
            run_limits: default_test_limits(),
            sandbox: test_sandbox_config(),
            ..JudgeConfig::default()
        }
    }

    /// A service whose job directories live under a temp dir the test can inspect.
    pub fn setup_test_service() -> Result<(CodeJudgeService, TempDir)> {
        let work_root = tempfile::tempdir()?;
        let service = CodeJudgeService::new(&test_config(work_root.path()))?;
        Ok((service, work_root))
    }

    /// Number of job directories left behind under `work_root`.
    pub fn leftover_artifacts(work_root: &Path) -> usize {
        std::fs::read_dir(work_root)
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}

pub mod requests {
    use crate::{CompileRequest, Language, TestCase};

    pub fn request(language: Language, code: &str, test_cases: &[(&str, &str)]) -> CompileRequest {
        CompileRequest {
            code: code.to_string(),
            language,
            test_cases: test_cases
                .iter()
                .map(|(input, expected)| TestCase::new(*input, *expected))
                .collect(),
        }
    }
}

pub mod processes {
    use std::path::Path;
    use tokio::time::{Duration, Instant};

    /// Whether `pid` is still running. A zombie waiting to be reaped by its
    /// new parent counts as gone.
    pub fn is_running(pid: i32) -> bool {
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Ok(stat) => !stat.contains(") Z ") && !stat.contains(") X "),
            Err(_) => false,
        }
    }

    pub async fn wait_until_gone(pid: i32, within: Duration) -> bool {
        let deadline = Instant::now() + within;
        while is_running(pid) {
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        true
    }

    /// Live processes whose working directory is `dir` or below it.
    pub fn running_in(dir: &Path) -> Vec<i32> {
        let Ok(entries) = std::fs::read_dir("/proc") else {
            return Vec::new();
        };
        entries
            .flatten()
            .filter_map(|entry| entry.file_name().to_str()?.parse::<i32>().ok())
            .filter(|pid| {
                std::fs::read_link(format!("/proc/{}/cwd", pid))
                    .map(|cwd| cwd.starts_with(dir))
                    .unwrap_or(false)
            })
            .filter(|pid| is_running(*pid))
            .collect()
    }

    pub fn running_as_root() -> bool {
        if nix::unistd::geteuid().is_root() {
            return true;
        }
        eprintln!("Skipping test: sandbox isolation needs root");
        false
    }
}

pub mod tools {
    use std::path::PathBuf;

    /// Absolute path of a host tool used as a stand-in program.
    pub fn tool(name: &str) -> PathBuf {
        which::which(name).unwrap_or_else(|_| PathBuf::from("/bin").join(name))
    }
}
