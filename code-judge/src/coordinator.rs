use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::{
    config::JudgeConfig,
    error::Error,
    languages::{available_adapters, LanguageAdapter},
    sandbox::Sandbox,
    types::{CompileRequest, ExecutionResult, Language},
    Result,
};

/// Runs one compile request end to end: pick the adapter, compile once, run
/// every test case in order, and always clean up the artifact.
pub struct JobCoordinator {
    adapters: HashMap<Language, Arc<dyn LanguageAdapter>>,
    sandbox: Sandbox,
    work_root: PathBuf,
    run_timeout: Duration,
}

impl JobCoordinator {
    /// Resolve toolchains and prepare the work root.
    pub fn new(config: &JudgeConfig) -> Result<Self> {
        config.validate()?;
        let work_root_error = |e: std::io::Error| {
            Error::Config(format!(
                "failed to create work root {}: {}",
                config.work_root.display(),
                e
            ))
        };
        std::fs::create_dir_all(&config.work_root).map_err(work_root_error)?;
        // Job directories are recreated at the same absolute path inside
        // private mounts, so the root must not be relative or a symlink.
        let config = JudgeConfig {
            work_root: std::fs::canonicalize(&config.work_root).map_err(work_root_error)?,
            ..config.clone()
        };

        let adapters = available_adapters(&config);
        if adapters.is_empty() {
            warn!("No language toolchains available; every request will be rejected");
        }

        let coordinator = Self::with_adapters(&config, adapters);
        if coordinator.sandbox.isolation().credentials {
            // Sandbox uids may traverse to their own job directory but not
            // list or write the root.
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&config.work_root, std::fs::Permissions::from_mode(0o711))
                .map_err(work_root_error)?;
        }
        Ok(coordinator)
    }

    /// Build a coordinator around an explicit adapter set.
    pub fn with_adapters(
        config: &JudgeConfig,
        adapters: HashMap<Language, Arc<dyn LanguageAdapter>>,
    ) -> Self {
        Self {
            adapters,
            sandbox: Sandbox::from_config(config),
            work_root: config.work_root.clone(),
            run_timeout: config.run_timeout,
        }
    }

    pub fn languages(&self) -> Vec<Language> {
        let mut languages: Vec<_> = self.adapters.keys().copied().collect();
        languages.sort();
        languages
    }

    pub fn supports(&self, language: Language) -> bool {
        self.adapters.contains_key(&language)
    }

    fn adapter_for(&self, language: Language) -> Result<Arc<dyn LanguageAdapter>> {
        self.adapters.get(&language).cloned().ok_or_else(|| {
            Error::UnsupportedLanguage(format!("{} (toolchain not available)", language))
        })
    }

    /// Judge every test case of `request`. The returned results line up with
    /// `request.test_cases` index for index.
    ///
    /// Compile errors, runtime errors and timeouts are verdicts; only
    /// `UnsupportedLanguage` and infrastructure failures are returned as `Err`.
    pub async fn judge(&self, request: &CompileRequest) -> Result<Vec<ExecutionResult>> {
        let adapter = self.adapter_for(request.language)?;

        let artifact = match adapter
            .prepare(&self.sandbox, &self.work_root, &request.code)
            .await
        {
            Ok(artifact) => artifact,
            Err(e @ Error::Compile(_)) => {
                info!(language = %request.language, "Compilation failed, failing all test cases");
                return Ok(request
                    .test_cases
                    .iter()
                    .map(|test_case| ExecutionResult::failed(test_case, &e, Duration::ZERO))
                    .collect());
            }
            Err(e) => return Err(e),
        };

        let mut results = Vec::with_capacity(request.test_cases.len());
        for (index, test_case) in request.test_cases.iter().enumerate() {
            let started = Instant::now();
            let result = match adapter
                .run(&self.sandbox, &artifact, &test_case.input, self.run_timeout)
                .await
            {
                Ok(output) => ExecutionResult::judged(
                    test_case,
                    &output.stdout,
                    output.stderr,
                    output.exit_code,
                    output.elapsed,
                ),
                Err(e) if e.is_verdict() => {
                    ExecutionResult::failed(test_case, &e, started.elapsed())
                }
                // The artifact guard removes the working directory on this path.
                Err(e) => return Err(e),
            };
            debug!(index, status = %result.status, "Test case judged");
            results.push(result);
        }

        artifact.close();
        Ok(results)
    }
}
