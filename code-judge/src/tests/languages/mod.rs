use super::utils::{defaults::*, requests::request};
pub use super::*;
use crate::{languages::skip_if_not_available, ExecutionResult, ExecutionStatus, Language, Result};
use tokio_test::assert_ok;

pub mod c;
pub mod cpp;
pub mod java;
pub mod python;

// Common test utilities for language tests

/// Judge `code` against `cases` on a fresh service, or `None` when the
/// toolchain for `language` is not installed.
pub(crate) async fn judge_cases(
    language: Language,
    tools: &[&str],
    code: &str,
    cases: &[(&str, &str)],
) -> Result<Option<Vec<ExecutionResult>>> {
    if skip_if_not_available(tools) {
        return Ok(None);
    }
    let (service, work_root) = setup_test_service()?;
    let results = assert_ok!(service.judge(request(language, code, cases)).await);
    assert_eq!(results.len(), cases.len());
    assert_eq!(leftover_artifacts(work_root.path()), 0);
    Ok(Some(results))
}

pub(crate) async fn test_language_passes(
    language: Language,
    tools: &[&str],
    code: &str,
    cases: &[(&str, &str)],
) -> Result<()> {
    if let Some(results) = judge_cases(language, tools, code, cases).await? {
        for result in &results {
            assert!(result.passed, "{} case failed: {:?}", language, result);
            assert_eq!(result.status, ExecutionStatus::Passed);
        }
    }
    Ok(())
}

pub(crate) async fn test_language_compile_error(
    language: Language,
    tools: &[&str],
    code: &str,
) -> Result<()> {
    if let Some(results) = judge_cases(language, tools, code, &[("", ""), ("1", "1")]).await? {
        for result in &results {
            assert!(!result.passed);
            assert_eq!(result.status, ExecutionStatus::CompilationError);
            assert!(result.error.starts_with("Compile Error:"));
        }
    }
    Ok(())
}

pub(crate) async fn test_language_runtime_error(
    language: Language,
    tools: &[&str],
    code: &str,
    detail: &str,
) -> Result<()> {
    if let Some(results) = judge_cases(language, tools, code, &[("", "")]).await? {
        assert!(!results[0].passed);
        assert_eq!(results[0].status, ExecutionStatus::RuntimeError);
        assert!(
            results[0].error.contains(detail),
            "expected {:?} in {:?}",
            detail,
            results[0].error
        );
    }
    Ok(())
}
