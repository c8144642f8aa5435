use super::{
    fixtures::code_samples::{PYTHON_ECHO, PYTHON_INCREMENT},
    fixtures::test_scenarios::PYTHON_DIVIDES,
};
use crate::{Error, Language};

use super::*;

const PYTHON: &[&str] = &["python3"];

#[tokio::test]
async fn test_python_basic() -> std::result::Result<(), Error> {
    test_language_passes(Language::Python, PYTHON, PYTHON_INCREMENT, &[("4", "5"), ("-1", "0")]).await
}

#[tokio::test]
async fn test_python_multiline_input() -> std::result::Result<(), Error> {
    test_language_passes(
        Language::Python,
        PYTHON,
        PYTHON_ECHO,
        &[("line one\nline two\n", "line one\nline two")],
    )
    .await
}

#[tokio::test]
async fn test_python_syntax_error() -> std::result::Result<(), Error> {
    // No compile step: the interpreter reports it on every run.
    test_language_runtime_error(Language::Python, PYTHON, "print(", "SyntaxError").await
}

#[tokio::test]
async fn test_python_exception() -> std::result::Result<(), Error> {
    if let Some(results) =
        judge_cases(Language::Python, PYTHON, PYTHON_DIVIDES, &[("0", "")]).await?
    {
        assert_eq!(results[0].status, ExecutionStatus::RuntimeError);
        assert!(results[0].error.contains("ZeroDivisionError"));
        // Tracebacks point at the relative source name, not the job directory.
        assert!(results[0].error.contains("main.py"));
        assert!(!results[0].error.contains("job-python-"));
    }
    Ok(())
}
