use super::{
    fixtures::code_samples::C_SUM,
    fixtures::test_scenarios::{C_INFINITE_LOOP, C_SYNTAX_ERROR},
};
use crate::{Error, Language};
use tokio::time::{Duration, Instant};

use super::*;

const GCC: &[&str] = &["gcc"];

#[tokio::test]
async fn test_c_basic() -> std::result::Result<(), Error> {
    test_language_passes(Language::C, GCC, C_SUM, &[("1 2", "3"), ("-5 5", "0")]).await
}

#[tokio::test]
async fn test_c_compile_error() -> std::result::Result<(), Error> {
    test_language_compile_error(Language::C, GCC, C_SYNTAX_ERROR).await
}

#[tokio::test]
async fn test_c_missing_input_exits_non_zero() -> std::result::Result<(), Error> {
    test_language_runtime_error(Language::C, GCC, C_SUM, "exited with code 1").await
}

#[tokio::test]
async fn test_c_infinite_loop_times_out() -> std::result::Result<(), Error> {
    let started = Instant::now();
    if let Some(results) = judge_cases(Language::C, GCC, C_INFINITE_LOOP, &[("", "")]).await? {
        assert_eq!(results[0].status, ExecutionStatus::Timeout);
        assert!(started.elapsed() < Duration::from_secs(10));
    }
    Ok(())
}
