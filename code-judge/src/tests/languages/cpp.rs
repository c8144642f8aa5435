use super::{
    fixtures::code_samples::CPP_SUM,
    fixtures::test_scenarios::{CPP_SYNTAX_ERROR, CPP_THROWS},
};
use crate::{Error, Language};

use super::*;

const GXX: &[&str] = &["g++"];

#[tokio::test]
async fn test_cpp_basic() -> std::result::Result<(), Error> {
    test_language_passes(
        Language::Cpp,
        GXX,
        CPP_SUM,
        &[("1 2", "3"), ("4000000000 4000000000", "8000000000")],
    )
    .await
}

#[tokio::test]
async fn test_cpp_compile_error() -> std::result::Result<(), Error> {
    test_language_compile_error(Language::Cpp, GXX, CPP_SYNTAX_ERROR).await
}

#[tokio::test]
async fn test_cpp_uncaught_exception() -> std::result::Result<(), Error> {
    test_language_runtime_error(Language::Cpp, GXX, CPP_THROWS, "SIGABRT").await
}
