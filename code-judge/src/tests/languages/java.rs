use super::{
    fixtures::code_samples::JAVA_SUM,
    fixtures::test_scenarios::{JAVA_SYNTAX_ERROR, JAVA_THROWS},
};
use crate::{Error, Language};

use super::*;

const JDK: &[&str] = &["javac", "java"];

#[tokio::test]
async fn test_java_basic() -> std::result::Result<(), Error> {
    test_language_passes(Language::Java, JDK, JAVA_SUM, &[("1 2", "3"), ("10 -4", "6")]).await
}

#[tokio::test]
async fn test_java_compile_error() -> std::result::Result<(), Error> {
    test_language_compile_error(Language::Java, JDK, JAVA_SYNTAX_ERROR).await
}

#[tokio::test]
async fn test_java_uncaught_exception() -> std::result::Result<(), Error> {
    test_language_runtime_error(Language::Java, JDK, JAVA_THROWS, "IllegalStateException").await
}
