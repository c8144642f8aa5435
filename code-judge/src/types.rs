use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::Error;

/// Supported programming languages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Java,
    C,
    Cpp,
}

impl Language {
    pub const ALL: [Language; 4] = [Language::Python, Language::Java, Language::C, Language::Cpp];

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Java => "java",
            Language::C => "c",
            Language::Cpp => "cpp",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "python" | "python3" | "py" => Ok(Language::Python),
            "java" => Ok(Language::Java),
            "c" => Ok(Language::C),
            "cpp" | "c++" => Ok(Language::Cpp),
            _ => Err(Error::UnsupportedLanguage(s.to_string())),
        }
    }
}

/// One hidden test case: the stdin payload and the stdout we expect back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    #[serde(default)]
    pub input: String,
    #[serde(default)]
    pub expected_output: String,
}

impl TestCase {
    pub fn new(input: impl Into<String>, expected_output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            expected_output: expected_output.into(),
        }
    }
}

/// Compile-and-test request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileRequest {
    /// Source code to judge
    pub code: String,
    /// Programming language
    pub language: Language,
    /// Test cases, judged in this order
    #[serde(default)]
    pub test_cases: Vec<TestCase>,
}

/// Verdict category of a single test case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Passed,
    WrongAnswer,
    RuntimeError,
    Timeout,
    CompilationError,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionStatus::Passed => "passed",
            ExecutionStatus::WrongAnswer => "wrong_answer",
            ExecutionStatus::RuntimeError => "runtime_error",
            ExecutionStatus::Timeout => "timeout",
            ExecutionStatus::CompilationError => "compilation_error",
        };
        f.write_str(s)
    }
}

/// Result of judging one test case, positionally aligned with the request's
/// `test_cases`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub input: String,
    /// Program stdout, trimmed
    pub output: String,
    pub expected_output: String,
    pub passed: bool,
    /// Empty on a clean run without stderr
    pub error: String,
    pub status: ExecutionStatus,
    pub execution_time_ms: u64,
}

impl ExecutionResult {
    /// Judge a completed run. A non-zero exit fails the case even when the
    /// output happens to match.
    pub fn judged(test_case: &TestCase, stdout: &str, stderr: String, exit_code: i32, elapsed: Duration) -> Self {
        let output = stdout.trim().to_string();
        let matches = output == test_case.expected_output.trim();

        let (passed, status, error) = if exit_code != 0 {
            let detail = if stderr.trim().is_empty() {
                format!("exited with code {}", exit_code)
            } else {
                format!("exited with code {}: {}", exit_code, stderr)
            };
            (false, ExecutionStatus::RuntimeError, Error::Runtime(detail).to_string())
        } else if matches {
            (true, ExecutionStatus::Passed, stderr)
        } else {
            (false, ExecutionStatus::WrongAnswer, stderr)
        };

        Self {
            input: test_case.input.clone(),
            output,
            expected_output: test_case.expected_output.clone(),
            passed,
            error,
            status,
            execution_time_ms: elapsed.as_millis() as u64,
        }
    }

    /// A failed verdict carrying no output, for compile errors, runtime
    /// errors and timeouts.
    pub fn failed(test_case: &TestCase, error: &Error, elapsed: Duration) -> Self {
        let status = match error {
            Error::Compile(_) => ExecutionStatus::CompilationError,
            Error::Timeout(_) => ExecutionStatus::Timeout,
            _ => ExecutionStatus::RuntimeError,
        };

        Self {
            input: test_case.input.clone(),
            output: String::new(),
            expected_output: test_case.expected_output.clone(),
            passed: false,
            error: error.to_string(),
            status,
            execution_time_ms: elapsed.as_millis() as u64,
        }
    }
}

/// Resource limits applied to one sandboxed process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    /// Maximum CPU time (seconds)
    pub cpu_time: u64,
    /// Maximum address space (bytes); `None` leaves it unbounded
    pub memory: Option<u64>,
    /// Maximum size of any file the process writes (bytes)
    pub file_size: u64,
    /// Maximum number of processes for the sandbox user
    pub processes: Option<u64>,
    /// Maximum bytes captured from each of stdout and stderr
    pub output: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cpu_time: 5,
            memory: Some(256 * 1024 * 1024), // 256MB
            file_size: 10 * 1024 * 1024,     // 10MB
            processes: Some(64),
            output: 1024 * 1024, // 1MB
        }
    }
}

impl ResourceLimits {
    /// Limits suited to running a compiler rather than a submission.
    pub fn for_compiler() -> Self {
        Self {
            cpu_time: 30,
            memory: Some(1024 * 1024 * 1024), // 1GB
            file_size: 64 * 1024 * 1024,      // 64MB
            processes: None,
            output: 256 * 1024,
        }
    }
}

pub(crate) mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn language_names_and_aliases() {
        assert_eq!("python".parse::<Language>().unwrap(), Language::Python);
        assert_eq!("Python3".parse::<Language>().unwrap(), Language::Python);
        assert_eq!("c++".parse::<Language>().unwrap(), Language::Cpp);
        assert_eq!(" C ".parse::<Language>().unwrap(), Language::C);
        assert!(matches!(
            "cobol".parse::<Language>(),
            Err(Error::UnsupportedLanguage(name)) if name == "cobol"
        ));
        for language in Language::ALL {
            assert_eq!(language.as_str().parse::<Language>().unwrap(), language);
        }
    }

    #[test]
    fn trailing_newline_still_passes() {
        let case = TestCase::new("2", "5");
        let result = ExecutionResult::judged(&case, "5\n", String::new(), 0, Duration::ZERO);
        assert!(result.passed);
        assert_eq!(result.output, "5");
        assert_eq!(result.status, ExecutionStatus::Passed);
        assert!(result.error.is_empty());
    }

    #[test]
    fn inner_whitespace_is_significant() {
        let case = TestCase::new("", "05");
        let result = ExecutionResult::judged(&case, "5 ", String::new(), 0, Duration::ZERO);
        assert!(!result.passed);
        assert_eq!(result.status, ExecutionStatus::WrongAnswer);
    }

    #[test]
    fn non_zero_exit_fails_matching_output() {
        let case = TestCase::new("", "5");
        let result = ExecutionResult::judged(&case, "5", "boom".to_string(), 3, Duration::ZERO);
        assert!(!result.passed);
        assert_eq!(result.status, ExecutionStatus::RuntimeError);
        assert!(result.error.contains("exited with code 3"));
        assert!(result.error.contains("boom"));
    }

    #[test]
    fn wire_shape_is_camel_case() {
        let case = TestCase::new("4", "5");
        let result = ExecutionResult::judged(&case, "5\n", String::new(), 0, Duration::from_millis(12));
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["expectedOutput"], "5");
        assert_eq!(json["executionTimeMs"], 12);
        assert_eq!(json["status"], "passed");

        let request: CompileRequest = serde_json::from_str(
            r#"{"code":"print(1)","language":"python","testCases":[{"input":"","expectedOutput":"1"}]}"#,
        )
        .unwrap();
        assert_eq!(request.language, Language::Python);
        assert_eq!(request.test_cases.len(), 1);
    }

    #[test]
    fn failed_result_reports_timeout() {
        let case = TestCase::new("", "");
        let result = ExecutionResult::failed(&case, &Error::Timeout(Duration::from_secs(2)), Duration::from_secs(2));
        assert!(!result.passed);
        assert_eq!(result.status, ExecutionStatus::Timeout);
        assert!(result.error.starts_with("Timeout Error"));
    }
}
