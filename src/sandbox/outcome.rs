//! Result of a single program run, as handed back to the repair loop.

use std::fmt;
use std::time::Duration;

/// Why a run ended the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OutcomeCategory {
    /// Exited with status 0.
    Success,
    /// Exited non-zero; the captured output holds the interpreter's trace.
    RuntimeError,
    /// The sandbox does not exist.
    SandboxMissing,
    /// The container engine could not be reached or rejected the request.
    TransportError,
    /// The run exceeded its wall-clock limit and was killed.
    TimedOut,
}

impl fmt::Display for OutcomeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::RuntimeError => write!(f, "runtime-error"),
            Self::SandboxMissing => write!(f, "sandbox-missing"),
            Self::TransportError => write!(f, "transport-error"),
            Self::TimedOut => write!(f, "timed-out"),
        }
    }
}

/// Structured outcome of running one program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ExecutionOutcome {
    pub succeeded: bool,
    /// Present only when the process actually ran.
    pub exit_code: Option<i64>,
    /// Combined stdout and stderr, or the failure message when nothing ran.
    pub captured_output: String,
    pub category: OutcomeCategory,
}

impl ExecutionOutcome {
    /// Classifies a finished process by its exit status.
    pub fn completed(exit_code: i64, captured_output: String) -> Self {
        let category = if exit_code == 0 {
            OutcomeCategory::Success
        } else {
            OutcomeCategory::RuntimeError
        };
        Self {
            succeeded: exit_code == 0,
            exit_code: Some(exit_code),
            captured_output,
            category,
        }
    }

    pub fn timed_out(exit_code: Option<i64>, captured_output: String) -> Self {
        Self {
            succeeded: false,
            exit_code,
            captured_output,
            category: OutcomeCategory::TimedOut,
        }
    }

    pub fn sandbox_missing(name: &str) -> Self {
        Self {
            succeeded: false,
            exit_code: None,
            captured_output: format!("Sandbox '{name}' not found"),
            category: OutcomeCategory::SandboxMissing,
        }
    }

    pub fn transport_error(message: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            exit_code: None,
            captured_output: message.into(),
            category: OutcomeCategory::TransportError,
        }
    }

    /// Renders the outcome the way the repair loop reads it: plain output on
    /// success, a labelled trace otherwise.
    pub fn report(&self, limit: Duration) -> String {
        match self.category {
            OutcomeCategory::Success => self.captured_output.clone(),
            OutcomeCategory::RuntimeError => format!(
                "Execution Error (exit code {}): {}",
                self.exit_code.unwrap_or_default(),
                self.captured_output
            ),
            OutcomeCategory::TimedOut => format!(
                "Execution Timed Out after {} seconds: {}",
                limit.as_secs(),
                self.captured_output
            ),
            OutcomeCategory::SandboxMissing => format!(
                "Error: {}. Please ensure it's running.",
                self.captured_output
            ),
            OutcomeCategory::TransportError => {
                format!("Docker API Error: {}", self.captured_output)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completed_classifies_by_exit_code() {
        let ok = ExecutionOutcome::completed(0, "4\n".to_string());
        assert!(ok.succeeded);
        assert_eq!(ok.category, OutcomeCategory::Success);

        let failed = ExecutionOutcome::completed(1, "Traceback".to_string());
        assert!(!failed.succeeded);
        assert_eq!(failed.exit_code, Some(1));
        assert_eq!(failed.category, OutcomeCategory::RuntimeError);
    }

    #[test]
    fn test_unreached_outcomes_have_no_exit_code() {
        assert_eq!(ExecutionOutcome::sandbox_missing("sandbox-x").exit_code, None);
        assert_eq!(ExecutionOutcome::transport_error("down").exit_code, None);
    }

    #[test]
    fn test_report_keeps_trace_verbatim() {
        let trace = "Traceback (most recent call last):\nZeroDivisionError: division by zero\n";
        let outcome = ExecutionOutcome::completed(1, trace.to_string());
        let report = outcome.report(Duration::from_secs(60));
        assert!(report.starts_with("Execution Error (exit code 1): "));
        assert!(report.ends_with(trace));
    }

    #[test]
    fn test_report_variants() {
        let limit = Duration::from_secs(5);
        assert_eq!(
            ExecutionOutcome::completed(0, "hi\n".into()).report(limit),
            "hi\n"
        );
        assert_eq!(
            ExecutionOutcome::timed_out(None, "partial".into()).report(limit),
            "Execution Timed Out after 5 seconds: partial"
        );
        assert_eq!(
            ExecutionOutcome::sandbox_missing("sandbox-u1").report(limit),
            "Error: Sandbox 'sandbox-u1' not found. Please ensure it's running."
        );
        assert!(ExecutionOutcome::transport_error("refused")
            .report(limit)
            .starts_with("Docker API Error"));
    }

    #[test]
    fn test_category_display() {
        assert_eq!(OutcomeCategory::TimedOut.to_string(), "timed-out");
        assert_eq!(OutcomeCategory::SandboxMissing.to_string(), "sandbox-missing");
    }
}
