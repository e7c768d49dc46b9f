use std::{fmt, time::Duration};

/// Closed taxonomy of how a single module run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExitCode {
    Success,
    TimeLimitExceeded,
    MemoryLimitExceeded,
    /// Uncaught failure inside the module.
    RuntimeFailure,
    /// The module's output failed its shape or range checks.
    PostValidationFailure,
    PreparationFailure,
    /// The result could not be written back.
    IOFailure,
    /// Forced termination by the hard watchdog.
    Killed,
}

impl ExitCode {
    pub fn is_success(&self) -> bool {
        matches!(self, ExitCode::Success)
    }

    pub fn is_limit(&self) -> bool {
        matches!(
            self,
            ExitCode::TimeLimitExceeded | ExitCode::MemoryLimitExceeded
        )
    }
}

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExitCode::Success => "Success",
            ExitCode::TimeLimitExceeded => "TLE",
            ExitCode::MemoryLimitExceeded => "MLE",
            ExitCode::RuntimeFailure => "RuntimeFailure",
            ExitCode::PostValidationFailure => "PostValidationFailure",
            ExitCode::PreparationFailure => "PreparationFailure",
            ExitCode::IOFailure => "IOFailure",
            ExitCode::Killed => "Killed",
        };
        f.write_str(name)
    }
}

/// Result of one finished task.
///
/// A value is present exactly when the exit code is [`ExitCode::Success`];
/// a diagnostic is kept for every other code except the two limit codes.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutcome<T> {
    exit_code: ExitCode,
    value: Option<T>,
    diagnostic: Option<String>,
    cpu_time: Option<Duration>,
}

impl<T> ExecutionOutcome<T> {
    pub fn success(value: T, cpu_time: Option<Duration>) -> Self {
        Self {
            exit_code: ExitCode::Success,
            value: Some(value),
            diagnostic: None,
            cpu_time,
        }
    }

    /// A failed outcome. Passing [`ExitCode::Success`] here is a bug and is
    /// turned into a runtime failure.
    pub fn failure(exit_code: ExitCode, diagnostic: impl Into<String>) -> Self {
        let (exit_code, diagnostic) = match exit_code {
            ExitCode::Success => (
                ExitCode::RuntimeFailure,
                format!("success reported without a value: {}", diagnostic.into()),
            ),
            code => (code, diagnostic.into()),
        };
        let diagnostic = if exit_code.is_limit() {
            None
        } else {
            Some(diagnostic)
        };
        Self {
            exit_code,
            value: None,
            diagnostic,
            cpu_time: None,
        }
    }

    pub fn with_cpu_time(mut self, cpu_time: Option<Duration>) -> Self {
        self.cpu_time = cpu_time;
        self
    }

    pub fn exit_code(&self) -> ExitCode {
        self.exit_code
    }

    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn into_value(self) -> Option<T> {
        self.value
    }

    pub fn diagnostic(&self) -> Option<&str> {
        self.diagnostic.as_deref()
    }

    pub fn cpu_time(&self) -> Option<Duration> {
        self.cpu_time
    }

    /// Carry a failure over to another value type; any value is dropped.
    pub fn retype<U>(self) -> ExecutionOutcome<U> {
        ExecutionOutcome {
            exit_code: self.exit_code,
            value: None,
            diagnostic: self.diagnostic,
            cpu_time: self.cpu_time,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ExecutionOutcome<U> {
        ExecutionOutcome {
            exit_code: self.exit_code,
            value: self.value.map(f),
            diagnostic: self.diagnostic,
            cpu_time: self.cpu_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_codes_drop_diagnostic() {
        let outcome = ExecutionOutcome::<()>::failure(ExitCode::TimeLimitExceeded, "slow");
        assert_eq!(outcome.diagnostic(), None);
        let outcome = ExecutionOutcome::<()>::failure(ExitCode::RuntimeFailure, "boom");
        assert_eq!(outcome.diagnostic(), Some("boom"));
        assert!(outcome.value().is_none());
    }

    #[test]
    fn success_is_never_valueless() {
        let outcome = ExecutionOutcome::<i32>::failure(ExitCode::Success, "oops");
        assert_eq!(outcome.exit_code(), ExitCode::RuntimeFailure);
        let outcome = ExecutionOutcome::success(3, None);
        assert_eq!(outcome.value(), Some(&3));
    }
}
