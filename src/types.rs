use std::fmt;

use serde::Serialize;

use crate::pods::PodTarget;

/// Admin actions that run against a resolved pod.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Command {
    InstallTools,
    Sql,
    CrashLog,
    Log,
    SchemaCheck,
    DataCheck,
    GrantCheck,
    HealthCheck,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::InstallTools => "install-tools",
            Command::Sql => "sql",
            Command::CrashLog => "crashlog",
            Command::Log => "log",
            Command::SchemaCheck => "schemacheck",
            Command::DataCheck => "datacheck",
            Command::GrantCheck => "grantcheck",
            Command::HealthCheck => "healthcheck",
        }
    }

    /// Actions that only make sense against ClickHouse.
    pub fn clickhouse_only(&self) -> bool {
        matches!(
            self,
            Command::SchemaCheck | Command::DataCheck | Command::GrantCheck | Command::HealthCheck
        )
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A command plus the raw target argument (`all`, `pod`, or `namespace/pod`).
#[derive(Debug, Clone)]
pub struct CommandRequest {
    pub command: Command,
    pub target_spec: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Ok,
    /// The action ran but found nothing to report.
    Degraded,
    Failed,
}

impl Outcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            Outcome::Ok => 0,
            Outcome::Failed => 1,
            Outcome::Degraded => 2,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Outcome::Ok => "OK",
            Outcome::Degraded => "WARN",
            Outcome::Failed => "FAIL",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub target: PodTarget,
    pub outcome: Outcome,
    pub exit_code: i32,
    pub message: String,
}

impl ExecutionResult {
    pub fn new(target: PodTarget, outcome: Outcome, message: impl Into<String>) -> Self {
        Self {
            target,
            exit_code: outcome.exit_code(),
            outcome,
            message: message.into(),
        }
    }
}

/// Process exit code for a whole run: any failure wins over any warning.
pub fn aggregate_exit_code(results: &[ExecutionResult]) -> i32 {
    if results.iter().any(|r| r.outcome == Outcome::Failed) {
        1
    } else if results.iter().any(|r| r.outcome == Outcome::Degraded) {
        2
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(outcome: Outcome) -> ExecutionResult {
        ExecutionResult::new(PodTarget::new("ns", "clickhouse-0"), outcome, "")
    }

    #[test]
    fn test_aggregate_exit_code() {
        assert_eq!(aggregate_exit_code(&[]), 0);
        assert_eq!(aggregate_exit_code(&[result(Outcome::Ok)]), 0);
        assert_eq!(aggregate_exit_code(&[result(Outcome::Ok), result(Outcome::Degraded)]), 2);
        assert_eq!(
            aggregate_exit_code(&[result(Outcome::Degraded), result(Outcome::Failed), result(Outcome::Ok)]),
            1
        );
    }

    #[test]
    fn test_command_names() {
        assert_eq!(Command::InstallTools.to_string(), "install-tools");
        assert_eq!(Command::CrashLog.to_string(), "crashlog");
        assert!(Command::HealthCheck.clickhouse_only());
        assert!(!Command::Sql.clickhouse_only());
        assert!(!Command::Log.clickhouse_only());
    }

    #[test]
    fn test_result_serializes_outcome() {
        let json = serde_json::to_value(result(Outcome::Degraded)).unwrap();
        assert_eq!(json["outcome"], "degraded");
        assert_eq!(json["exit_code"], 2);
        assert_eq!(json["target"]["engine"], "ClickHouse");
    }
}
