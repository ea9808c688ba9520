//! Events - webhook から復元したドメインイベント
//!
//! Validator が生の request をここに定義した型に変換し、
//! Controller はこの型だけを見て状態遷移を決めます。

use super::ids::{RunId, RunnerName};

/// JobAction は workflow_job イベントの action
///
/// 未知の action は `Unknown` に落とし、Controller では必ず no-op として扱う。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobAction {
    Queued,
    InProgress,
    Completed,
    Unknown(String),
}

impl JobAction {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "queued" => JobAction::Queued,
            "in_progress" => JobAction::InProgress,
            "completed" => JobAction::Completed,
            other => JobAction::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            JobAction::Queued => "queued",
            JobAction::InProgress => "in_progress",
            JobAction::Completed => "completed",
            JobAction::Unknown(s) => s,
        }
    }
}

/// One lifecycle notification for a single job run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobEvent {
    pub run_id: RunId,
    pub action: JobAction,
    /// Runner that picked up (or finished) the job. Absent while queued.
    pub runner_name: Option<RunnerName>,
    pub conclusion: Option<String>,
    /// Repository page of the job, for operators reading the logs.
    pub repository: Option<String>,
    /// Runner labels the job asked for.
    pub labels: Vec<String>,
}

impl JobEvent {
    pub fn new(run_id: RunId, action: JobAction) -> Self {
        Self {
            run_id,
            action,
            runner_name: None,
            conclusion: None,
            repository: None,
            labels: Vec::new(),
        }
    }

    pub fn with_runner(mut self, name: impl Into<RunnerName>) -> Self {
        self.runner_name = Some(name.into());
        self
    }

    pub fn with_conclusion(mut self, conclusion: impl Into<String>) -> Self {
        self.conclusion = Some(conclusion.into());
        self
    }
}

/// DomainEvent は Validator の出力
///
/// 今のところ Controller が扱うのは workflow_job だけ。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainEvent {
    Job(JobEvent),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::queued("queued", JobAction::Queued)]
    #[case::in_progress("in_progress", JobAction::InProgress)]
    #[case::completed("completed", JobAction::Completed)]
    #[case::waiting("waiting", JobAction::Unknown("waiting".to_string()))]
    #[case::empty("", JobAction::Unknown(String::new()))]
    fn parse_action(#[case] raw: &str, #[case] expected: JobAction) {
        let action = JobAction::parse(raw);
        assert_eq!(action, expected);
        assert_eq!(action.as_str(), raw);
    }
}
