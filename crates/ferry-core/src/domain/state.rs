//! Job run state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{RunId, RunnerName};

/// Run state.
///
/// State transitions:
/// - Queued -> Running -> Completed
/// - Queued -> Completed (completion for a run this process never spawned)
/// - Queued -> Queued (provisioning failed; a redelivered `queued` may retry)
///
/// Completed is absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Seen, but no live instance is attached.
    Queued,

    /// An instance was created and started for this run.
    Running,

    /// The upstream source reported the job as finished.
    Completed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Completed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Queued => "queued",
            RunState::Running => "running",
            RunState::Completed => "completed",
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record of one job run.
///
/// State transitions via methods (not direct field access), same as the
/// other records in this crate. Every method takes `now` from the caller's
/// `Clock`.
#[derive(Debug, Clone)]
pub struct JobRun {
    pub run_id: RunId,
    pub state: RunState,
    pub conclusion: Option<String>,

    /// Runner spawned for this run, if any.
    pub runner_name: Option<RunnerName>,

    /// Last provisioning error observed for this run.
    pub last_error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobRun {
    pub fn new(run_id: RunId, now: DateTime<Utc>) -> Self {
        Self {
            run_id,
            state: RunState::Queued,
            conclusion: None,
            runner_name: None,
            last_error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn mark_running(&mut self, runner_name: RunnerName, now: DateTime<Utc>) {
        self.state = RunState::Running;
        self.runner_name = Some(runner_name);
        self.last_error = None;
        self.updated_at = now;
    }

    pub fn mark_failed(&mut self, error: String, now: DateTime<Utc>) {
        self.last_error = Some(error);
        self.updated_at = now;
    }

    /// Bookkeeping for `in_progress`; the state is left alone.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }

    pub fn mark_completed(&mut self, conclusion: Option<String>, now: DateTime<Utc>) {
        self.state = RunState::Completed;
        self.conclusion = conclusion;
        self.updated_at = now;
        self.completed_at = Some(now);
    }

    /// A live instance may be attached; a second one must not be spawned.
    pub fn blocks_spawn(&self) -> bool {
        match self.state {
            RunState::Queued => false,
            RunState::Running | RunState::Completed => true,
        }
    }

    /// Queued after a failed provisioning attempt, with nothing live.
    pub fn is_stranded(&self) -> bool {
        self.state == RunState::Queued && self.last_error.is_some()
    }

    /// When this record stopped changing, if it can no longer change on its
    /// own. Running records never expire.
    pub fn settled_at(&self) -> Option<DateTime<Utc>> {
        match self.state {
            RunState::Completed => self.completed_at,
            RunState::Queued if self.is_stranded() => Some(self.updated_at),
            RunState::Queued | RunState::Running => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rstest::rstest;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn new_run_starts_as_queued() {
        let run = JobRun::new(RunId::new(1), t0());
        assert_eq!(run.state, RunState::Queued);
        assert_eq!(run.created_at, t0());
        assert!(run.completed_at.is_none());
        assert!(!run.blocks_spawn());
        assert!(run.settled_at().is_none());
    }

    #[test]
    fn running_clears_last_error() {
        let mut run = JobRun::new(RunId::new(1), t0());
        run.mark_failed("create failed".to_string(), t0() + Duration::seconds(1));
        assert_eq!(run.state, RunState::Queued);
        assert_eq!(run.last_error.as_deref(), Some("create failed"));
        assert!(run.is_stranded());
        assert_eq!(run.settled_at(), Some(t0() + Duration::seconds(1)));

        run.mark_running(RunnerName::new("ferry-x"), t0() + Duration::seconds(2));
        assert_eq!(run.state, RunState::Running);
        assert!(run.last_error.is_none());
        assert_eq!(run.runner_name, Some(RunnerName::new("ferry-x")));
        assert_eq!(run.updated_at, t0() + Duration::seconds(2));
        assert!(run.settled_at().is_none());
    }

    #[test]
    fn failed_remove_on_completion_does_not_strand() {
        let mut run = JobRun::new(RunId::new(3), t0());
        run.mark_completed(None, t0());
        run.mark_failed("remove failed".to_string(), t0() + Duration::seconds(5));
        assert!(!run.is_stranded());
        assert_eq!(run.settled_at(), Some(t0()));
    }

    #[rstest]
    #[case::from_queued(false)]
    #[case::from_running(true)]
    fn completed_records_conclusion(#[case] was_running: bool) {
        let mut run = JobRun::new(RunId::new(7), t0());
        if was_running {
            run.mark_running(RunnerName::new("ferry-x"), t0());
        }
        let done = t0() + Duration::minutes(3);
        run.mark_completed(Some("success".to_string()), done);

        assert_eq!(run.state, RunState::Completed);
        assert!(run.state.is_terminal());
        assert_eq!(run.conclusion.as_deref(), Some("success"));
        assert_eq!(run.completed_at, Some(done));
        assert_eq!(run.settled_at(), Some(done));
        assert!(run.blocks_spawn());
    }
}
