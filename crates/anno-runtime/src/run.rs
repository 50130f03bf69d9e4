//! Run state tracking for scheduled workflow executions.

use anno_core::{GraphId, JobHandle, RunId};
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use crate::error::{WorkflowError, WorkflowResult};

/// Lifecycle state of a run.
///
/// `scheduled -> in_progress -> { success, failed }`; terminal states
/// are final. There is no retry and no cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, EnumIter, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RunStatus {
    /// Created and submitted, not yet picked up.
    Scheduled,
    /// Currently executing.
    InProgress,
    /// Finished successfully.
    Success,
    /// Finished with an error.
    Failed,
}

impl RunStatus {
    /// Whether this status admits no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Success | RunStatus::Failed)
    }

    /// Whether a transition to `next` is allowed.
    pub fn can_transition(&self, next: RunStatus) -> bool {
        matches!(
            (self, next),
            (RunStatus::Scheduled, RunStatus::InProgress)
                | (RunStatus::InProgress, RunStatus::Success)
                | (RunStatus::InProgress, RunStatus::Failed)
        )
    }
}

/// One scheduled execution of a graph.
///
/// Created at scheduling time and mutated only by the executor; runs
/// are never deleted here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    /// Run identifier.
    pub id: RunId,
    /// Graph this run executes.
    pub graph_id: GraphId,
    /// Handle of the background job carrying the run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job: Option<JobHandle>,
    /// Current lifecycle state.
    pub status: RunStatus,
    /// Who scheduled the run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_by: Option<String>,
    /// When the run was scheduled.
    pub scheduled_at: Timestamp,
    /// When execution started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<Timestamp>,
    /// When execution finished, in either terminal state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<Timestamp>,
    /// Error message of a failed run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PipelineRun {
    /// Creates a freshly scheduled run.
    pub fn new(graph_id: GraphId, scheduled_by: Option<String>) -> Self {
        Self {
            id: RunId::new(),
            graph_id,
            job: None,
            status: RunStatus::Scheduled,
            scheduled_by,
            scheduled_at: Timestamp::now(),
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    fn transition(&mut self, next: RunStatus) -> WorkflowResult<()> {
        if !self.status.can_transition(next) {
            return Err(WorkflowError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Marks the run as executing.
    pub fn start(&mut self) -> WorkflowResult<()> {
        self.transition(RunStatus::InProgress)?;
        self.started_at = Some(Timestamp::now());
        Ok(())
    }

    /// Marks the run as finished successfully.
    pub fn succeed(&mut self) -> WorkflowResult<()> {
        self.transition(RunStatus::Success)?;
        self.finished_at = Some(Timestamp::now());
        Ok(())
    }

    /// Marks the run as failed, retaining the error message.
    pub fn fail(&mut self, message: impl Into<String>) -> WorkflowResult<()> {
        self.transition(RunStatus::Failed)?;
        self.finished_at = Some(Timestamp::now());
        self.error = Some(message.into());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_transitions() {
        let mut run = PipelineRun::new(GraphId::new(), Some("tester".into()));
        assert_eq!(run.status, RunStatus::Scheduled);

        run.start().unwrap();
        assert_eq!(run.status, RunStatus::InProgress);
        assert!(run.started_at.is_some());

        run.succeed().unwrap();
        assert_eq!(run.status, RunStatus::Success);
        assert!(run.finished_at.is_some());
        assert!(run.error.is_none());
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut run = PipelineRun::new(GraphId::new(), None);
        run.start().unwrap();
        run.fail("boom").unwrap();
        assert_eq!(run.error.as_deref(), Some("boom"));

        assert!(matches!(
            run.start().unwrap_err(),
            WorkflowError::InvalidTransition { from: RunStatus::Failed, .. }
        ));
        assert!(run.succeed().is_err());
    }

    #[test]
    fn test_success_requires_in_progress() {
        let mut run = PipelineRun::new(GraphId::new(), None);
        assert!(run.succeed().is_err());
        assert!(run.fail("early").is_err());
        assert_eq!(run.status, RunStatus::Scheduled);
    }
}
