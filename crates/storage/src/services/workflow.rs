//! Operator workflow for turning a set of fragments into race results.
//!
//! ```text
//! Idle -> Selecting -> Previewing -> Merging -> [Scoring] -> Done
//!             ^            |
//!             +------------+            any active state -> Failed
//! ```

use std::fmt;

use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

use crate::dto::race::{ScoreRaceRequest, ScoreRaceResponse};
use crate::dto::record::{MergePreviewResponse, MergeRecordsRequest, RecordResponse};
use crate::error::StorageError;
use crate::services::reconciliation::TelemetryEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub enum WorkflowState {
    Idle,
    Selecting,
    Previewing,
    Merging,
    Scoring,
    Done,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowEvent {
    Select,
    Preview,
    Merge,
    Score,
    Finish,
    Fail,
    Reset,
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl fmt::Display for WorkflowEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl WorkflowState {
    /// The state reached by applying `event`, or `None` when the event is
    /// not allowed here.
    pub fn next(self, event: WorkflowEvent) -> Option<WorkflowState> {
        use WorkflowEvent as E;
        use WorkflowState as S;

        match (self, event) {
            (S::Idle | S::Previewing, E::Select) => Some(S::Selecting),
            (S::Selecting | S::Previewing, E::Preview) => Some(S::Previewing),
            (S::Previewing, E::Merge) => Some(S::Merging),
            (S::Merging, E::Score) => Some(S::Scoring),
            (S::Merging | S::Scoring, E::Finish) => Some(S::Done),
            (S::Selecting | S::Previewing | S::Merging | S::Scoring, E::Fail) => Some(S::Failed),
            (S::Done | S::Failed, E::Reset) => Some(S::Idle),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("cannot {event} while {state}")]
    InvalidTransition {
        state: WorkflowState,
        event: WorkflowEvent,
    },

    #[error("no records selected")]
    NothingSelected,

    #[error(transparent)]
    Engine(#[from] StorageError),
}

/// One pass of the select, preview, merge and score sequence.
pub struct MergeWorkflow {
    engine: TelemetryEngine,
    state: WorkflowState,
    request: Option<MergeRecordsRequest>,
    preview: Option<MergePreviewResponse>,
    record: Option<RecordResponse>,
    scores: Option<ScoreRaceResponse>,
    failure: Option<String>,
}

impl MergeWorkflow {
    pub fn new(engine: TelemetryEngine) -> Self {
        Self {
            engine,
            state: WorkflowState::Idle,
            request: None,
            preview: None,
            record: None,
            scores: None,
            failure: None,
        }
    }

    pub fn state(&self) -> WorkflowState {
        self.state
    }

    pub fn preview(&self) -> Option<&MergePreviewResponse> {
        self.preview.as_ref()
    }

    pub fn record(&self) -> Option<&RecordResponse> {
        self.record.as_ref()
    }

    pub fn scores(&self) -> Option<&ScoreRaceResponse> {
        self.scores.as_ref()
    }

    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    fn apply(&mut self, event: WorkflowEvent) -> Result<(), WorkflowError> {
        let next = self
            .state
            .next(event)
            .ok_or(WorkflowError::InvalidTransition {
                state: self.state,
                event,
            })?;
        tracing::debug!(from = %self.state, to = %next, %event, "workflow transition");
        self.state = next;
        Ok(())
    }

    fn fail(&mut self, error: StorageError) -> WorkflowError {
        self.failure = Some(error.to_string());
        if let Some(next) = self.state.next(WorkflowEvent::Fail) {
            self.state = next;
        }
        WorkflowError::Engine(error)
    }

    /// Chooses the fragments to merge. Allowed again after a preview to
    /// change the selection or offsets.
    pub fn select(&mut self, request: MergeRecordsRequest) -> Result<(), WorkflowError> {
        self.apply(WorkflowEvent::Select)?;
        self.request = Some(request);
        self.preview = None;
        Ok(())
    }

    pub async fn run_preview(&mut self) -> Result<&MergePreviewResponse, WorkflowError> {
        self.apply(WorkflowEvent::Preview)?;
        let request = self.request.as_ref().ok_or(WorkflowError::NothingSelected)?;

        match self.engine.preview_merge(request).await {
            Ok(preview) => Ok(self.preview.insert(preview)),
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Commits the previewed merge and, when `race_id` is given, scores that
    /// race with the new canonical record.
    pub async fn commit(&mut self, race_id: Option<i32>) -> Result<(), WorkflowError> {
        self.apply(WorkflowEvent::Merge)?;
        let request = self.request.as_ref().ok_or(WorkflowError::NothingSelected)?;

        match self.engine.reconcile(request).await {
            Ok(record) => self.record = Some(record),
            Err(e) => return Err(self.fail(e)),
        }

        if let Some(race_id) = race_id {
            self.apply(WorkflowEvent::Score)?;
            let scoring = ScoreRaceRequest {
                race_id,
                overwrite_overrides: false,
            };
            match self.engine.score_race(&scoring).await {
                Ok(scores) => self.scores = Some(scores),
                Err(e) => return Err(self.fail(e)),
            }
        }

        self.apply(WorkflowEvent::Finish)
    }

    /// Returns to `Idle` after a finished or failed pass.
    pub fn reset(&mut self) -> Result<(), WorkflowError> {
        self.apply(WorkflowEvent::Reset)?;
        self.request = None;
        self.preview = None;
        self.record = None;
        self.scores = None;
        self.failure = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::repository::MemoryStore;
    use crate::services::reconciliation::tests::{engine, readings, upload};

    fn merge_request(device_id: i32, record_ids: Vec<i32>) -> MergeRecordsRequest {
        MergeRecordsRequest {
            record_ids,
            time_offsets: Vec::new(),
            competition_id: None,
            device_id,
        }
    }

    #[test]
    fn test_transition_table() {
        use WorkflowEvent as E;
        use WorkflowState as S;

        assert_eq!(S::Idle.next(E::Select), Some(S::Selecting));
        assert_eq!(S::Previewing.next(E::Select), Some(S::Selecting));
        assert_eq!(S::Previewing.next(E::Preview), Some(S::Previewing));
        assert_eq!(S::Merging.next(E::Finish), Some(S::Done));
        assert_eq!(S::Failed.next(E::Reset), Some(S::Idle));

        assert_eq!(S::Idle.next(E::Merge), None);
        assert_eq!(S::Selecting.next(E::Merge), None);
        assert_eq!(S::Done.next(E::Fail), None);
        assert_eq!(S::Idle.next(E::Fail), None);
        assert!(S::Done.is_terminal());
        assert!(!S::Scoring.is_terminal());
    }

    #[tokio::test]
    async fn test_full_pass_merges_and_scores() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(&store);
        let competition = store.add_competition("Spring Cup");
        let race = store.add_race(competition.competition_id, "Heat 1", "sprint");
        let team = store.add_team("Volt", "Open", "Kart");
        let device = store.add_device(1, Some(team.team_id));

        let a = upload(&engine, device.device_id, Some(race.race_id), readings(&[0, 3000], 8.0)).await;
        let b = upload(&engine, device.device_id, Some(race.race_id), readings(&[0, 2000], 8.0)).await;

        let mut workflow = MergeWorkflow::new(engine);
        workflow
            .select(merge_request(device.device_id, vec![a.record_id, b.record_id]))
            .unwrap();
        let preview = workflow.run_preview().await.unwrap();
        assert_eq!(preview.elapsed_ms, Some(6000));
        assert_eq!(workflow.state(), WorkflowState::Previewing);

        workflow.commit(Some(race.race_id)).await.unwrap();

        assert_eq!(workflow.state(), WorkflowState::Done);
        assert_eq!(workflow.record().map(|r| r.sample_count), Some(4));
        let scores = workflow.scores().unwrap();
        let kart = &scores.rankings_by_category["Open Kart"];
        assert_eq!(kart.len(), 1);
        assert_eq!(kart[0].elapsed_ms, Some(6000));
        assert_eq!(kart[0].score, 100);
    }

    #[tokio::test]
    async fn test_commit_requires_preview() {
        let store = Arc::new(MemoryStore::new());
        let mut workflow = MergeWorkflow::new(engine(&store));

        let err = workflow.commit(None).await.unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::InvalidTransition {
                state: WorkflowState::Idle,
                event: WorkflowEvent::Merge
            }
        ));

        workflow.select(merge_request(1, vec![1, 2])).unwrap();
        assert!(workflow.commit(None).await.is_err());
        assert_eq!(workflow.state(), WorkflowState::Selecting);
    }

    #[tokio::test]
    async fn test_engine_error_fails_the_pass_until_reset() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(&store);
        let device = store.add_device(1, None);
        let a = upload(&engine, device.device_id, None, readings(&[0], 1.0)).await;

        let mut workflow = MergeWorkflow::new(engine);
        workflow
            .select(merge_request(device.device_id, vec![a.record_id, 9999]))
            .unwrap();

        let err = workflow.run_preview().await.unwrap_err();
        assert!(matches!(err, WorkflowError::Engine(StorageError::NotFound { .. })));
        assert_eq!(workflow.state(), WorkflowState::Failed);
        assert!(workflow.failure().is_some());

        assert!(workflow.select(merge_request(device.device_id, vec![1, 2])).is_err());
        workflow.reset().unwrap();
        assert_eq!(workflow.state(), WorkflowState::Idle);
        assert!(workflow.failure().is_none());
    }
}
