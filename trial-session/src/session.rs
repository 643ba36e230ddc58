//! Session state container
//!
//! A [`WorkflowSession`] is the single mutable state record for one research
//! or patient flow. All background tasks funnel their mutations through the
//! orchestrator's shared handle to this struct; nothing else holds session
//! state.

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use trial_session_sdk::{
    AgentStep, CodeArtifact, ExampleTrial, PatientSummary, SessionPhase, SessionSnapshot,
    StepStatus, TrialData,
};
use uuid::Uuid;

/// The agent pipeline roster, in execution order
///
/// Fixed at session creation and never reordered. Mirrors the backend
/// pipeline: question framing, trial design, validation, concept mapping,
/// code generation.
pub const AGENT_ROSTER: [(&str, &str); 5] = [
    ("question", "Question Agent"),
    ("design", "Trial Design Agent"),
    ("validator", "Validator Agent"),
    ("omop", "OMOP Mapping Agent"),
    ("code", "Code Agent"),
];

/// Mutable state for one session
#[derive(Debug, Clone)]
pub struct WorkflowSession {
    pub id: Uuid,
    pub phase: SessionPhase,
    /// The user's research question; set once per submission
    pub question: Option<String>,
    /// When the processing phase began
    pub started_at: Option<DateTime<Utc>>,
    /// Monotonic twin of `started_at`; drives simulated progress
    pub started_instant: Option<Instant>,
    pub steps: Vec<AgentStep>,
    /// Opaque id of an in-flight remote job
    pub job_id: Option<String>,
    pub artifact: Option<CodeArtifact>,
    pub results: Option<TrialData>,
    /// User-visible banner text for recoverable failures
    pub notice: Option<String>,
    /// Example selected to drive simulation and act as fallback data
    pub selected_example: Option<ExampleTrial>,
    /// Patient context for the patient branch
    pub patient: Option<PatientSummary>,
    /// Bumped on every submission and reset; background tasks capture it at
    /// spawn and drop mutations when it no longer matches
    pub epoch: u64,
}

impl WorkflowSession {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            phase: SessionPhase::Idle,
            question: None,
            started_at: None,
            started_instant: None,
            steps: default_steps(),
            job_id: None,
            artifact: None,
            results: None,
            notice: None,
            selected_example: None,
            patient: None,
            epoch: 0,
        }
    }

    /// Clear every per-flow field and return to `Idle`
    ///
    /// The caller must cancel any background task before invoking this
    /// (cancel-before-clear); the epoch bump makes stray ticks inert either
    /// way.
    pub fn reset(&mut self) {
        self.phase = SessionPhase::Idle;
        self.question = None;
        self.started_at = None;
        self.started_instant = None;
        self.steps = default_steps();
        self.job_id = None;
        self.artifact = None;
        self.results = None;
        self.notice = None;
        self.selected_example = None;
        self.patient = None;
        self.epoch += 1;
    }

    /// Reset all steps to pending without touching other fields
    pub fn reset_steps(&mut self) {
        self.steps = default_steps();
    }

    /// Mark every step complete (job finished while visualization lagged)
    pub fn complete_all_steps(&mut self) {
        for step in &mut self.steps {
            step.status = StepStatus::Complete;
            step.message = "Done".to_string();
        }
    }

    /// Mark the currently active step failed, leaving downstream steps alone
    pub fn fail_active_step(&mut self, error: &str) {
        if let Some(step) = self
            .steps
            .iter_mut()
            .find(|s| s.status == StepStatus::Active)
        {
            step.status = StepStatus::Failed;
            step.message = error.to_string();
        }
    }

    /// Seconds since the processing phase began
    pub fn elapsed_secs(&self) -> f64 {
        match self.started_instant {
            Some(started) => started.elapsed().as_secs_f64(),
            None => 0.0,
        }
    }

    /// Immutable view for the presentation layer
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id,
            phase: self.phase,
            steps: self.steps.clone(),
            artifact: self.artifact.clone(),
            results: self.results.clone(),
            notice: self.notice.clone(),
        }
    }
}

impl Default for WorkflowSession {
    fn default() -> Self {
        Self::new()
    }
}

fn default_steps() -> Vec<AgentStep> {
    AGENT_ROSTER
        .iter()
        .map(|(id, label)| AgentStep::new(*id, *label))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_is_idle_with_pending_steps() {
        let session = WorkflowSession::new();
        assert_eq!(session.phase, SessionPhase::Idle);
        assert_eq!(session.steps.len(), AGENT_ROSTER.len());
        assert!(session
            .steps
            .iter()
            .all(|s| s.status == StepStatus::Pending));
    }

    #[test]
    fn reset_clears_fields_and_bumps_epoch() {
        let mut session = WorkflowSession::new();
        session.phase = SessionPhase::ResearchProcessing;
        session.question = Some("test".to_string());
        session.job_id = Some("run_1".to_string());
        session.started_at = Some(Utc::now());
        let epoch = session.epoch;

        session.reset();

        assert_eq!(session.phase, SessionPhase::Idle);
        assert!(session.question.is_none());
        assert!(session.job_id.is_none());
        assert!(session.started_at.is_none());
        assert_eq!(session.epoch, epoch + 1);
    }

    #[test]
    fn fail_active_step_leaves_downstream_pending() {
        let mut session = WorkflowSession::new();
        session.steps[0].status = StepStatus::Complete;
        session.steps[1].status = StepStatus::Active;

        session.fail_active_step("timeout");

        assert_eq!(session.steps[0].status, StepStatus::Complete);
        assert_eq!(session.steps[1].status, StepStatus::Failed);
        assert_eq!(session.steps[1].message, "timeout");
        assert!(session.steps[2..]
            .iter()
            .all(|s| s.status == StepStatus::Pending));
    }
}
