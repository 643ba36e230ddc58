use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// Re-export async trait for convenience
pub use async_trait::async_trait;

/// Result type for service-boundary operations
pub type SessionResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Receiver half of the orchestrator's event stream
pub type EventReceiver = tokio::sync::broadcast::Receiver<SessionEvent>;

/// Phase of a research/patient session
///
/// Closed set: every transition the orchestrator performs is between two of
/// these variants, so invalid phase strings are unrepresentable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionPhase {
    Idle,
    ResearchPrompt,
    ResearchProcessing,
    ResearchCodeReady,
    ResearchAwaitingData,
    ResearchResults,
    PatientSearch,
    EhrLoading,
    EhrDisplay,
    DrugSelection,
    AnalysisResults,
}

impl SessionPhase {
    /// True for every phase except `Idle`
    pub fn is_active(&self) -> bool {
        !matches!(self, SessionPhase::Idle)
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionPhase::Idle => "idle",
            SessionPhase::ResearchPrompt => "research-prompt",
            SessionPhase::ResearchProcessing => "research-processing",
            SessionPhase::ResearchCodeReady => "research-code-ready",
            SessionPhase::ResearchAwaitingData => "research-awaiting-data",
            SessionPhase::ResearchResults => "research-results",
            SessionPhase::PatientSearch => "patient-search",
            SessionPhase::EhrLoading => "ehr-loading",
            SessionPhase::EhrDisplay => "ehr-display",
            SessionPhase::DrugSelection => "drug-selection",
            SessionPhase::AnalysisResults => "analysis-results",
        };
        write!(f, "{}", name)
    }
}

/// Status of a single pipeline step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Active,
    Complete,
    Failed,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StepStatus::Pending => "pending",
            StepStatus::Active => "active",
            StepStatus::Complete => "complete",
            StepStatus::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// One stage of the agent pipeline as shown to the presentation layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStep {
    pub id: String,
    pub label: String,
    pub status: StepStatus,
    pub message: String,
}

impl AgentStep {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            status: StepStatus::Pending,
            message: String::new(),
        }
    }
}

/// Remote job lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    /// Queued and running jobs are still in flight
    pub fn in_flight(&self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Running)
    }
}

/// Response to a job submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSubmission {
    pub run_id: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Point-in-time status of a submitted job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusReport {
    pub run_id: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Raw result files of a completed pipeline run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobResults {
    pub run_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub causal_question: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub design_spec: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub omop_mappings: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validator_feedback: Option<String>,
}

impl JobResults {
    /// Collapse the result files into a deliverable artifact, if the run
    /// produced analysis code
    pub fn into_artifact(self) -> Option<CodeArtifact> {
        let code = self.code?;
        Some(CodeArtifact {
            code,
            causal_question: self.causal_question,
            design_spec: self.design_spec,
            omop_mappings: self.omop_mappings,
            validator_feedback: self.validator_feedback,
        })
    }
}

/// Generated analysis deliverable for a completed research session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeArtifact {
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub causal_question: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub design_spec: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub omop_mappings: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validator_feedback: Option<String>,
}

// ============================================================================
// Trial analytics payload
// ============================================================================

/// Cohort attrition from initial population to the two arms
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortFlow {
    pub initial_population: u64,
    pub eligible: u64,
    pub treatment_arm: u64,
    pub control_arm: u64,
}

/// Propensity-score overlap diagnostics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropensitySummary {
    pub overlap_coefficient: f64,
    pub effective_sample_ratio: f64,
}

/// Survival estimate for one arm at one time point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmPoint {
    pub survival: f64,
    pub ci_lower: f64,
    pub ci_upper: f64,
    pub at_risk: u64,
}

/// One point on the two-arm survival curve
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurvivalPoint {
    pub month: u32,
    pub treatment: ArmPoint,
    pub control: ArmPoint,
}

/// Subgroup hazard-ratio row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubgroupHazardRatio {
    pub subgroup: String,
    pub hazard_ratio: f64,
    pub ci_lower: f64,
    pub ci_upper: f64,
    pub p_value: f64,
}

/// Overall conclusion derived from the primary analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub primary_hazard_ratio: f64,
    pub significant: bool,
    pub conclusion: String,
}

/// Complete analytics payload for one trial entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialData {
    pub trial_name: String,
    pub cohort: CohortFlow,
    pub propensity: PropensitySummary,
    pub survival: Vec<SurvivalPoint>,
    pub hazard_ratios: Vec<SubgroupHazardRatio>,
    pub validation: ValidationSummary,
}

/// An example trial: fallback data source and simulation driver
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExampleTrial {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub code: String,
    pub data: TrialData,
    #[serde(default)]
    pub images: Vec<String>,
}

/// Selected patient context for the patient branch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientSummary {
    pub id: String,
    pub name: String,
    pub record_count: u64,
}

/// What the presentation layer receives on every render
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub phase: SessionPhase,
    pub steps: Vec<AgentStep>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<CodeArtifact>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<TrialData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notice: Option<String>,
}

// ============================================================================
// Structured session events
// ============================================================================

/// Structured events emitted by the orchestrator
///
/// Broadcast to in-process observers and optionally framed onto stderr for
/// machine consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Phase transition applied
    PhaseChanged {
        from: SessionPhase,
        to: SessionPhase,
    },
    /// A pipeline step changed status
    StepUpdated {
        step_id: String,
        status: StepStatus,
        message: String,
    },
    /// Remote job accepted by the backend
    JobSubmitted {
        run_id: String,
    },
    /// Transient error while polling job status; the poll loop continues
    JobPollError {
        message: String,
    },
    /// Remote pipeline reported failure
    JobFailed {
        error: String,
    },
    /// Code artifact available
    ArtifactReady {
        example_id: Option<String>,
    },
    /// Final analytics payload stored
    ResultsReady,
    /// User-visible notice text changed
    Notice {
        message: String,
    },
    /// Session returned to idle
    SessionReset,
}

impl SessionEvent {
    /// Emit this event to stderr for line-oriented consumers
    pub fn emit(&self) {
        if let Ok(json) = serde_json::to_string(self) {
            use std::io::Write;
            eprintln!("__SESSION_EVENT__:{}", json);
            // Force flush stderr in async/concurrent contexts
            let _ = std::io::stderr().flush();
        }
    }
}

// ============================================================================
// Console logging macros (for CLI binaries)
// ============================================================================

/// Logs an informational message.
///
/// # Example
/// ```
/// use trial_session_sdk::log_info;
/// log_info!("Submitting question to backend...");
/// let n = 4;
/// log_info!("Catalog holds {} examples", n);
/// ```
#[macro_export]
macro_rules! log_info {
    ($message:expr) => {
        println!("\x1b[36mℹ {}\x1b[0m", $message);
    };
    ($fmt:expr, $($arg:tt)*) => {
        println!("\x1b[36mℹ {}\x1b[0m", format!($fmt, $($arg)*));
    };
}

/// Logs a warning message.
///
/// # Example
/// ```
/// use trial_session_sdk::log_warning;
/// log_warning!("Backend unreachable, falling back to simulation");
/// ```
#[macro_export]
macro_rules! log_warning {
    ($message:expr) => {
        println!("\x1b[33m⚠ Warning: {}\x1b[0m", $message);
    };
    ($fmt:expr, $($arg:tt)*) => {
        println!("\x1b[33m⚠ Warning: {}\x1b[0m", format!($fmt, $($arg)*));
    };
}

/// Logs a phase transition banner.
///
/// # Example
/// ```
/// use trial_session_sdk::{log_phase, SessionPhase};
/// log_phase!(SessionPhase::ResearchProcessing);
/// ```
///
/// Outputs:
/// ```text
/// ═══ PHASE: research-processing ═══
/// ```
#[macro_export]
macro_rules! log_phase {
    ($phase:expr) => {
        println!("\x1b[1;36m═══ PHASE: {} ═══\x1b[0m", $phase);
    };
}

/// Logs a step becoming active.
///
/// # Example
/// ```
/// use trial_session_sdk::log_step_active;
/// log_step_active!("Question Agent", "Formulating causal question");
/// ```
#[macro_export]
macro_rules! log_step_active {
    ($label:expr, $msg:expr) => {
        println!("\x1b[36m  → {}: {}\x1b[0m", $label, $msg);
    };
}

/// Logs a completed step.
///
/// # Example
/// ```
/// use trial_session_sdk::log_step_complete;
/// log_step_complete!("Code Agent");
/// ```
#[macro_export]
macro_rules! log_step_complete {
    ($label:expr) => {
        println!("\x1b[32m  ✓ {} complete\x1b[0m", $label);
    };
}

/// Logs a failed step with its error.
///
/// # Example
/// ```
/// use trial_session_sdk::log_step_failed;
/// log_step_failed!("Validator Agent", "timeout");
/// ```
#[macro_export]
macro_rules! log_step_failed {
    ($label:expr, $error:expr) => {
        println!("\x1b[31m  ✗ {} failed: {}\x1b[0m", $label, $error);
    };
}

// ============================================================================
// Service traits
// ============================================================================

/// Remote job-submission service
///
/// Narrow interface over the trial backend: submit a question, poll status,
/// fetch result files. Implementations must be shareable across the
/// orchestrator and its background poller.
#[async_trait]
pub trait JobService: Send + Sync {
    /// Submit a research question, receiving an opaque run id
    async fn submit_job(&self, question: &str) -> SessionResult<JobSubmission>;

    /// Fetch current status for a run
    async fn job_status(&self, run_id: &str) -> SessionResult<JobStatusReport>;

    /// Fetch result files for a completed run
    async fn job_results(&self, run_id: &str) -> SessionResult<JobResults>;
}

/// Source of example trials
#[async_trait]
pub trait ExampleCatalog: Send + Sync {
    /// List all example trials, in stable catalog order
    async fn list_examples(&self) -> SessionResult<Vec<ExampleTrial>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_serializes_kebab_case() {
        let json = serde_json::to_string(&SessionPhase::ResearchCodeReady).unwrap();
        assert_eq!(json, "\"research-code-ready\"");
        let back: SessionPhase = serde_json::from_str("\"research-awaiting-data\"").unwrap();
        assert_eq!(back, SessionPhase::ResearchAwaitingData);
    }

    #[test]
    fn job_status_parses_backend_strings() {
        let status: JobStatus = serde_json::from_str("\"queued\"").unwrap();
        assert!(status.in_flight());
        let status: JobStatus = serde_json::from_str("\"completed\"").unwrap();
        assert!(!status.in_flight());
    }

    #[test]
    fn results_without_code_yield_no_artifact() {
        let results = JobResults {
            run_id: "run_1".to_string(),
            design_spec: Some("spec".to_string()),
            ..Default::default()
        };
        assert!(results.into_artifact().is_none());
    }

    #[test]
    fn event_round_trips_through_tag() {
        let event = SessionEvent::PhaseChanged {
            from: SessionPhase::Idle,
            to: SessionPhase::ResearchPrompt,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"phase_changed\""));
        let back: SessionEvent = serde_json::from_str(&json).unwrap();
        match back {
            SessionEvent::PhaseChanged { to, .. } => assert_eq!(to, SessionPhase::ResearchPrompt),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
