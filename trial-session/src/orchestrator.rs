//! Workflow orchestration for research and patient sessions
//!
//! The orchestrator owns a single [`WorkflowSession`] behind a shared lock,
//! advances it through its phases, and manages the one background task
//! (status poller, progress simulation, or EHR-load delay) that may exist at
//! a time. Externally visible operations return quickly; progress arrives by
//! the background task mutating the shared session and is observed through
//! snapshots and the broadcast event stream.
//!
//! Stale-tick protection is two-layered: the task handle is aborted on every
//! cancellation point, and every mutation a task attempts is dropped unless
//! the session epoch still matches the one captured at spawn. Reset
//! cancels-before-clearing, so a blanked session can never be written to by
//! a leftover timer.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use chrono::Utc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use trial_session_sdk::{
    AgentStep, CodeArtifact, EventReceiver, ExampleCatalog, JobService, JobStatus, PatientSummary,
    SessionEvent, SessionPhase, SessionSnapshot, TrialData,
};

use crate::catalog::select_example;
use crate::session::WorkflowSession;
use crate::simulation::Timeline;
use crate::synth::TrialDataStore;

/// Scale hint used when the patient branch has no selected patient
const DEFAULT_RECORD_COUNT: u64 = 45000;

/// Tunables for the orchestrator's background work
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Period of the status poller and simulation ticker
    pub poll_interval: Duration,
    /// Step schedule for the progress simulation
    pub timeline: Timeline,
    /// Simulated EHR fetch latency in the patient branch
    pub ehr_load_delay: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            timeline: Timeline::standard(),
            ehr_load_delay: Duration::from_millis(1500),
        }
    }
}

/// Drives one session at a time through the research or patient flow
pub struct TrialOrchestrator {
    session: Arc<Mutex<WorkflowSession>>,
    events: broadcast::Sender<SessionEvent>,
    job_service: Option<Arc<dyn JobService>>,
    catalog: Arc<dyn ExampleCatalog>,
    data_store: Arc<TrialDataStore>,
    background: Mutex<Option<JoinHandle<()>>>,
    config: OrchestratorConfig,
}

impl TrialOrchestrator {
    /// Create an orchestrator
    ///
    /// `job_service = None` selects simulation mode: submissions run the
    /// elapsed-time progress simulation against the example catalog instead
    /// of a live backend.
    pub fn new(
        catalog: Arc<dyn ExampleCatalog>,
        job_service: Option<Arc<dyn JobService>>,
        data_store: Arc<TrialDataStore>,
        config: OrchestratorConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            session: Arc::new(Mutex::new(WorkflowSession::new())),
            events,
            job_service,
            catalog,
            data_store,
            background: Mutex::new(None),
            config,
        }
    }

    /// Subscribe to the structured event stream
    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    /// Immutable view of the current session for rendering
    pub fn snapshot(&self) -> SessionSnapshot {
        self.session.lock().unwrap().snapshot()
    }

    pub fn phase(&self) -> SessionPhase {
        self.session.lock().unwrap().phase
    }

    /// The shared synthetic-data cache (administrative access)
    pub fn data_store(&self) -> &Arc<TrialDataStore> {
        &self.data_store
    }

    // ------------------------------------------------------------------
    // Research branch
    // ------------------------------------------------------------------

    /// Idle → ResearchPrompt
    pub fn start_research(&self) -> Result<()> {
        self.begin_flow(SessionPhase::ResearchPrompt)
    }

    /// ResearchPrompt|ResearchProcessing → ResearchProcessing
    ///
    /// Resubmission while a job is in flight is allowed; the previous
    /// background task is cancelled before the new one starts, so exactly
    /// one polling task is ever live.
    pub async fn submit_question(&self, question: &str) -> Result<()> {
        {
            let session = self.session.lock().unwrap();
            if !matches!(
                session.phase,
                SessionPhase::ResearchPrompt | SessionPhase::ResearchProcessing
            ) {
                bail!("cannot submit a question from phase {}", session.phase);
            }
        }
        self.cancel_background();

        let epoch = {
            let mut session = self.session.lock().unwrap();
            let from = session.phase;
            session.question = Some(question.to_string());
            session.started_at = Some(Utc::now());
            session.started_instant = Some(Instant::now());
            session.reset_steps();
            session.job_id = None;
            session.artifact = None;
            session.results = None;
            session.notice = None;
            session.selected_example = None;
            session.epoch += 1;
            session.phase = SessionPhase::ResearchProcessing;
            self.emit(SessionEvent::PhaseChanged {
                from,
                to: SessionPhase::ResearchProcessing,
            });
            session.epoch
        };

        match &self.job_service {
            Some(service) => self.submit_live(service, question, epoch).await,
            None => self.start_simulation(question, epoch).await,
        }
    }

    async fn submit_live(
        &self,
        service: &Arc<dyn JobService>,
        question: &str,
        epoch: u64,
    ) -> Result<()> {
        match service.submit_job(question).await {
            Ok(submission) => {
                let run_id = submission.run_id;
                let live = with_live_session(&self.session, epoch, |session| {
                    session.job_id = Some(run_id.clone());
                });
                if live.is_none() {
                    // Reset raced the submission; the job is orphaned on the
                    // backend but must not touch this session
                    return Ok(());
                }
                self.emit(SessionEvent::JobSubmitted {
                    run_id: run_id.clone(),
                });
                self.spawn_background(poll_job_status(
                    Arc::clone(&self.session),
                    self.events.clone(),
                    Arc::clone(service),
                    run_id,
                    epoch,
                    self.config.poll_interval,
                    self.config.timeline.clone(),
                ));
            }
            Err(err) => {
                self.fail_submission(epoch, format!("Could not submit trial job: {}", err));
            }
        }
        Ok(())
    }

    async fn start_simulation(&self, question: &str, epoch: u64) -> Result<()> {
        match self.catalog.list_examples().await {
            Ok(examples) => match select_example(question, &examples) {
                Some(example) => {
                    let example = example.clone();
                    let live = with_live_session(&self.session, epoch, |session| {
                        session.selected_example = Some(example);
                    });
                    if live.is_none() {
                        return Ok(());
                    }
                    self.spawn_background(drive_simulation(
                        Arc::clone(&self.session),
                        self.events.clone(),
                        epoch,
                        self.config.poll_interval,
                        self.config.timeline.clone(),
                    ));
                }
                None => {
                    self.fail_submission(epoch, "No example trials available".to_string());
                }
            },
            Err(err) => {
                self.fail_submission(epoch, format!("Could not load example trials: {}", err));
            }
        }
        Ok(())
    }

    /// Submission failed before any background task started: surface the
    /// notice and return the session to the prompt
    fn fail_submission(&self, epoch: u64, message: String) {
        let events = with_live_session(&self.session, epoch, |session| {
            session.notice = Some(message.clone());
            session.started_at = None;
            session.started_instant = None;
            let from = session.phase;
            session.phase = SessionPhase::ResearchPrompt;
            vec![
                SessionEvent::Notice { message },
                SessionEvent::PhaseChanged {
                    from,
                    to: SessionPhase::ResearchPrompt,
                },
            ]
        });
        self.emit_all(events.unwrap_or_default());
    }

    /// ResearchCodeReady → ResearchAwaitingData
    pub fn acknowledge_artifact(&self) -> Result<()> {
        self.advance(
            SessionPhase::ResearchCodeReady,
            SessionPhase::ResearchAwaitingData,
        )
    }

    /// ResearchAwaitingData → ResearchResults
    ///
    /// `None` substitutes the matched example's analytics payload.
    pub fn supply_data(&self, payload: Option<TrialData>) -> Result<()> {
        let events = {
            let mut session = self.session.lock().unwrap();
            if session.phase != SessionPhase::ResearchAwaitingData {
                bail!("cannot supply data from phase {}", session.phase);
            }
            let data = payload.or_else(|| {
                session
                    .selected_example
                    .as_ref()
                    .map(|example| example.data.clone())
            });
            let Some(data) = data else {
                bail!("no data payload supplied and no example selected");
            };
            session.results = Some(data);
            let from = session.phase;
            session.phase = SessionPhase::ResearchResults;
            vec![
                SessionEvent::ResultsReady,
                SessionEvent::PhaseChanged {
                    from,
                    to: SessionPhase::ResearchResults,
                },
            ]
        };
        self.emit_all(events);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Patient branch
    // ------------------------------------------------------------------

    /// Idle → PatientSearch
    pub fn start_patient_flow(&self) -> Result<()> {
        self.begin_flow(SessionPhase::PatientSearch)
    }

    /// PatientSearch → EhrLoading, advancing to EhrDisplay after the
    /// simulated fetch delay
    pub fn select_patient(&self, patient: PatientSummary) -> Result<()> {
        {
            let session = self.session.lock().unwrap();
            if session.phase != SessionPhase::PatientSearch {
                bail!("cannot select a patient from phase {}", session.phase);
            }
        }
        self.cancel_background();
        let epoch = {
            let mut session = self.session.lock().unwrap();
            session.patient = Some(patient);
            session.epoch += 1;
            let from = session.phase;
            session.phase = SessionPhase::EhrLoading;
            self.emit(SessionEvent::PhaseChanged {
                from,
                to: SessionPhase::EhrLoading,
            });
            session.epoch
        };
        self.spawn_background(finish_ehr_load(
            Arc::clone(&self.session),
            self.events.clone(),
            epoch,
            self.config.ehr_load_delay,
        ));
        Ok(())
    }

    /// EhrDisplay → DrugSelection
    pub fn proceed_to_drug_selection(&self) -> Result<()> {
        self.advance(SessionPhase::EhrDisplay, SessionPhase::DrugSelection)
    }

    /// DrugSelection → AnalysisResults, synthesizing the analytics payload
    pub fn select_drug(&self, drug_id: &str, drug_name: &str) -> Result<()> {
        let events = {
            let mut session = self.session.lock().unwrap();
            if session.phase != SessionPhase::DrugSelection {
                bail!("cannot select a drug from phase {}", session.phase);
            }
            let scale = session
                .patient
                .as_ref()
                .map(|patient| patient.record_count)
                .unwrap_or(DEFAULT_RECORD_COUNT);
            let data = self.data_store.get_or_generate(drug_id, drug_name, scale);
            session.results = Some((*data).clone());
            let from = session.phase;
            session.phase = SessionPhase::AnalysisResults;
            vec![
                SessionEvent::ResultsReady,
                SessionEvent::PhaseChanged {
                    from,
                    to: SessionPhase::AnalysisResults,
                },
            ]
        };
        self.emit_all(events);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Reset & teardown
    // ------------------------------------------------------------------

    /// Return to Idle from any phase
    pub fn reset(&self) {
        // Cancel-before-clear: the background task must be dead before the
        // session fields go blank
        self.cancel_background();
        let from = {
            let mut session = self.session.lock().unwrap();
            let from = session.phase;
            session.reset();
            from
        };
        if from.is_active() {
            self.emit(SessionEvent::PhaseChanged {
                from,
                to: SessionPhase::Idle,
            });
        }
        self.emit(SessionEvent::SessionReset);
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn begin_flow(&self, target: SessionPhase) -> Result<()> {
        {
            let session = self.session.lock().unwrap();
            if session.phase != SessionPhase::Idle {
                bail!("cannot start {} from phase {}", target, session.phase);
            }
        }
        self.cancel_background();
        {
            let mut session = self.session.lock().unwrap();
            session.reset();
            session.phase = target;
        }
        self.emit(SessionEvent::PhaseChanged {
            from: SessionPhase::Idle,
            to: target,
        });
        Ok(())
    }

    fn advance(&self, expected: SessionPhase, to: SessionPhase) -> Result<()> {
        {
            let mut session = self.session.lock().unwrap();
            if session.phase != expected {
                bail!("cannot move to {} from phase {}", to, session.phase);
            }
            session.phase = to;
        }
        self.emit(SessionEvent::PhaseChanged { from: expected, to });
        Ok(())
    }

    fn spawn_background(&self, task: impl Future<Output = ()> + Send + 'static) {
        let handle = tokio::spawn(task);
        if let Some(old) = self.background.lock().unwrap().replace(handle) {
            old.abort();
        }
    }

    fn cancel_background(&self) {
        if let Some(handle) = self.background.lock().unwrap().take() {
            handle.abort();
        }
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn emit_all(&self, events: Vec<SessionEvent>) {
        for event in events {
            let _ = self.events.send(event);
        }
    }
}

impl Drop for TrialOrchestrator {
    fn drop(&mut self) {
        // A leaked timer mutating a destroyed session's state would be a
        // correctness bug; teardown cancels like any other phase exit
        self.cancel_background();
    }
}

/// Run `mutate` only if the session epoch still matches the one captured at
/// task spawn; returns `None` when the session has moved on
fn with_live_session<T>(
    session: &Arc<Mutex<WorkflowSession>>,
    epoch: u64,
    mutate: impl FnOnce(&mut WorkflowSession) -> T,
) -> Option<T> {
    let mut guard = session.lock().unwrap();
    if guard.epoch != epoch {
        return None;
    }
    Some(mutate(&mut guard))
}

/// Events for every step whose status changed between two snapshots
fn step_events(before: &[AgentStep], after: &[AgentStep]) -> Vec<SessionEvent> {
    before
        .iter()
        .zip(after)
        .filter(|(b, a)| b.status != a.status)
        .map(|(_, a)| SessionEvent::StepUpdated {
            step_id: a.id.clone(),
            status: a.status,
            message: a.message.clone(),
        })
        .collect()
}

fn send_all(events: &broadcast::Sender<SessionEvent>, batch: Vec<SessionEvent>) {
    for event in batch {
        let _ = events.send(event);
    }
}

/// Fixed-period poller for a live backend job
///
/// Transient status errors are absorbed and retried on the next tick, with
/// no cap and no backoff. Terminal statuses end the task; so does an epoch
/// mismatch (the session was reset or resubmitted underneath us).
async fn poll_job_status(
    session: Arc<Mutex<WorkflowSession>>,
    events: broadcast::Sender<SessionEvent>,
    service: Arc<dyn JobService>,
    run_id: String,
    epoch: u64,
    interval: Duration,
    timeline: Timeline,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;

        let report = match service.job_status(&run_id).await {
            Ok(report) => report,
            Err(err) => {
                let _ = events.send(SessionEvent::JobPollError {
                    message: err.to_string(),
                });
                continue;
            }
        };

        match report.status {
            JobStatus::Queued | JobStatus::Running => {
                let batch = with_live_session(&session, epoch, |session| {
                    let before = session.steps.clone();
                    let elapsed = session.elapsed_secs();
                    // The backend reports no per-step granularity: the
                    // timeline drives visualization, the backend drives
                    // completion, so the last step is held active
                    timeline.apply(&mut session.steps, elapsed, true);
                    step_events(&before, &session.steps)
                });
                match batch {
                    Some(batch) => send_all(&events, batch),
                    None => return,
                }
            }
            JobStatus::Completed => {
                let results = service.job_results(&run_id).await;
                let batch = with_live_session(&session, epoch, |session| {
                    let from = session.phase;
                    session.phase = SessionPhase::ResearchCodeReady;
                    match results {
                        Ok(results) => {
                            session.artifact = results.into_artifact();
                            session.complete_all_steps();
                            vec![
                                SessionEvent::ArtifactReady { example_id: None },
                                SessionEvent::PhaseChanged {
                                    from,
                                    to: SessionPhase::ResearchCodeReady,
                                },
                            ]
                        }
                        Err(err) => {
                            // The run finished; losing the completed step
                            // visualization would misreport that
                            let message = format!("Results unavailable: {}", err);
                            session.notice = Some(message.clone());
                            vec![
                                SessionEvent::Notice { message },
                                SessionEvent::PhaseChanged {
                                    from,
                                    to: SessionPhase::ResearchCodeReady,
                                },
                            ]
                        }
                    }
                });
                if let Some(batch) = batch {
                    send_all(&events, batch);
                }
                return;
            }
            JobStatus::Failed => {
                let error = report
                    .error
                    .unwrap_or_else(|| "pipeline failed".to_string());
                let batch = with_live_session(&session, epoch, |session| {
                    session.fail_active_step(&error);
                    let message = format!("Trial pipeline failed: {}", error);
                    session.notice = Some(message.clone());
                    let from = session.phase;
                    session.phase = SessionPhase::ResearchPrompt;
                    vec![
                        SessionEvent::JobFailed {
                            error: error.clone(),
                        },
                        SessionEvent::Notice { message },
                        SessionEvent::PhaseChanged {
                            from,
                            to: SessionPhase::ResearchPrompt,
                        },
                    ]
                });
                if let Some(batch) = batch {
                    send_all(&events, batch);
                }
                return;
            }
        }
    }
}

/// Fixed-period ticker recomputing simulated step statuses from elapsed time
async fn drive_simulation(
    session: Arc<Mutex<WorkflowSession>>,
    events: broadcast::Sender<SessionEvent>,
    epoch: u64,
    interval: Duration,
    timeline: Timeline,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;

        let batch = with_live_session(&session, epoch, |session| {
            let elapsed = session.elapsed_secs();
            let before = session.steps.clone();
            if timeline.is_complete(elapsed) {
                session.complete_all_steps();
                let mut batch = step_events(&before, &session.steps);
                let example_id = session
                    .selected_example
                    .as_ref()
                    .map(|example| example.id.clone());
                let artifact = session.selected_example.as_ref().map(|example| CodeArtifact {
                    code: example.code.clone(),
                    causal_question: None,
                    design_spec: None,
                    omop_mappings: None,
                    validator_feedback: None,
                });
                session.artifact = artifact;
                let from = session.phase;
                session.phase = SessionPhase::ResearchCodeReady;
                batch.push(SessionEvent::ArtifactReady { example_id });
                batch.push(SessionEvent::PhaseChanged {
                    from,
                    to: SessionPhase::ResearchCodeReady,
                });
                (batch, true)
            } else {
                timeline.apply(&mut session.steps, elapsed, false);
                (step_events(&before, &session.steps), false)
            }
        });

        match batch {
            Some((batch, finished)) => {
                send_all(&events, batch);
                if finished {
                    return;
                }
            }
            None => return,
        }
    }
}

/// One-shot delayed transition EhrLoading → EhrDisplay
async fn finish_ehr_load(
    session: Arc<Mutex<WorkflowSession>>,
    events: broadcast::Sender<SessionEvent>,
    epoch: u64,
    delay: Duration,
) {
    tokio::time::sleep(delay).await;
    let event = with_live_session(&session, epoch, |session| {
        if session.phase != SessionPhase::EhrLoading {
            return None;
        }
        session.phase = SessionPhase::EhrDisplay;
        Some(SessionEvent::PhaseChanged {
            from: SessionPhase::EhrLoading,
            to: SessionPhase::EhrDisplay,
        })
    })
    .flatten();
    if let Some(event) = event {
        let _ = events.send(event);
    }
}
