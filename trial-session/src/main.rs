//! CLI demo driver for a trial session
//!
//! Thin caller over the orchestrator: drives one research or patient flow
//! end to end, printing progress from the broadcast event stream. With
//! `TRIAL_API_URL` (or `--api-url`) set it talks to the live backend;
//! otherwise the progress simulation runs against the built-in catalog.

use anyhow::Result;
use clap::{Parser, ValueEnum};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use trial_session::catalog::BuiltinCatalog;
use trial_session::client::{HttpJobService, API_URL_ENV};
use trial_session::orchestrator::{OrchestratorConfig, TrialOrchestrator};
use trial_session::synth::TrialDataStore;
use trial_session_sdk::{
    log_info, log_phase, log_step_active, log_step_complete, log_step_failed, log_warning,
    ExampleCatalog, JobService, PatientSummary, SessionEvent, SessionPhase, StepStatus, TrialData,
};

#[derive(Parser, Debug)]
#[command(
    name = "trial-session",
    about = "Drive a virtual clinical trial session from the terminal"
)]
struct Args {
    /// Research question to submit
    #[arg(
        short,
        long,
        default_value = "how are clinically relevant eGFR subgroups affected differently by iodinated contrast agents & risk of AKI in the next 30 days"
    )]
    question: String,

    /// Which flow to drive
    #[arg(long, value_enum, default_value_t = Flow::Research)]
    flow: Flow,

    /// Backend base URL; falls back to TRIAL_API_URL, absent means simulation
    #[arg(long)]
    api_url: Option<String>,

    /// Polling period in milliseconds
    #[arg(long, default_value = "1000")]
    poll_ms: u64,

    /// Emit structured __SESSION_EVENT__ lines instead of console logs
    #[arg(long, action = clap::ArgAction::SetTrue)]
    json_logs: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Flow {
    Research,
    Patient,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    let api_url = args
        .api_url
        .clone()
        .or_else(|| std::env::var(API_URL_ENV).ok())
        .filter(|url| !url.is_empty());

    let (service, catalog): (Option<Arc<dyn JobService>>, Arc<dyn ExampleCatalog>) = match &api_url
    {
        Some(url) => {
            log_info!("Using trial backend at {}", url);
            let http = Arc::new(HttpJobService::new(url.clone()));
            (
                Some(Arc::clone(&http) as Arc<dyn JobService>),
                http as Arc<dyn ExampleCatalog>,
            )
        }
        None => {
            log_info!("No backend configured; running the progress simulation");
            (None, Arc::new(BuiltinCatalog::new()) as Arc<dyn ExampleCatalog>)
        }
    };

    let config = OrchestratorConfig {
        poll_interval: Duration::from_millis(args.poll_ms),
        ..Default::default()
    };
    let orchestrator =
        TrialOrchestrator::new(catalog, service, Arc::new(TrialDataStore::new()), config);

    let mut events = orchestrator.subscribe();
    let json_logs = args.json_logs;
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if json_logs {
                event.emit();
                continue;
            }
            match event {
                SessionEvent::PhaseChanged { to, .. } => log_phase!(to),
                SessionEvent::StepUpdated {
                    step_id,
                    status,
                    message,
                } => match status {
                    StepStatus::Active => log_step_active!(step_id, message),
                    StepStatus::Complete => log_step_complete!(step_id),
                    StepStatus::Failed => log_step_failed!(step_id, message),
                    StepStatus::Pending => {}
                },
                SessionEvent::JobSubmitted { run_id } => log_info!("Job accepted: {}", run_id),
                SessionEvent::JobPollError { message } => {
                    log_warning!("Transient poll error: {}", message)
                }
                SessionEvent::JobFailed { error } => log_warning!("Pipeline failed: {}", error),
                SessionEvent::Notice { message } => log_warning!(message),
                SessionEvent::ArtifactReady { example_id } => match example_id {
                    Some(id) => log_info!("Artifact ready (example: {})", id),
                    None => log_info!("Artifact ready"),
                },
                SessionEvent::ResultsReady => log_info!("Results payload stored"),
                SessionEvent::SessionReset => log_info!("Session reset"),
            }
        }
    });

    let outcome = match args.flow {
        Flow::Research => run_research(&orchestrator, &args.question).await,
        Flow::Patient => run_patient(&orchestrator).await,
    };

    // Give the printer a beat to drain, then stop it
    sleep(Duration::from_millis(50)).await;
    printer.abort();
    outcome
}

async fn run_research(orchestrator: &TrialOrchestrator, question: &str) -> Result<()> {
    orchestrator.start_research()?;
    orchestrator.submit_question(question).await?;

    loop {
        sleep(Duration::from_millis(200)).await;
        match orchestrator.phase() {
            SessionPhase::ResearchCodeReady => break,
            SessionPhase::ResearchPrompt => {
                log_warning!("Pipeline did not complete; restart from the prompt");
                return Ok(());
            }
            _ => {}
        }
    }

    orchestrator.acknowledge_artifact()?;
    orchestrator.supply_data(None)?;

    let snapshot = orchestrator.snapshot();
    if let Some(artifact) = &snapshot.artifact {
        println!("\nGenerated analysis code:\n{}", artifact.code);
    }
    if let Some(results) = &snapshot.results {
        print_results(results);
    }
    Ok(())
}

async fn run_patient(orchestrator: &TrialOrchestrator) -> Result<()> {
    orchestrator.start_patient_flow()?;
    orchestrator.select_patient(PatientSummary {
        id: "patient-1001".to_string(),
        name: "Demo Patient".to_string(),
        record_count: 48000,
    })?;

    while orchestrator.phase() != SessionPhase::EhrDisplay {
        sleep(Duration::from_millis(100)).await;
    }

    orchestrator.proceed_to_drug_selection()?;
    orchestrator.select_drug("drug-42", "Atorvastatin")?;

    if let Some(results) = &orchestrator.snapshot().results {
        print_results(results);
    }
    Ok(())
}

fn print_results(data: &TrialData) {
    println!("\n{}", "=".repeat(72));
    println!("{}", data.trial_name);
    println!("{}", "=".repeat(72));
    println!(
        "Cohort: {} screened, {} eligible, {} treatment / {} control",
        data.cohort.initial_population,
        data.cohort.eligible,
        data.cohort.treatment_arm,
        data.cohort.control_arm
    );
    println!(
        "Propensity overlap {:.3}, effective sample ratio {:.3}",
        data.propensity.overlap_coefficient, data.propensity.effective_sample_ratio
    );
    println!("\nSubgroup hazard ratios:");
    for row in &data.hazard_ratios {
        println!(
            "  {:<14} HR {:.2} (95% CI {:.2}-{:.2}), p = {:.3}",
            row.subgroup, row.hazard_ratio, row.ci_lower, row.ci_upper, row.p_value
        );
    }
    println!("\n{}", data.validation.conclusion);
}
