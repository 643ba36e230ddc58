// Session state container
pub mod session;

// Workflow orchestration
pub mod orchestrator;

// Elapsed-time progress simulation
pub mod simulation;

// Built-in example trials and question matching
pub mod catalog;

// HTTP client for the trial backend
pub mod client;

// Deterministic trial data synthesis
pub mod synth;
