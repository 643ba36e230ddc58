//! Deterministic trial data synthesis
//!
//! Produces a complete, internally consistent analytics payload for an
//! entity when no live backend is available. Generation is pure given
//! `(entity_id, display_name)` and cached per entity id for the process
//! lifetime.

mod generator;
mod store;

pub use generator::generate_trial_data;
pub use store::TrialDataStore;
