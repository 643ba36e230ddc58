//! Process-lifetime cache of generated trial data
//!
//! Owned, injectable store rather than module-global state so tests and
//! embedders control its lifecycle. Entries are immutable once written;
//! invalidation is the bulk `clear` only.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use trial_session_sdk::TrialData;

use super::generator::generate_trial_data;

/// Cache keyed by entity id
///
/// The first request for an id computes and stores the record; every later
/// request for that id returns the stored value untouched, so repeated reads
/// are byte-for-byte identical.
pub struct TrialDataStore {
    records: Mutex<HashMap<String, Arc<TrialData>>>,
}

impl TrialDataStore {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch the record for `entity_id`, generating it on first request
    pub fn get_or_generate(
        &self,
        entity_id: &str,
        display_name: &str,
        record_count: u64,
    ) -> Arc<TrialData> {
        let mut records = self.records.lock().unwrap();
        if let Some(existing) = records.get(entity_id) {
            return Arc::clone(existing);
        }
        let record = Arc::new(generate_trial_data(entity_id, display_name, record_count));
        records.insert(entity_id.to_string(), Arc::clone(&record));
        record
    }

    /// Administrative bulk clear; no partial invalidation
    pub fn clear(&self) {
        self.records.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TrialDataStore {
    fn default() -> Self {
        Self::new()
    }
}
