//! Elapsed-time progress simulation
//!
//! When no backend is reachable (and for step visualization during live
//! jobs, which report no per-step granularity) the pipeline steps are driven
//! by a fixed table of elapsed-time windows. Status is recomputed fresh on
//! every tick as a pure, monotone function of elapsed seconds, so a step can
//! never regress from complete back to active or pending.

use trial_session_sdk::{AgentStep, StepStatus};

/// Elapsed-seconds window during which a step is active
#[derive(Debug, Clone, Copy)]
pub struct StepWindow {
    pub start: f64,
    pub end: f64,
}

/// Per-step activity messages, aligned with the agent roster
const ACTIVE_MESSAGES: [&str; 5] = [
    "Framing the causal question",
    "Drafting the target trial protocol",
    "Validating the protocol design",
    "Resolving medical terms to OMOP concepts",
    "Generating the analysis implementation",
];

/// Fixed per-step schedule for the progress simulation
#[derive(Debug, Clone)]
pub struct Timeline {
    windows: Vec<StepWindow>,
}

impl Timeline {
    /// Production schedule: five consecutive windows, ~26s total
    pub fn standard() -> Self {
        Self {
            windows: vec![
                StepWindow { start: 0.0, end: 4.0 },
                StepWindow { start: 4.0, end: 9.0 },
                StepWindow { start: 9.0, end: 15.0 },
                StepWindow { start: 15.0, end: 20.0 },
                StepWindow { start: 20.0, end: 26.0 },
            ],
        }
    }

    /// Same proportions squeezed into `total` seconds (used by tests)
    pub fn compressed(total: f64) -> Self {
        let standard = Self::standard();
        let scale = total / standard.total_secs();
        Self {
            windows: standard
                .windows
                .iter()
                .map(|w| StepWindow {
                    start: w.start * scale,
                    end: w.end * scale,
                })
                .collect(),
        }
    }

    pub fn total_secs(&self) -> f64 {
        self.windows.last().map(|w| w.end).unwrap_or(0.0)
    }

    /// True once the final window's upper bound has elapsed
    pub fn is_complete(&self, elapsed: f64) -> bool {
        elapsed >= self.total_secs()
    }

    /// Status of step `index` at `elapsed` seconds
    pub fn status_at(&self, index: usize, elapsed: f64) -> StepStatus {
        match self.windows.get(index) {
            Some(w) if elapsed >= w.end => StepStatus::Complete,
            Some(w) if elapsed >= w.start => StepStatus::Active,
            _ => StepStatus::Pending,
        }
    }

    /// Recompute every step's status from elapsed time
    ///
    /// With `hold_last_active` the final step is pinned to active past its
    /// window; used while a live job is still running, where completion is
    /// the backend's call rather than the clock's.
    pub fn apply(&self, steps: &mut [AgentStep], elapsed: f64, hold_last_active: bool) {
        let last = steps.len().saturating_sub(1);
        for (i, step) in steps.iter_mut().enumerate() {
            let mut status = self.status_at(i, elapsed);
            if hold_last_active && i == last && status == StepStatus::Complete {
                status = StepStatus::Active;
            }
            step.status = status;
            step.message = match status {
                StepStatus::Pending => String::new(),
                StepStatus::Active => ACTIVE_MESSAGES
                    .get(i)
                    .copied()
                    .unwrap_or("Working")
                    .to_string(),
                StepStatus::Complete => "Done".to_string(),
                StepStatus::Failed => step.message.clone(),
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::AGENT_ROSTER;
    use trial_session_sdk::AgentStep;

    fn roster_steps() -> Vec<AgentStep> {
        AGENT_ROSTER
            .iter()
            .map(|(id, label)| AgentStep::new(*id, *label))
            .collect()
    }

    #[test]
    fn statuses_form_prefix_active_suffix() {
        let timeline = Timeline::standard();
        let mut steps = roster_steps();
        timeline.apply(&mut steps, 10.0, false);

        assert_eq!(steps[0].status, StepStatus::Complete);
        assert_eq!(steps[1].status, StepStatus::Complete);
        assert_eq!(steps[2].status, StepStatus::Active);
        assert_eq!(steps[3].status, StepStatus::Pending);
        assert_eq!(steps[4].status, StepStatus::Pending);
    }

    #[test]
    fn steps_never_regress_as_time_advances() {
        let timeline = Timeline::standard();
        let rank = |s: StepStatus| match s {
            StepStatus::Pending => 0,
            StepStatus::Active => 1,
            StepStatus::Complete => 2,
            StepStatus::Failed => 3,
        };

        let mut previous: Option<Vec<StepStatus>> = None;
        let mut elapsed = 0.0;
        while elapsed < 30.0 {
            let mut steps = roster_steps();
            timeline.apply(&mut steps, elapsed, false);
            let current: Vec<StepStatus> = steps.iter().map(|s| s.status).collect();
            if let Some(prev) = &previous {
                for (p, c) in prev.iter().zip(&current) {
                    assert!(rank(*c) >= rank(*p), "step regressed at t={}", elapsed);
                }
            }
            previous = Some(current);
            elapsed += 0.25;
        }
    }

    #[test]
    fn completes_exactly_at_final_threshold() {
        let timeline = Timeline::standard();
        assert!(!timeline.is_complete(timeline.total_secs() - 0.01));
        assert!(timeline.is_complete(timeline.total_secs()));
    }

    #[test]
    fn hold_last_active_pins_final_step() {
        let timeline = Timeline::standard();
        let mut steps = roster_steps();
        timeline.apply(&mut steps, 100.0, true);

        assert!(steps[..4]
            .iter()
            .all(|s| s.status == StepStatus::Complete));
        assert_eq!(steps[4].status, StepStatus::Active);
    }

    #[test]
    fn compressed_preserves_window_count_and_total() {
        let timeline = Timeline::compressed(1.0);
        assert!((timeline.total_secs() - 1.0).abs() < 1e-9);
        assert_eq!(timeline.status_at(0, 0.0), StepStatus::Active);
        assert_eq!(timeline.status_at(4, 1.0), StepStatus::Complete);
    }
}
