//! Built-in example trials and question matching
//!
//! The catalog serves two roles: fallback data source when the user supplies
//! none, and driver of the progress simulation when no backend is reachable.
//! Entries are compiled in; their analytics payloads come from the
//! deterministic synthesizer so the catalog itself needs no stored data.

use trial_session_sdk::{async_trait, ExampleCatalog, ExampleTrial, SessionResult};

use crate::synth::generate_trial_data;

const VALOR_CODE: &str = r#"# VALOR: iodixanol vs ioversol, contrast-induced AKI after coronary angiography
import pandas as pd
from sklearn.linear_model import LogisticRegression

IODIXANOL_CONCEPT_ID = 19003201
IOVERSOL_CONCEPT_ID = 19069131
OUTCOME_WINDOW_DAYS = 3

df = pd.read_parquet("df_cohort.parquet")
treated = df[df.drug_concept_id == IODIXANOL_CONCEPT_ID]
control = df[df.drug_concept_id == IOVERSOL_CONCEPT_ID]
ps_model = LogisticRegression(max_iter=1000).fit(df[FEATURES], df.treatment)
df["propensity"] = ps_model.predict_proba(df[FEATURES])[:, 1]
report_weighted_outcomes(df, outcome="aki", window_days=OUTCOME_WINDOW_DAYS)
"#;

const NEPHRIC_CODE: &str = r#"# NEPHRIC: renoprotective dosing in advanced CKD, 30-day renal outcomes
import pandas as pd

CKD_CONCEPTS = {46271022, 443597}
DIALYSIS_CONCEPTS = {4032243, 4146536, 4324124}

cohort = build_cohort(condition_concepts=CKD_CONCEPTS, washout_days=365)
cohort = attach_egfr_trajectories(cohort, window_days=30)
estimate_hazard(cohort, outcome_concepts=DIALYSIS_CONCEPTS, strata="egfr_band")
"#;

const PREDICT_CODE: &str = r#"# PREDICT: metformin initiation and incident cardiovascular outcomes in T2DM
import pandas as pd

DIABETES_CONCEPTS = {201826, 201254, 443238}

cohort = build_cohort(condition_concepts=DIABETES_CONCEPTS, washout_days=180)
cohort = new_user_design(cohort, exposure="metformin", comparator="sulfonylurea")
fit_cox_model(cohort, outcome="mace", adjustment="iptw")
"#;

const AKI_CONTRAST_CODE: &str = r#"# Contrast-induced AKI risk across eGFR subgroups after iodinated contrast
import pandas as pd

AKI_CONCEPTS = {761083, 197320, 40481064}
EGFR_BANDS = [(0, 30), (30, 45), (45, 60), (60, 200)]

cohort = build_cohort(procedure="iodinated_contrast", washout_days=90)
for low, high in EGFR_BANDS:
    subgroup = cohort[(cohort.egfr >= low) & (cohort.egfr < high)]
    report_weighted_outcomes(subgroup, outcome="aki", window_days=30)
"#;

/// Compiled-in example trial set
pub struct BuiltinCatalog {
    examples: Vec<ExampleTrial>,
}

impl BuiltinCatalog {
    pub fn new() -> Self {
        Self {
            examples: vec![
                example(
                    "valor-trial",
                    "VALOR: Iodixanol vs Ioversol After Coronary Angiography",
                    &[
                        "heart",
                        "heart failure",
                        "cardiac",
                        "cardiovascular",
                        "coronary",
                        "angiography",
                        "myocardial",
                    ],
                    VALOR_CODE,
                    48000,
                    &["cohort_flow.png", "km_curve.png", "forest_plot.png"],
                ),
                example(
                    "nephric-trial",
                    "NEPHRIC: Renoprotective Dosing in Advanced CKD",
                    &["kidney", "renal", "nephropathy", "egfr", "dialysis"],
                    NEPHRIC_CODE,
                    36000,
                    &["cohort_flow.png", "km_curve.png"],
                ),
                example(
                    "predict-trial",
                    "PREDICT: Metformin and Cardiovascular Outcomes in T2DM",
                    &["diabetes", "diabetic", "metformin", "glucose", "hba1c"],
                    PREDICT_CODE,
                    52000,
                    &["km_curve.png", "forest_plot.png"],
                ),
                example(
                    "aki-contrast-trial",
                    "Contrast-Induced AKI Across eGFR Subgroups",
                    &[
                        "aki",
                        "acute kidney injury",
                        "contrast",
                        "iodinated",
                        "ckd",
                    ],
                    AKI_CONTRAST_CODE,
                    41000,
                    &["forest_plot.png"],
                ),
            ],
        }
    }

    pub fn examples(&self) -> &[ExampleTrial] {
        &self.examples
    }
}

impl Default for BuiltinCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExampleCatalog for BuiltinCatalog {
    async fn list_examples(&self) -> SessionResult<Vec<ExampleTrial>> {
        Ok(self.examples.clone())
    }
}

fn example(
    id: &str,
    name: &str,
    keywords: &[&str],
    code: &str,
    record_count: u64,
    images: &[&str],
) -> ExampleTrial {
    ExampleTrial {
        id: id.to_string(),
        name: name.to_string(),
        keywords: keywords.iter().map(|k| k.to_string()).collect(),
        code: code.to_string(),
        data: generate_trial_data(id, name, record_count),
        images: images.iter().map(|i| i.to_string()).collect(),
    }
}

/// Pick the example best matching a question
///
/// Score is the number of distinct keywords found case-insensitively in the
/// question; ties break by catalog order, and a question matching nothing
/// falls back to the first entry.
pub fn select_example<'a>(question: &str, examples: &'a [ExampleTrial]) -> Option<&'a ExampleTrial> {
    if examples.is_empty() {
        return None;
    }
    let question = question.to_lowercase();
    let mut best = &examples[0];
    let mut best_score = 0;
    for example in examples {
        let score = example
            .keywords
            .iter()
            .filter(|k| question.contains(&k.to_lowercase()))
            .count();
        if score > best_score {
            best = example;
            best_score = score;
        }
    }
    Some(best)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heart_failure_selects_cardiovascular_example() {
        let catalog = BuiltinCatalog::new();
        let selected = select_example(
            "does iso-osmolar contrast reduce AKI risk in heart failure patients",
            catalog.examples(),
        )
        .unwrap();
        assert_eq!(selected.id, "valor-trial");
    }

    #[test]
    fn matching_is_case_insensitive() {
        let catalog = BuiltinCatalog::new();
        let selected = select_example("HEART FAILURE and CORONARY disease", catalog.examples());
        assert_eq!(selected.unwrap().id, "valor-trial");
    }

    #[test]
    fn unmatched_question_falls_back_to_first_entry() {
        let catalog = BuiltinCatalog::new();
        let selected = select_example("completely unrelated question", catalog.examples());
        assert_eq!(selected.unwrap().id, catalog.examples()[0].id);
    }

    #[test]
    fn renal_keywords_select_nephric() {
        let catalog = BuiltinCatalog::new();
        let selected = select_example(
            "impact of dosing on renal decline and dialysis risk",
            catalog.examples(),
        );
        assert_eq!(selected.unwrap().id, "nephric-trial");
    }

    #[test]
    fn example_data_is_reproducible() {
        let a = BuiltinCatalog::new();
        let b = BuiltinCatalog::new();
        for (ea, eb) in a.examples().iter().zip(b.examples()) {
            assert_eq!(ea.data, eb.data);
            assert!(!ea.code.is_empty());
        }
    }
}
