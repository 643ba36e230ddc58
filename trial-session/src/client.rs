//! HTTP client for the trial backend
//!
//! Thin reqwest wrapper over the backend's REST surface. The orchestrator
//! only sees the [`JobService`] and [`ExampleCatalog`] traits; everything
//! HTTP-specific stays here.

use trial_session_sdk::{
    async_trait, ExampleCatalog, ExampleTrial, JobResults, JobService, JobStatusReport,
    JobSubmission, SessionResult,
};

/// Environment variable naming the backend base URL
pub const API_URL_ENV: &str = "TRIAL_API_URL";

/// Job service backed by the trial REST API
pub struct HttpJobService {
    client: reqwest::Client,
    base_url: String,
}

impl HttpJobService {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }

    /// Build from `TRIAL_API_URL` if set; `None` selects simulation mode
    pub fn from_env() -> Option<Self> {
        std::env::var(API_URL_ENV)
            .ok()
            .filter(|url| !url.is_empty())
            .map(Self::new)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

#[async_trait]
impl JobService for HttpJobService {
    async fn submit_job(&self, question: &str) -> SessionResult<JobSubmission> {
        let submission = self
            .client
            .post(self.endpoint("api/trials"))
            .json(&serde_json::json!({ "question": question }))
            .send()
            .await?
            .error_for_status()?
            .json::<JobSubmission>()
            .await?;
        Ok(submission)
    }

    async fn job_status(&self, run_id: &str) -> SessionResult<JobStatusReport> {
        let report = self
            .client
            .get(self.endpoint(&format!("api/trials/{}/status", run_id)))
            .send()
            .await?
            .error_for_status()?
            .json::<JobStatusReport>()
            .await?;
        Ok(report)
    }

    async fn job_results(&self, run_id: &str) -> SessionResult<JobResults> {
        let results = self
            .client
            .get(self.endpoint(&format!("api/trials/{}/results", run_id)))
            .send()
            .await?
            .error_for_status()?
            .json::<JobResults>()
            .await?;
        Ok(results)
    }
}

#[async_trait]
impl ExampleCatalog for HttpJobService {
    async fn list_examples(&self) -> SessionResult<Vec<ExampleTrial>> {
        let examples = self
            .client
            .get(self.endpoint("api/examples"))
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<ExampleTrial>>()
            .await?;
        Ok(examples)
    }
}
