// Multi-list job: harvest several lists one after another over a single
// browser session. A list that fails is retried from scratch; a list that
// still fails is recorded and the job moves on.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::HarvestConfig;
use crate::harvester::{HarvestReport, Harvester};
use crate::profile::PageProfile;
use crate::session::BrowserSession;
use crate::types::HarvestOutcome;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListRequest {
    /// Bare list id or full URL.
    pub reference: String,
    pub target_count: Option<u32>,
}

impl ListRequest {
    pub fn new(reference: impl Into<String>, target_count: Option<u32>) -> Self {
        Self {
            reference: reference.into(),
            target_count,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ListReport {
    pub reference: String,
    pub attempts: u32,
    #[serde(flatten)]
    pub report: HarvestReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub lists: Vec<ListReport>,
}

impl JobReport {
    pub fn complete_count(&self) -> usize {
        self.lists
            .iter()
            .filter(|l| l.report.outcome.is_complete())
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.lists
            .iter()
            .filter(|l| l.report.outcome.is_failed())
            .count()
    }
}

pub struct HarvestJob {
    profile: PageProfile,
    config: HarvestConfig,
}

impl HarvestJob {
    pub fn new(profile: PageProfile, config: HarvestConfig) -> Self {
        Self { profile, config }
    }

    pub async fn run(&self, session: &dyn BrowserSession, requests: &[ListRequest]) -> JobReport {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(%run_id, lists = requests.len(), "Job starting");
        let mut lists = Vec::with_capacity(requests.len());

        for (index, request) in requests.iter().enumerate() {
            info!(
                list = index + 1,
                of = requests.len(),
                reference = request.reference.as_str(),
                "Harvesting list"
            );
            lists.push(self.run_list(session, request).await);
        }

        let report = JobReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            lists,
        };
        info!(
            run_id = %report.run_id,
            lists = report.lists.len(),
            complete = report.complete_count(),
            failed = report.failed_count(),
            elapsed_ms = (report.finished_at - report.started_at).num_milliseconds(),
            "Job finished"
        );
        report
    }

    /// Run the job, then release the session whatever the outcome.
    pub async fn run_and_close(
        &self,
        session: &dyn BrowserSession,
        requests: &[ListRequest],
    ) -> JobReport {
        let report = self.run(session, requests).await;
        if let Err(e) = session.close().await {
            warn!(error = %e, "Failed to close browser session");
        }
        report
    }

    async fn run_list(&self, session: &dyn BrowserSession, request: &ListRequest) -> ListReport {
        let url = self.profile.list_url(&request.reference);
        let harvester = Harvester::new(session, &self.profile, &self.config);
        let max_attempts = self.config.list_retries + 1;

        let mut attempts = 0;
        loop {
            attempts += 1;
            let report = harvester.harvest(&url, request.target_count).await;

            match &report.outcome {
                HarvestOutcome::Failed(error) if attempts < max_attempts => {
                    warn!(
                        url = url.as_str(),
                        attempt = attempts,
                        error = %error,
                        "List failed, retrying"
                    );
                    tokio::time::sleep(self.config.settle).await;
                }
                outcome => {
                    info!(
                        url = url.as_str(),
                        attempts,
                        entries = report.entries.len(),
                        outcome = ?outcome,
                        "List done"
                    );
                    return ListReport {
                        reference: request.reference.clone(),
                        attempts,
                        report,
                    };
                }
            }
        }
    }
}
