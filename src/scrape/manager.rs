use futures::stream::FuturesUnordered;
use futures::StreamExt;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::error::ScrapeFailureKind;
use crate::extract::ContentExtractor;
use crate::model::{ExtractedDocument, ScrapeTask, TaskStatus};
use crate::retry::RetryPolicy;
use crate::scrape::ScrapeClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrapeSettings {
    pub max_parallel: usize,
    /// `max_attempts` is the per-URL attempt bound
    pub retry: RetryPolicy,
    pub fetch_timeout: Duration,
    pub overall_deadline: Duration,
}

impl Default for ScrapeSettings {
    fn default() -> Self {
        Self {
            max_parallel: 4,
            retry: RetryPolicy::new(3, Duration::from_millis(500), Duration::from_secs(8)),
            fetch_timeout: Duration::from_secs(20),
            overall_deadline: Duration::from_secs(90),
        }
    }
}

/// Documents from every URL that succeeded, in completion order, plus the
/// final state of every task.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScrapeBatch {
    pub documents: Vec<ExtractedDocument>,
    pub outcomes: Vec<ScrapeTask>,
}

impl ScrapeBatch {
    pub fn succeeded(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|task| task.status == TaskStatus::Succeeded)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|task| matches!(task.status, TaskStatus::Failed(_)))
            .count()
    }
}

type AttemptResult = Result<ExtractedDocument, (ScrapeFailureKind, String)>;

/// Fetches and extracts many URLs at once. At most `max_parallel` attempts
/// are in flight; transient failures are retried with backoff, and nothing
/// is awaited past `overall_deadline`.
pub struct ScrapeManager {
    client: ScrapeClient,
    extractor: Arc<ContentExtractor>,
    settings: ScrapeSettings,
}

impl ScrapeManager {
    pub fn new(client: ScrapeClient, extractor: Arc<ContentExtractor>, settings: ScrapeSettings) -> Self {
        Self {
            client,
            extractor,
            settings,
        }
    }

    pub fn settings(&self) -> &ScrapeSettings {
        &self.settings
    }

    pub async fn scrape(&self, urls: &[String]) -> ScrapeBatch {
        let deadline = Instant::now() + self.settings.overall_deadline;
        let max_parallel = self.settings.max_parallel.max(1);
        let retry = self.settings.retry;

        let mut tasks: Vec<ScrapeTask> = urls.iter().map(ScrapeTask::new).collect();
        let mut queue: VecDeque<usize> = (0..tasks.len()).collect();
        // tasks backing off before a retry; they hold no parallel slot
        let mut waiting: Vec<(Instant, usize)> = Vec::new();
        let mut in_flight = FuturesUnordered::new();
        let mut documents = Vec::new();

        info!(
            "Scraping {} URLs via {} (parallel {}, attempts {}, deadline {:?})",
            urls.len(),
            self.client.renderer_name(),
            max_parallel,
            retry.max_attempts,
            self.settings.overall_deadline
        );

        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }

            waiting.sort_by_key(|(ready_at, _)| *ready_at);
            let ready = waiting.iter().take_while(|(ready_at, _)| *ready_at <= now).count();
            queue.extend(waiting.drain(..ready).map(|(_, index)| index));

            while in_flight.len() < max_parallel {
                let Some(index) = queue.pop_front() else {
                    break;
                };
                if tasks[index].begin_attempt() {
                    debug!("Attempt {} for {}", tasks[index].attempts, tasks[index].url);
                    in_flight.push(self.attempt(index, tasks[index].url.clone()));
                }
            }

            if in_flight.is_empty() && waiting.is_empty() {
                break;
            }

            let wake = waiting.first().map_or(deadline, |(ready_at, _)| (*ready_at).min(deadline));

            tokio::select! {
                biased;
                Some((index, result)) = in_flight.next(), if !in_flight.is_empty() => {
                    let task = &mut tasks[index];
                    match result {
                        Ok(document) => {
                            debug!("Scraped {} after {} attempt(s)", task.url, task.attempts);
                            task.succeed();
                            documents.push(document);
                        }
                        Err((kind, message)) if retry.should_retry(&kind, task.attempts) => {
                            let delay = retry.delay_for(task.attempts);
                            warn!(
                                "Attempt {} for {} failed ({:?}: {}), retrying in {:?}",
                                task.attempts, task.url, kind, message, delay
                            );
                            task.record_error(message);
                            waiting.push((Instant::now() + delay, index));
                        }
                        Err((kind, message)) => {
                            warn!(
                                "Giving up on {} after {} attempt(s): {:?}: {}",
                                task.url, task.attempts, kind, message
                            );
                            task.fail(kind, message);
                        }
                    }
                }
                _ = sleep_until(wake) => {}
            }
        }

        // anything still running is abandoned, not awaited
        drop(in_flight);

        for task in tasks.iter_mut().filter(|task| !task.status.is_terminal()) {
            warn!("Deadline exceeded for {} after {} attempt(s)", task.url, task.attempts);
            task.fail(ScrapeFailureKind::DeadlineExceeded, "Overall scrape deadline exceeded");
        }

        let batch = ScrapeBatch {
            documents,
            outcomes: tasks,
        };
        info!(
            "Scrape batch finished: {} succeeded, {} failed",
            batch.succeeded(),
            batch.failed()
        );
        batch
    }

    async fn attempt(&self, index: usize, url: String) -> (usize, AttemptResult) {
        let result = match self.client.fetch(&url, self.settings.fetch_timeout).await {
            Ok(page) => self
                .extractor
                .extract(&page)
                .map_err(|failure| (ScrapeFailureKind::from(&failure), failure.to_string())),
            Err(failure) => Err((ScrapeFailureKind::from(failure.kind), failure.message)),
        };

        (index, result)
    }
}
