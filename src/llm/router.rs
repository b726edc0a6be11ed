use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep_until, timeout, timeout_at, Instant};
use tracing::{info, warn};

use crate::error::{LlmFailure, LlmFailureKind};
use crate::llm::{GenerateOptions, LlmProvider};
use crate::model::{AttemptOutcome, LlmResponse, ProviderAttempt, SynthesisPrompt};
use crate::ratelimit::RateLimiter;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RouterSettings {
    pub per_attempt_timeout: Duration,
    pub total_chain_deadline: Duration,
    /// Attempts on one provider before falling back to the next
    pub retry: RetryPolicy,
    pub options: GenerateOptions,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            per_attempt_timeout: Duration::from_secs(60),
            total_chain_deadline: Duration::from_secs(180),
            retry: RetryPolicy::single_attempt(),
            options: GenerateOptions::default(),
        }
    }
}

/// A successful route: the winning response and every attempt made,
/// including the successful one as the last entry.
#[derive(Debug, Clone)]
pub struct Routed {
    pub response: LlmResponse,
    pub attempts: Vec<ProviderAttempt>,
}

/// Every provider in the chain failed or the chain deadline ran out.
#[derive(Error, Debug, Clone)]
#[error("all providers exhausted after {} attempt(s)", .attempts.len())]
pub struct RouteFailure {
    pub attempts: Vec<ProviderAttempt>,
    pub deadline_elapsed: bool,
}

/// Walks the fallback chain in order until a provider answers.
pub struct LlmRouter {
    providers: Vec<Arc<dyn LlmProvider>>,
    limiter: Arc<RateLimiter>,
    settings: RouterSettings,
}

impl LlmRouter {
    pub fn new(providers: Vec<Arc<dyn LlmProvider>>, limiter: Arc<RateLimiter>, settings: RouterSettings) -> Self {
        Self {
            providers,
            limiter,
            settings,
        }
    }

    pub fn chain(&self) -> Vec<&str> {
        self.providers.iter().map(|provider| provider.id()).collect()
    }

    pub fn settings(&self) -> &RouterSettings {
        &self.settings
    }

    pub async fn route(&self, prompt: &SynthesisPrompt) -> Result<Routed, RouteFailure> {
        let deadline = Instant::now() + self.settings.total_chain_deadline;
        let retry = self.settings.retry;
        let mut attempts = Vec::new();

        info!("Routing synthesis through chain {:?}", self.chain());

        for (position, provider) in self.providers.iter().enumerate() {
            let id = provider.id();
            let mut attempt = 0u32;

            loop {
                if Instant::now() >= deadline {
                    let next = position + usize::from(attempt > 0);
                    return Err(self.exhausted_by_deadline(attempts, next));
                }

                attempt += 1;
                let started = Instant::now();
                let call = async {
                    self.limiter.acquire(id).await;
                    timeout(
                        self.settings.per_attempt_timeout,
                        provider.generate(prompt, &self.settings.options),
                    )
                    .await
                };

                let failure = match timeout_at(deadline, call).await {
                    Ok(Ok(Ok(response))) => {
                        info!("Provider {} succeeded on attempt {} in {:?}", id, attempt, started.elapsed());
                        attempts.push(ProviderAttempt {
                            provider_id: id.to_string(),
                            attempt,
                            outcome: AttemptOutcome::Succeeded,
                            latency: started.elapsed(),
                            message: None,
                        });
                        return Ok(Routed { response, attempts });
                    }
                    Ok(Ok(Err(failure))) => failure,
                    Ok(Err(_)) => LlmFailure::new(
                        id,
                        LlmFailureKind::Timeout,
                        format!("No response within {:?}", self.settings.per_attempt_timeout),
                    ),
                    Err(_) => {
                        warn!("Chain deadline elapsed while waiting on {}", id);
                        attempts.push(ProviderAttempt {
                            provider_id: id.to_string(),
                            attempt,
                            outcome: AttemptOutcome::Failed(LlmFailureKind::Timeout),
                            latency: started.elapsed(),
                            message: Some("Chain deadline elapsed".to_string()),
                        });
                        return Err(self.exhausted_by_deadline(attempts, position + 1));
                    }
                };

                warn!("Provider {} attempt {} failed: {:?}: {}", id, attempt, failure.kind, failure.message);
                attempts.push(ProviderAttempt {
                    provider_id: id.to_string(),
                    attempt,
                    outcome: AttemptOutcome::Failed(failure.kind),
                    latency: started.elapsed(),
                    message: Some(failure.message),
                });

                if !retry.should_retry(&failure.kind, attempt) {
                    break;
                }
                let delay = retry.delay_for(attempt);
                info!("Retrying {} in {:?}", id, delay);
                sleep_until((Instant::now() + delay).min(deadline)).await;
            }
        }

        warn!("Every provider in the chain failed ({} attempts)", attempts.len());
        Err(RouteFailure {
            attempts,
            deadline_elapsed: false,
        })
    }

    fn exhausted_by_deadline(&self, mut attempts: Vec<ProviderAttempt>, first_unreached: usize) -> RouteFailure {
        for provider in self.providers.iter().skip(first_unreached) {
            attempts.push(ProviderAttempt {
                provider_id: provider.id().to_string(),
                attempt: 0,
                outcome: AttemptOutcome::Skipped,
                latency: Duration::ZERO,
                message: Some("Chain deadline elapsed before this provider was tried".to_string()),
            });
        }
        RouteFailure {
            attempts,
            deadline_elapsed: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::RateLimit;
    use crate::testing::{Reply, ScriptedProvider};
    use tokio_test::{assert_err, assert_ok};

    fn prompt() -> SynthesisPrompt {
        SynthesisPrompt {
            system: "system".to_string(),
            user: "user".to_string(),
            sources: vec![],
        }
    }

    fn settings() -> RouterSettings {
        RouterSettings {
            per_attempt_timeout: Duration::from_secs(10),
            total_chain_deadline: Duration::from_secs(60),
            retry: RetryPolicy::single_attempt(),
            options: GenerateOptions::default(),
        }
    }

    fn router(providers: Vec<Arc<ScriptedProvider>>, settings: RouterSettings) -> LlmRouter {
        let chain = providers
            .into_iter()
            .map(|provider| provider as Arc<dyn LlmProvider>)
            .collect();
        LlmRouter::new(chain, Arc::new(RateLimiter::unlimited()), settings)
    }

    fn outcomes(attempts: &[ProviderAttempt]) -> Vec<(&str, AttemptOutcome)> {
        attempts
            .iter()
            .map(|attempt| (attempt.provider_id.as_str(), attempt.outcome))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_falls_back_until_last_provider_succeeds() {
        let providers = vec![
            Arc::new(ScriptedProvider::failing("p1", LlmFailureKind::RateLimited)),
            Arc::new(ScriptedProvider::failing("p2", LlmFailureKind::ProviderUnavailable)),
            Arc::new(ScriptedProvider::succeeding("p3", "answer")),
        ];
        let routed = router(providers, settings()).route(&prompt()).await.unwrap();

        assert_eq!(routed.response.provider_id, "p3");
        assert_eq!(routed.response.text, "answer");
        assert_eq!(
            outcomes(&routed.attempts),
            vec![
                ("p1", AttemptOutcome::Failed(LlmFailureKind::RateLimited)),
                ("p2", AttemptOutcome::Failed(LlmFailureKind::ProviderUnavailable)),
                ("p3", AttemptOutcome::Succeeded),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_failure_still_falls_back() {
        let p1 = Arc::new(ScriptedProvider::failing("p1", LlmFailureKind::AuthError));
        let p2 = Arc::new(ScriptedProvider::succeeding("p2", "fine"));
        let mut settings = settings();
        settings.retry = RetryPolicy::new(3, Duration::from_millis(100), Duration::from_secs(1));

        let routed = router(vec![p1.clone(), p2.clone()], settings).route(&prompt()).await.unwrap();

        assert_eq!(routed.response.provider_id, "p2");
        assert_eq!(p1.calls(), 1);
        assert_eq!(routed.attempts.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_providers_fail() {
        let providers = vec![
            Arc::new(ScriptedProvider::failing("p1", LlmFailureKind::Timeout)),
            Arc::new(ScriptedProvider::failing("p2", LlmFailureKind::ContentFiltered)),
        ];
        let failure = assert_err!(router(providers, settings()).route(&prompt()).await);

        assert!(!failure.deadline_elapsed);
        assert_eq!(failure.attempts.len(), 2);
        assert!(failure
            .attempts
            .iter()
            .all(|attempt| matches!(attempt.outcome, AttemptOutcome::Failed(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_same_provider_with_backoff() {
        let p1 = Arc::new(ScriptedProvider::new(
            "p1",
            vec![Reply::Fail(LlmFailureKind::RateLimited), Reply::Text("second try".to_string())],
        ));
        let p2 = Arc::new(ScriptedProvider::succeeding("p2", "unused"));
        let mut settings = settings();
        settings.retry = RetryPolicy::new(2, Duration::from_millis(500), Duration::from_secs(5));

        let started = Instant::now();
        let routed = router(vec![p1.clone(), p2.clone()], settings).route(&prompt()).await.unwrap();

        assert!(started.elapsed() >= Duration::from_secs(1));
        assert_eq!(routed.response.text, "second try");
        assert_eq!(routed.attempts.len(), 2);
        assert_eq!(routed.attempts[1].attempt, 2);
        assert_eq!(p2.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_attempt_timeout_moves_on() {
        let providers = vec![
            Arc::new(ScriptedProvider::new("slow", vec![Reply::Hang])),
            Arc::new(ScriptedProvider::succeeding("fast", "done")),
        ];
        let mut settings = settings();
        settings.per_attempt_timeout = Duration::from_secs(2);

        let started = Instant::now();
        let routed = router(providers, settings).route(&prompt()).await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(
            outcomes(&routed.attempts),
            vec![
                ("slow", AttemptOutcome::Failed(LlmFailureKind::Timeout)),
                ("fast", AttemptOutcome::Succeeded),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_answer_is_cut_off_and_latency_recorded() {
        let sluggish = Arc::new(ScriptedProvider::succeeding("sluggish", "too late").with_latency(Duration::from_secs(5)));
        let steady = Arc::new(ScriptedProvider::succeeding("steady", "on time").with_latency(Duration::from_secs(1)));
        let mut settings = settings();
        settings.per_attempt_timeout = Duration::from_secs(2);

        let routed = router(vec![sluggish.clone(), steady], settings).route(&prompt()).await.unwrap();

        assert_eq!(routed.response.text, "on time");
        assert_eq!(sluggish.calls(), 1);
        assert_eq!(
            routed.attempts[0].outcome,
            AttemptOutcome::Failed(LlmFailureKind::Timeout)
        );
        assert!(routed.attempts[0].latency >= Duration::from_secs(2));
        assert!(routed.attempts[0].latency < Duration::from_secs(5));
        assert!(routed.attempts[1].latency >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_chain_deadline_skips_remaining_providers() {
        let providers = vec![
            Arc::new(ScriptedProvider::new("hung", vec![Reply::Hang])),
            Arc::new(ScriptedProvider::succeeding("p2", "late")),
            Arc::new(ScriptedProvider::succeeding("p3", "late")),
        ];
        let mut settings = settings();
        settings.per_attempt_timeout = Duration::from_secs(30);
        settings.total_chain_deadline = Duration::from_secs(5);

        let started = Instant::now();
        let failure = router(providers, settings).route(&prompt()).await.unwrap_err();

        assert!(started.elapsed() <= Duration::from_secs(6));
        assert!(failure.deadline_elapsed);
        assert_eq!(
            outcomes(&failure.attempts),
            vec![
                ("hung", AttemptOutcome::Failed(LlmFailureKind::Timeout)),
                ("p2", AttemptOutcome::Skipped),
                ("p3", AttemptOutcome::Skipped),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquires_rate_limit_per_provider() {
        let limiter = Arc::new(RateLimiter::unlimited().with_limit(
            "p1",
            RateLimit {
                requests: 1,
                window: Duration::from_secs(10),
            },
        ));
        let provider: Arc<dyn LlmProvider> = Arc::new(ScriptedProvider::succeeding("p1", "ok"));
        let router = LlmRouter::new(vec![provider], limiter, settings());

        let started = Instant::now();
        assert_ok!(router.route(&prompt()).await);
        assert_ok!(router.route(&prompt()).await);
        assert!(started.elapsed() >= Duration::from_secs(10));
    }
}
