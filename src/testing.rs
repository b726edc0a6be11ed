//! Scripted doubles shared by the unit tests.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use url::Url;

use crate::error::{FetchFailure, LlmFailure, LlmFailureKind};
use crate::llm::{GenerateOptions, LlmProvider};
use crate::model::{LlmResponse, RawPage, SynthesisPrompt, TokenUsage};
use crate::scrape::PageRenderer;

/// A page long enough to pass the extractor's minimum body length.
pub fn article_html(topic: &str) -> String {
    format!(
        "<html><head><title>{topic}</title></head><body><article>\
         <p>This article about {topic} describes the measured effect in detail.</p>\
         <p>A second paragraph about {topic} adds the methodology and caveats.</p>\
         </article></body></html>"
    )
}

#[derive(Debug, Clone)]
pub enum Step {
    Page(String),
    Fail(FetchFailure),
    Delayed(Duration, String),
}

/// Renderer that replays a per-URL script. The last step repeats once the
/// script runs out; unscripted URLs fail with a network error.
pub struct ScriptedRenderer {
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    delay: Duration,
    calls: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedRenderer {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn script(self, url: &str, steps: Vec<Step>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(url.to_string(), steps.into_iter().collect());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn next_step(&self, url: &str) -> Step {
        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(url) {
            Some(steps) if steps.len() > 1 => steps.pop_front().unwrap(),
            Some(steps) => steps.front().cloned().unwrap(),
            None => Step::Fail(FetchFailure::network(format!("no script for {url}"))),
        }
    }
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl PageRenderer for ScriptedRenderer {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn render(&self, url: &Url) -> Result<RawPage, FetchFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now_active, Ordering::SeqCst);
        let _guard = ActiveGuard(&self.active);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match self.next_step(url.as_str()) {
            Step::Page(html) => Ok(RawPage::new(url.as_str(), html)),
            Step::Fail(failure) => Err(failure),
            Step::Delayed(delay, html) => {
                tokio::time::sleep(delay).await;
                Ok(RawPage::new(url.as_str(), html))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub enum Reply {
    Text(String),
    Fail(LlmFailureKind),
    Hang,
}

/// LLM provider that replays scripted replies; the last reply repeats.
pub struct ScriptedProvider {
    id: String,
    replies: Mutex<VecDeque<Reply>>,
    latency: Duration,
    calls: AtomicUsize,
    last_prompt: Mutex<Option<SynthesisPrompt>>,
}

impl ScriptedProvider {
    pub fn new(id: &str, replies: Vec<Reply>) -> Self {
        Self {
            id: id.to_string(),
            replies: Mutex::new(replies.into_iter().collect()),
            latency: Duration::ZERO,
            calls: AtomicUsize::new(0),
            last_prompt: Mutex::new(None),
        }
    }

    pub fn succeeding(id: &str, text: &str) -> Self {
        Self::new(id, vec![Reply::Text(text.to_string())])
    }

    pub fn failing(id: &str, kind: LlmFailureKind) -> Self {
        Self::new(id, vec![Reply::Fail(kind)])
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> Option<SynthesisPrompt> {
        self.last_prompt.lock().unwrap().clone()
    }

    fn next_reply(&self) -> Reply {
        let mut replies = self.replies.lock().unwrap();
        if replies.len() > 1 {
            replies.pop_front().unwrap()
        } else {
            replies.front().cloned().unwrap()
        }
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn generate(&self, prompt: &SynthesisPrompt, _options: &GenerateOptions) -> Result<LlmResponse, LlmFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_prompt.lock().unwrap() = Some(prompt.clone());
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match self.next_reply() {
            Reply::Text(text) => Ok(LlmResponse {
                provider_id: self.id.clone(),
                model: "scripted".to_string(),
                text,
                usage: TokenUsage {
                    prompt_tokens: 100,
                    completion_tokens: 20,
                    total_tokens: 120,
                },
                latency: self.latency,
            }),
            Reply::Fail(kind) => Err(LlmFailure::new(&self.id, kind, "scripted failure")),
            Reply::Hang => std::future::pending().await,
        }
    }
}
