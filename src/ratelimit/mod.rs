use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

/// `requests` permits per sliding `window`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    pub requests: u32,
    #[serde(with = "humantime_serde")]
    pub window: Duration,
}

impl RateLimit {
    pub fn new(requests: u32, window: Duration) -> Self {
        Self { requests, window }
    }
}

/// Granted permit. Dropping it does not give the slot back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permit {
    pub key: String,
    pub waited: Duration,
}

/// Bucket of `requests` tokens; a spent token comes back exactly one window
/// after it was spent, so no window ever sees more than `requests` grants.
#[derive(Debug)]
struct Bucket {
    limit: RateLimit,
    spent: VecDeque<Instant>,
}

impl Bucket {
    fn new(limit: RateLimit) -> Self {
        Self {
            limit,
            spent: VecDeque::with_capacity(limit.requests as usize),
        }
    }

    /// Reserve the earliest slot at or after `now` and return it.
    fn reserve(&mut self, now: Instant) -> Instant {
        let capacity = self.limit.requests.max(1) as usize;

        while self.spent.len() > capacity {
            self.spent.pop_front();
        }
        while let Some(oldest) = self.spent.front() {
            if *oldest + self.limit.window <= now && self.spent.len() >= capacity {
                self.spent.pop_front();
            } else {
                break;
            }
        }

        let slot = if self.spent.len() < capacity {
            // tokens left, but never grant earlier than an already reserved slot
            self.spent.back().map_or(now, |last| (*last).max(now))
        } else {
            let returning = self.spent[self.spent.len() - capacity];
            (returning + self.limit.window).max(now)
        };

        self.spent.push_back(slot);
        slot
    }
}

/// Per-key throttle shared by every in-flight operation. Keys are domains for
/// scraping and service ids (search engine, LLM providers) otherwise.
#[derive(Debug)]
pub struct RateLimiter {
    default_limit: Option<RateLimit>,
    limits: HashMap<String, RateLimit>,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::unlimited()
    }
}

impl RateLimiter {
    pub fn new(default_limit: Option<RateLimit>) -> Self {
        Self {
            default_limit,
            limits: HashMap::new(),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(None)
    }

    pub fn with_limit(mut self, key: impl Into<String>, limit: RateLimit) -> Self {
        self.limits.insert(key.into().to_lowercase(), limit);
        self
    }

    pub fn with_limits(mut self, limits: &HashMap<String, RateLimit>) -> Self {
        for (key, limit) in limits {
            self.limits.insert(key.to_lowercase(), *limit);
        }
        self
    }

    /// Limit for a key. Hosts fall back to their parent domains, so a limit
    /// on `example.com` also covers `docs.example.com`.
    pub fn limit_for(&self, key: &str) -> Option<RateLimit> {
        self.resolve(key).map(|(_, limit)| limit)
    }

    /// Bucket key and limit for `key`. Hosts under a configured domain share
    /// that domain's bucket; keys only covered by the default get their own.
    fn resolve(&self, key: &str) -> Option<(String, RateLimit)> {
        let key = key.to_lowercase();
        let mut candidate = key.as_str();
        loop {
            if let Some(limit) = self.limits.get(candidate) {
                return Some((candidate.to_string(), *limit));
            }
            match candidate.split_once('.') {
                Some((_, parent)) if parent.contains('.') => candidate = parent,
                _ => break,
            }
        }
        self.default_limit.map(|limit| (key, limit))
    }

    /// Wait until a permit for `key` is available. Never fails.
    pub async fn acquire(&self, key: &str) -> Permit {
        let requested_at = Instant::now();
        let Some((bucket_key, limit)) = self.resolve(key) else {
            return Permit {
                key: key.to_string(),
                waited: Duration::ZERO,
            };
        };

        let slot = {
            let mut buckets = self.buckets.lock().await;
            let bucket = buckets.entry(bucket_key).or_insert_with(|| Bucket::new(limit));
            bucket.reserve(Instant::now())
        };

        if slot > requested_at {
            debug!(
                "Rate limit for {} reached, waiting {:?}",
                key,
                slot - requested_at
            );
            sleep_until(slot).await;
        }

        Permit {
            key: key.to_string(),
            waited: requested_at.elapsed(),
        }
    }
}
