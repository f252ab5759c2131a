//! Admission control: per-identity token buckets.
//!
//! Sits in front of the pipeline (at whatever HTTP/queue surface hosts it)
//! and rejects callers before they consume downstream capacity. One bucket
//! per `(caller, endpoint)` pair; endpoints without a registered policy
//! share the caller's default bucket.
//!
//! Refill is continuous at `capacity / 60` tokens per second, so `capacity`
//! reads as "requests per minute" with bursts up to a full bucket. Each
//! `consume` is a refill-then-check read-modify-write and runs under one
//! mutex over the bucket map — the math is O(1) and the lock is never held
//! across an await, so a single exclusion domain per limiter is enough.
//!
//! Denials come with a retry-after hint: the time until the bucket will
//! have refilled enough for the denied request.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Refill window the capacity is spread over.
const REFILL_WINDOW_SECS: f64 = 60.0;

/// Bucket sizing: `capacity` tokens, refilled over one minute.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketPolicy {
    pub capacity: f64,
}

impl BucketPolicy {
    /// `capacity` requests per minute, bursts up to `capacity` at once.
    pub fn per_minute(capacity: f64) -> Self {
        Self { capacity }
    }

    fn refill_rate(&self) -> f64 {
        self.capacity / REFILL_WINDOW_SECS
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Admission {
    Granted,
    Denied {
        /// How long until the bucket can serve a request of this cost.
        retry_after: Duration,
    },
}

impl Admission {
    pub fn is_granted(&self) -> bool {
        matches!(self, Admission::Granted)
    }
}

struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

type BucketKey = (String, Option<String>);

/// Per-caller (and optionally per-endpoint) token-bucket rate limiter.
pub struct RateLimiter {
    default_policy: BucketPolicy,
    endpoint_policies: HashMap<String, BucketPolicy>,
    buckets: Mutex<HashMap<BucketKey, TokenBucket>>,
}

impl RateLimiter {
    pub fn new(default_policy: BucketPolicy) -> Self {
        Self {
            default_policy,
            endpoint_policies: HashMap::new(),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Give `endpoint` its own bucket sizing, separate from the caller's
    /// default bucket.
    pub fn with_endpoint_policy(mut self, endpoint: impl Into<String>, policy: BucketPolicy) -> Self {
        self.endpoint_policies.insert(endpoint.into(), policy);
        self
    }

    /// Try to admit a request costing `cost` tokens.
    pub fn consume(&self, caller: &str, endpoint: Option<&str>, cost: f64) -> Admission {
        self.consume_at(caller, endpoint, cost, Instant::now())
    }

    /// Time until a request costing `cost` tokens would be admitted.
    /// Zero when it would be admitted right now.
    pub fn wait_time(&self, caller: &str, endpoint: Option<&str>, cost: f64) -> Duration {
        self.wait_time_at(caller, endpoint, cost, Instant::now())
    }

    /// Registered endpoints get their own `(caller, endpoint)` bucket;
    /// everything else shares the caller-only default bucket.
    fn resolve(&self, caller: &str, endpoint: Option<&str>) -> (BucketKey, BucketPolicy) {
        match endpoint.and_then(|e| self.endpoint_policies.get(e).map(|p| (e, *p))) {
            Some((e, policy)) => ((caller.to_string(), Some(e.to_string())), policy),
            None => ((caller.to_string(), None), self.default_policy),
        }
    }

    fn consume_at(&self, caller: &str, endpoint: Option<&str>, cost: f64, now: Instant) -> Admission {
        let (key, policy) = self.resolve(caller, endpoint);
        let mut buckets = self.buckets.lock().expect("limiter mutex poisoned");
        let bucket = buckets.entry(key).or_insert_with(|| TokenBucket {
            tokens: policy.capacity,
            last_update: now,
        });

        refill(bucket, &policy, now);

        if bucket.tokens >= cost {
            bucket.tokens -= cost;
            Admission::Granted
        } else {
            Admission::Denied {
                retry_after: time_until(bucket.tokens, cost, &policy),
            }
        }
    }

    fn wait_time_at(
        &self,
        caller: &str,
        endpoint: Option<&str>,
        cost: f64,
        now: Instant,
    ) -> Duration {
        let (key, policy) = self.resolve(caller, endpoint);
        let mut buckets = self.buckets.lock().expect("limiter mutex poisoned");
        let bucket = buckets.entry(key).or_insert_with(|| TokenBucket {
            tokens: policy.capacity,
            last_update: now,
        });
        refill(bucket, &policy, now);
        time_until(bucket.tokens, cost, &policy)
    }
}

fn refill(bucket: &mut TokenBucket, policy: &BucketPolicy, now: Instant) {
    let elapsed = now.saturating_duration_since(bucket.last_update).as_secs_f64();
    bucket.tokens = (bucket.tokens + elapsed * policy.refill_rate()).min(policy.capacity);
    bucket.last_update = now;
}

/// `max(0, (cost - tokens) / refill_rate)` as a duration.
fn time_until(tokens: f64, cost: f64, policy: &BucketPolicy) -> Duration {
    let deficit = cost - tokens;
    if deficit <= 0.0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(deficit / policy.refill_rate())
}
