//! Token-bucket rate limiting per member and action.

use crate::error::AppError;
use dashmap::DashMap;
use std::time::Instant;
use types::ids::MemberId;

/// One action's bucket parameters.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitRule {
    pub capacity: u32,
    /// Tokens restored per second.
    pub refill_rate: f64,
}

/// Limits per rate-limited gateway action.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// WebSocket connection establishment.
    pub ws_connections: RateLimitRule,
    /// Score delta submissions.
    pub score_submissions: RateLimitRule,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            ws_connections: RateLimitRule {
                capacity: 10,
                refill_rate: 10.0,
            },
            score_submissions: RateLimitRule {
                capacity: 30,
                refill_rate: 10.0,
            },
        }
    }
}

#[derive(Clone)]
struct Bucket {
    capacity: u32,
    tokens: f64,
    refill_rate: f64,
    last_update: Instant,
}

impl Bucket {
    fn new(rule: RateLimitRule) -> Self {
        Self {
            capacity: rule.capacity,
            tokens: rule.capacity as f64,
            refill_rate: rule.refill_rate,
            last_update: Instant::now(),
        }
    }

    fn allow_request(&mut self, tokens: u32) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();

        // Refill tokens
        self.tokens = f64::min(
            self.capacity as f64,
            self.tokens + elapsed * self.refill_rate,
        );
        self.last_update = now;

        // Consume token
        if self.tokens >= tokens as f64 {
            self.tokens -= tokens as f64;
            true
        } else {
            false // Rate limited
        }
    }
}

pub struct RateLimiter {
    // Maps "member_id:action" to its bucket
    buckets: DashMap<String, Bucket>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            buckets: DashMap::new(),
            config,
        }
    }

    pub fn check_ws_connection(&self, member: MemberId) -> Result<(), AppError> {
        self.check(
            format!("{}:ws_connections", member),
            self.config.ws_connections,
        )
    }

    pub fn check_score_submission(&self, member: MemberId) -> Result<(), AppError> {
        self.check(
            format!("{}:score_submissions", member),
            self.config.score_submissions,
        )
    }

    fn check(&self, key: String, rule: RateLimitRule) -> Result<(), AppError> {
        let mut bucket = self
            .buckets
            .entry(key.clone())
            .or_insert_with(|| Bucket::new(rule));

        if bucket.allow_request(1) {
            Ok(())
        } else {
            Err(AppError::RateLimitExceeded(format!("Rate limit for {}", key)))
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}
