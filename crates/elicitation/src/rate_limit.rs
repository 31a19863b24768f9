//! # Rate Limiting and DoS Protection
//!
//! Two token buckets per agent (requests and responses) plus a global DoS
//! monitor. Under overload the active limits are quartered for everyone;
//! agents with a high suspicious score are temporarily blocked.

use dashmap::DashMap;
use std::collections::VecDeque;
use std::env;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Environment variable selecting the protection level.
pub const ENV_DOS_PROTECTION: &str = "LIGHTHOUSE_DOS_PROTECTION";

/// DoS protection levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtectionLevel {
    /// Buckets only; no global monitor, no blocking.
    None,
    /// Buckets and violation counters.
    Basic,
    /// Adds the global overload monitor with limit quartering.
    #[default]
    Enhanced,
    /// Adds suspicious-score blocking.
    Maximum,
}

impl FromStr for ProtectionLevel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "basic" => Ok(Self::Basic),
            "enhanced" => Ok(Self::Enhanced),
            "maximum" => Ok(Self::Maximum),
            _ => Err(()),
        }
    }
}

impl ProtectionLevel {
    /// Level from `LIGHTHOUSE_DOS_PROTECTION`, defaulting to `Enhanced`.
    #[must_use]
    pub fn from_env() -> Self {
        env::var(ENV_DOS_PROTECTION)
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or_default()
    }
}

/// Token bucket with fractional refill.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_rate_per_second: f64,
    last_update: Instant,
}

impl TokenBucket {
    /// Full bucket with the given capacity and refill rate.
    #[must_use]
    pub fn new(capacity: f64, refill_rate_per_second: f64) -> Self {
        Self {
            capacity,
            tokens: capacity,
            refill_rate_per_second,
            last_update: Instant::now(),
        }
    }

    /// Refill by elapsed time, then consume `tokens` if available.
    pub fn consume(&mut self, tokens: f64) -> bool {
        self.refill();
        if self.tokens >= tokens {
            self.tokens -= tokens;
            true
        } else {
            false
        }
    }

    /// Tokens currently available.
    #[must_use]
    pub fn available(&mut self) -> f64 {
        self.refill();
        self.tokens
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate_per_second).min(self.capacity);
        self.last_update = now;
    }
}

/// Kind of operation being limited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitKind {
    Request,
    Response,
}

impl LimitKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Response => "response",
        }
    }
}

/// Rate limiter configuration.
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    pub max_requests_per_minute: u32,
    pub max_responses_per_minute: u32,
    pub burst_allowance: u32,
    pub protection_level: ProtectionLevel,
    /// Global requests per rolling minute that flag overload.
    pub overload_threshold: usize,
    /// Suspicious score past which an agent is blocked (maximum level).
    pub suspicious_threshold: f64,
    /// Temporary block duration.
    pub block_duration: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_requests_per_minute: 10,
            max_responses_per_minute: 20,
            burst_allowance: 3,
            protection_level: ProtectionLevel::from_env(),
            overload_threshold: 1000,
            suspicious_threshold: 50.0,
            block_duration: Duration::from_secs(300),
        }
    }
}

#[derive(Debug)]
struct Suspicion {
    score: f64,
    last_seen: Instant,
    blocked_until: Option<Instant>,
}

/// Size bound for the global request ring buffer.
const GLOBAL_WINDOW_CAPACITY: usize = 10_000;

/// Per-agent rate limiter for elicitation requests and responses.
pub struct ElicitationRateLimiter {
    config: RateLimiterConfig,
    request_buckets: DashMap<String, TokenBucket>,
    response_buckets: DashMap<String, TokenBucket>,
    /// Violations per `{agent}:{kind}`.
    violations: DashMap<String, u64>,
    suspicion: DashMap<String, Suspicion>,
    global_window: Mutex<VecDeque<Instant>>,
    under_attack: AtomicBool,
}

impl ElicitationRateLimiter {
    /// Create a limiter with the given configuration.
    #[must_use]
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            request_buckets: DashMap::new(),
            response_buckets: DashMap::new(),
            violations: DashMap::new(),
            suspicion: DashMap::new(),
            global_window: Mutex::new(VecDeque::with_capacity(GLOBAL_WINDOW_CAPACITY)),
            under_attack: AtomicBool::new(false),
        }
    }

    /// Whether `agent_id` may create a new elicitation.
    pub fn allow_request(&self, agent_id: &str) -> bool {
        self.allow(agent_id, LimitKind::Request)
    }

    /// Whether `agent_id` may respond to an elicitation.
    pub fn allow_response(&self, agent_id: &str) -> bool {
        self.allow(agent_id, LimitKind::Response)
    }

    fn allow(&self, agent_id: &str, kind: LimitKind) -> bool {
        if self.config.protection_level != ProtectionLevel::None {
            if self.is_blocked(agent_id) {
                self.record_violation(agent_id, kind);
                return false;
            }
            self.observe_global();
            if self.config.protection_level == ProtectionLevel::Maximum {
                self.score_agent(agent_id);
            }
        }

        // Under overload, every admission costs four tokens, which
        // quarters both the effective capacity and the effective rate.
        let cost = if self.overloaded() { 4.0 } else { 1.0 };

        let (per_minute, buckets) = match kind {
            LimitKind::Request => (
                self.config.max_requests_per_minute,
                &self.request_buckets,
            ),
            LimitKind::Response => (
                self.config.max_responses_per_minute,
                &self.response_buckets,
            ),
        };

        let capacity = f64::from(per_minute + self.config.burst_allowance);
        let rate = f64::from(per_minute) / 60.0;

        let allowed = buckets
            .entry(agent_id.to_string())
            .or_insert_with(|| TokenBucket::new(capacity, rate))
            .consume(cost);

        if !allowed {
            self.record_violation(agent_id, kind);
        }
        allowed
    }

    /// Whether the global monitor currently sees an overload.
    #[must_use]
    pub fn overloaded(&self) -> bool {
        self.under_attack.load(Ordering::Relaxed)
    }

    /// Violation counts for one agent.
    #[must_use]
    pub fn violations_for(&self, agent_id: &str, kind: LimitKind) -> u64 {
        self.violations
            .get(&format!("{agent_id}:{}", kind.as_str()))
            .map(|count| *count)
            .unwrap_or(0)
    }

    /// Sum of all violations.
    #[must_use]
    pub fn total_violations(&self) -> u64 {
        self.violations.iter().map(|entry| *entry.value()).sum()
    }

    /// Number of agents with at least one bucket.
    #[must_use]
    pub fn tracked_agents(&self) -> usize {
        let mut agents: std::collections::HashSet<String> = std::collections::HashSet::new();
        for entry in self.request_buckets.iter() {
            agents.insert(entry.key().clone());
        }
        for entry in self.response_buckets.iter() {
            agents.insert(entry.key().clone());
        }
        agents.len()
    }

    /// Drop state for agents idle past `max_idle`.
    pub fn cleanup(&self, max_idle: Duration) {
        let now = Instant::now();
        self.suspicion.retain(|_, suspicion| {
            now.duration_since(suspicion.last_seen) < max_idle
                || suspicion.blocked_until.is_some_and(|until| until > now)
        });
    }

    fn is_blocked(&self, agent_id: &str) -> bool {
        let now = Instant::now();
        if let Some(mut entry) = self.suspicion.get_mut(agent_id) {
            match entry.blocked_until {
                Some(until) if until > now => return true,
                Some(_) => {
                    entry.blocked_until = None;
                    info!(agent_id, "Temporary block lifted");
                }
                None => {}
            }
        }
        false
    }

    fn observe_global(&self) {
        if !matches!(
            self.config.protection_level,
            ProtectionLevel::Enhanced | ProtectionLevel::Maximum
        ) {
            return;
        }

        let now = Instant::now();
        let cutoff = now - Duration::from_secs(60);

        let mut window = match self.global_window.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        window.push_back(now);
        while window.len() > GLOBAL_WINDOW_CAPACITY
            || window.front().is_some_and(|&ts| ts < cutoff)
        {
            window.pop_front();
        }

        let overloaded = window.len() > self.config.overload_threshold;
        let was_overloaded = self.under_attack.swap(overloaded, Ordering::Relaxed);
        if overloaded && !was_overloaded {
            warn!(
                requests_per_minute = window.len(),
                threshold = self.config.overload_threshold,
                "System overload detected, quartering active limits"
            );
        } else if !overloaded && was_overloaded {
            info!("Overload subsided, limits restored");
        }
    }

    fn score_agent(&self, agent_id: &str) {
        let now = Instant::now();
        let mut entry = self
            .suspicion
            .entry(agent_id.to_string())
            .or_insert_with(|| Suspicion {
                score: 0.0,
                last_seen: now,
                blocked_until: None,
            });

        let gap = now.duration_since(entry.last_seen);
        if gap < Duration::from_millis(100) {
            entry.score += 10.0;
        } else if gap < Duration::from_secs(1) {
            entry.score += 1.0;
        } else {
            entry.score = (entry.score - 0.1).max(0.0);
        }
        entry.last_seen = now;

        if entry.score > self.config.suspicious_threshold && entry.blocked_until.is_none() {
            entry.blocked_until = Some(now + self.config.block_duration);
            warn!(
                agent_id,
                score = entry.score,
                block_secs = self.config.block_duration.as_secs(),
                "Agent temporarily blocked for suspicious request rate"
            );
        }
    }

    fn record_violation(&self, agent_id: &str, kind: LimitKind) {
        *self
            .violations
            .entry(format!("{agent_id}:{}", kind.as_str()))
            .or_insert(0) += 1;
    }
}
