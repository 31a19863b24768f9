//! # Audit Logging
//!
//! Security-relevant events are recorded in a bounded in-memory window for
//! introspection; high and critical violations are additionally persisted
//! as standalone security events in the event store.
//!
//! In the fast profile, persistence is routed through a bounded
//! [`AuditChannel`] drained by a background task; overflow drops entries
//! with a counter, never backpressuring the request path.

use serde::Serialize;
use shared_crypto::random_hex;
use shared_types::event::now_ms;
use shared_types::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::warn;

/// Severity of an audited event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Stable string form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }

    /// Whether the entry must be persisted to the event store.
    #[must_use]
    pub fn persists(&self) -> bool {
        matches!(self, Self::High | Self::Critical)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One audited event.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub entry_id: String,
    pub event_type: String,
    pub agent: String,
    pub elicitation_id: Option<String>,
    pub severity: Severity,
    pub details: BTreeMap<String, Value>,
    pub timestamp_ms: u64,
}

impl AuditEntry {
    /// Build a violation entry.
    #[must_use]
    pub fn violation(
        event_type: &str,
        agent: &str,
        elicitation_id: Option<&str>,
        severity: Severity,
        details: BTreeMap<String, Value>,
    ) -> Self {
        Self {
            entry_id: format!("violation_{}", random_hex(8)),
            event_type: event_type.to_string(),
            agent: agent.to_string(),
            elicitation_id: elicitation_id.map(str::to_string),
            severity,
            details,
            timestamp_ms: now_ms(),
        }
    }

    /// Build an informational lifecycle entry.
    #[must_use]
    pub fn lifecycle(
        event_type: &str,
        agent: &str,
        elicitation_id: &str,
        details: BTreeMap<String, Value>,
    ) -> Self {
        Self {
            entry_id: format!("audit_{}", random_hex(8)),
            event_type: event_type.to_string(),
            agent: agent.to_string(),
            elicitation_id: Some(elicitation_id.to_string()),
            severity: Severity::Info,
            details,
            timestamp_ms: now_ms(),
        }
    }
}

/// In-memory window capacity.
const WINDOW_CAPACITY: usize = 10_000;

/// What the caller must do with an entry after recording it.
#[derive(Debug)]
pub enum PersistAction {
    /// Nothing further; the entry was informational or already queued.
    Done,
    /// Persist the entry synchronously as a security event.
    Persist(AuditEntry),
}

/// Bounded channel carrying audit entries to a background drain task.
pub struct AuditChannel {
    sender: mpsc::Sender<AuditEntry>,
    dropped: AtomicU64,
}

impl AuditChannel {
    /// Create the channel; the receiver goes to the drain task.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<AuditEntry>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (
            Self {
                sender,
                dropped: AtomicU64::new(0),
            },
            receiver,
        )
    }

    /// Queue an entry without blocking; overflow drops with a counter.
    pub fn push(&self, entry: AuditEntry) {
        if let Err(error) = self.sender.try_send(entry) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(%error, "Audit channel full, entry dropped");
        }
    }

    /// Entries dropped due to overflow.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Audit logger with a bounded window and violation counters.
pub struct AuditLogger {
    window: Mutex<VecDeque<AuditEntry>>,
    /// Counts per `{agent}:{event_type}`.
    violation_counts: Mutex<HashMap<String, u64>>,
    channel: Option<AuditChannel>,
}

impl AuditLogger {
    /// Logger persisting high/critical entries synchronously.
    #[must_use]
    pub fn new() -> Self {
        Self {
            window: Mutex::new(VecDeque::new()),
            violation_counts: Mutex::new(HashMap::new()),
            channel: None,
        }
    }

    /// Logger routing persistence through an [`AuditChannel`].
    #[must_use]
    pub fn with_channel(channel: AuditChannel) -> Self {
        Self {
            window: Mutex::new(VecDeque::new()),
            violation_counts: Mutex::new(HashMap::new()),
            channel: Some(channel),
        }
    }

    /// Record an entry.
    ///
    /// Returns `PersistAction::Persist` when the caller must append the
    /// entry to the event store synchronously (high/critical severity and
    /// no channel configured).
    pub fn record(&self, entry: AuditEntry) -> PersistAction {
        if entry.severity >= Severity::Medium {
            let key = format!("{}:{}", entry.agent, entry.event_type);
            let mut counts = lock(&self.violation_counts);
            *counts.entry(key).or_insert(0) += 1;
            warn!(
                event_type = %entry.event_type,
                agent = %entry.agent,
                severity = %entry.severity,
                "Security violation"
            );
        }

        {
            let mut window = lock(&self.window);
            window.push_back(entry.clone());
            if window.len() > WINDOW_CAPACITY {
                window.pop_front();
            }
        }

        if !entry.severity.persists() {
            return PersistAction::Done;
        }
        match &self.channel {
            Some(channel) => {
                channel.push(entry);
                PersistAction::Done
            }
            None => PersistAction::Persist(entry),
        }
    }

    /// Violation count for a `{agent}:{event_type}` pair.
    #[must_use]
    pub fn violations_for(&self, agent: &str, event_type: &str) -> u64 {
        lock(&self.violation_counts)
            .get(&format!("{agent}:{event_type}"))
            .copied()
            .unwrap_or(0)
    }

    /// Total violations of a given type across agents.
    #[must_use]
    pub fn count_by_type(&self, event_type: &str) -> u64 {
        let suffix = format!(":{event_type}");
        lock(&self.violation_counts)
            .iter()
            .filter(|(key, _)| key.ends_with(&suffix))
            .map(|(_, count)| *count)
            .sum()
    }

    /// Recent entries, most recent last.
    #[must_use]
    pub fn recent(&self, limit: usize) -> Vec<AuditEntry> {
        let window = lock(&self.window);
        window
            .iter()
            .rev()
            .take(limit)
            .rev()
            .cloned()
            .collect()
    }

    /// Every recorded entry mentioning an agent.
    #[must_use]
    pub fn agent_history(&self, agent_id: &str) -> Vec<AuditEntry> {
        lock(&self.window)
            .iter()
            .filter(|entry| entry.agent == agent_id)
            .cloned()
            .collect()
    }

    /// Entries dropped by the channel, when one is configured.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.channel.as_ref().map_or(0, AuditChannel::dropped)
    }
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_persistence_rule() {
        assert!(!Severity::Info.persists());
        assert!(!Severity::Medium.persists());
        assert!(Severity::High.persists());
        assert!(Severity::Critical.persists());
    }

    #[test]
    fn test_sync_persist_action() {
        let logger = AuditLogger::new();

        let info = AuditEntry::lifecycle("ELICITATION_CREATED", "agent_a", "elicit_1", BTreeMap::new());
        assert!(matches!(logger.record(info), PersistAction::Done));

        let critical = AuditEntry::violation(
            "UNAUTHORIZED_ELICITATION_RESPONSE",
            "agent_c",
            Some("elicit_1"),
            Severity::Critical,
            BTreeMap::new(),
        );
        assert!(matches!(logger.record(critical), PersistAction::Persist(_)));
    }

    #[test]
    fn test_violation_counters() {
        let logger = AuditLogger::new();
        for _ in 0..3 {
            let entry = AuditEntry::violation(
                "RATE_LIMIT_EXCEEDED",
                "agent_a",
                None,
                Severity::Medium,
                BTreeMap::new(),
            );
            logger.record(entry);
        }
        let other = AuditEntry::violation(
            "RATE_LIMIT_EXCEEDED",
            "agent_b",
            None,
            Severity::Medium,
            BTreeMap::new(),
        );
        logger.record(other);

        assert_eq!(logger.violations_for("agent_a", "RATE_LIMIT_EXCEEDED"), 3);
        assert_eq!(logger.count_by_type("RATE_LIMIT_EXCEEDED"), 4);
    }

    #[test]
    fn test_agent_history() {
        let logger = AuditLogger::new();
        logger.record(AuditEntry::lifecycle(
            "ELICITATION_CREATED",
            "agent_a",
            "elicit_1",
            BTreeMap::new(),
        ));
        logger.record(AuditEntry::lifecycle(
            "ELICITATION_CREATED",
            "agent_b",
            "elicit_2",
            BTreeMap::new(),
        ));

        assert_eq!(logger.agent_history("agent_a").len(), 1);
        assert_eq!(logger.recent(10).len(), 2);
    }

    #[tokio::test]
    async fn test_channel_overflow_drops_with_counter() {
        let (channel, mut receiver) = AuditChannel::new(2);
        let logger = AuditLogger::with_channel(channel);

        for i in 0..5 {
            let entry = AuditEntry::violation(
                "REPLAY_ATTACK_PREVENTED",
                &format!("agent_{i}"),
                None,
                Severity::Critical,
                BTreeMap::new(),
            );
            assert!(matches!(logger.record(entry), PersistAction::Done));
        }

        assert_eq!(logger.dropped(), 3);
        assert!(receiver.recv().await.is_some());
        assert!(receiver.recv().await.is_some());
    }
}
