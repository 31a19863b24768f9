//! # Append-Only Event Store
//!
//! File-based event store with security validation and atomic guarantees.
//! One write lock serializes appends; queries read segments independently.
//! Failures before sequence assignment leave no state change; a failed
//! write after assignment quarantines the store.

use crate::auth::{Authorizer, IdentityRegistry};
use crate::config::EventStoreConfig;
use crate::errors::EventStoreError;
use crate::resource::{directory_usage, ResourceLimiter};
use crate::segment::{
    encode_record, list_segments, read_segment, RecordIter, SegmentWriter,
};
use crate::validation::{InputValidator, PathValidator};
use shared_types::{
    Event, EventBatch, EventFilter, EventQuery, MonotonicEventIdGenerator, OrderBy, QueryResult,
    MAX_EVENT_SIZE_BYTES,
};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Instant;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{error, info, warn};

/// Lifecycle state of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreStatus {
    /// Accepting appends and queries.
    Healthy,
    /// A write failed after sequence assignment; all operations refused.
    Quarantined,
    /// Shut down cleanly; all operations refused.
    Shutdown,
}

/// System health snapshot for monitoring.
#[derive(Debug, Clone)]
pub struct SystemHealth {
    pub status: StoreStatus,
    pub current_sequence: u64,
    pub events_per_second: f64,
    pub disk_usage_bytes: u64,
    pub disk_free_bytes: u64,
    pub log_file_count: usize,
    pub average_append_latency_ms: f64,
    pub average_query_latency_ms: f64,
    pub append_error_rate: f64,
    pub query_error_rate: f64,
    pub recovery_anomalies: u64,
}

/// In-memory index from event-type and aggregate keys to sequence sets.
#[derive(Debug, Default)]
struct EventIndex {
    by_event_type: HashMap<String, BTreeSet<u64>>,
    by_aggregate_id: HashMap<String, BTreeSet<u64>>,
}

impl EventIndex {
    fn insert(&mut self, event: &Event) {
        let Some(sequence) = event.sequence else {
            return;
        };

        self.by_event_type
            .entry(event.event_type.as_str().to_string())
            .or_default()
            .insert(sequence);
        self.by_aggregate_id
            .entry(event.aggregate_id.clone())
            .or_default()
            .insert(sequence);
    }

    /// Candidate sequences for a filter, or `None` when the filter has no
    /// indexable criteria.
    fn candidates(&self, filter: &EventFilter) -> Option<BTreeSet<u64>> {
        let mut result: Option<BTreeSet<u64>> = None;

        if let Some(types) = &filter.event_types {
            let mut set = BTreeSet::new();
            for event_type in types {
                if let Some(sequences) = self.by_event_type.get(event_type.as_str()) {
                    set.extend(sequences.iter().copied());
                }
            }
            result = Some(set);
        }

        if let Some(ids) = &filter.aggregate_ids {
            let mut set = BTreeSet::new();
            for id in ids {
                if let Some(sequences) = self.by_aggregate_id.get(id) {
                    set.extend(sequences.iter().copied());
                }
            }
            result = Some(match result {
                Some(existing) => existing.intersection(&set).copied().collect(),
                None => set,
            });
        }

        result
    }
}

#[derive(Debug, Default)]
struct StoreMetrics {
    append_times_ms: VecDeque<f64>,
    query_times_ms: VecDeque<f64>,
    append_errors: u64,
    query_errors: u64,
    recovery_anomalies: u64,
}

const METRIC_WINDOW: usize = 1000;

impl StoreMetrics {
    fn record_append(&mut self, elapsed_ms: f64) {
        self.append_times_ms.push_back(elapsed_ms);
        if self.append_times_ms.len() > METRIC_WINDOW {
            self.append_times_ms.pop_front();
        }
    }

    fn record_query(&mut self, elapsed_ms: f64) {
        self.query_times_ms.push_back(elapsed_ms);
        if self.query_times_ms.len() > METRIC_WINDOW {
            self.query_times_ms.pop_front();
        }
    }
}

/// High-performance file-based event store with authenticated records.
pub struct EventStore {
    config: EventStoreConfig,
    input_validator: InputValidator,
    resource_limiter: ResourceLimiter,
    identity: IdentityRegistry,
    authorizer: Authorizer,
    id_generator: MonotonicEventIdGenerator,

    /// The global write lock. Appends serialize here.
    writer: AsyncMutex<Option<SegmentWriter>>,

    index: RwLock<EventIndex>,
    sequence: AtomicU64,
    status: RwLock<StoreStatus>,
    metrics: Mutex<StoreMetrics>,
}

impl EventStore {
    /// Open (or create) the store, recovering sequence and index from the
    /// existing segments.
    ///
    /// # Errors
    ///
    /// Fails when the data directory is outside the allowed base paths or
    /// cannot be created, or when the current segment cannot be opened.
    pub fn open(
        config: EventStoreConfig,
        identity: IdentityRegistry,
    ) -> Result<Self, EventStoreError> {
        let path_validator = PathValidator::new(&config.allowed_base_dirs);
        let data_dir = path_validator.validate_directory(&config.data_dir)?;

        std::fs::create_dir_all(&data_dir).map_err(|e| EventStoreError::io("create_dir", e))?;

        let resource_limiter =
            ResourceLimiter::new(config.max_disk_usage, config.max_file_handles);

        let mut config = config;
        config.data_dir = data_dir;

        let mut index = EventIndex::default();
        let mut max_sequence = 0u64;
        let mut anomalies = 0u64;

        let segments =
            list_segments(&config.data_dir).map_err(|e| EventStoreError::io("list_segments", e))?;
        for segment in &segments {
            let content =
                read_segment(segment).map_err(|e| EventStoreError::io("read_segment", e))?;
            let mut records = RecordIter::new(&config.secret, &content);
            for payload in records.by_ref() {
                match Event::from_bytes(payload) {
                    Ok(event) => {
                        if let Some(sequence) = event.sequence {
                            max_sequence = max_sequence.max(sequence);
                        }
                        index.insert(&event);
                    }
                    Err(_) => anomalies += 1,
                }
            }
            anomalies += records.skipped();
        }

        if anomalies > 0 {
            warn!(anomalies, "Skipped unauthenticated or malformed records during recovery");
        }

        resource_limiter.acquire_file_handle()?;
        let writer = SegmentWriter::open_next(
            &config.data_dir,
            config.max_segment_size,
            config.compress_rolled,
        )
        .map_err(|e| {
            resource_limiter.release_file_handle();
            EventStoreError::io("open_segment", e)
        })?;

        info!(
            data_dir = %config.data_dir.display(),
            recovered_sequence = max_sequence,
            segments = segments.len(),
            "Event store opened"
        );

        let authorizer = Authorizer::new(identity.clone());
        let node_id = config.node_id.clone();

        Ok(Self {
            config,
            input_validator: InputValidator::new(),
            resource_limiter,
            identity,
            authorizer,
            id_generator: MonotonicEventIdGenerator::new(node_id),
            writer: AsyncMutex::new(Some(writer)),
            index: RwLock::new(index),
            sequence: AtomicU64::new(max_sequence),
            status: RwLock::new(StoreStatus::Healthy),
            metrics: Mutex::new(StoreMetrics {
                recovery_anomalies: anomalies,
                ..StoreMetrics::default()
            }),
        })
    }

    /// Append a single event.
    ///
    /// Returns the event enriched with its assigned `sequence` and
    /// `event_id`.
    ///
    /// # Errors
    ///
    /// - `Security` when validation rejects the event.
    /// - `Auth` when the writing agent lacks `events:write`.
    /// - `SizeExceeded` past the 1 MiB bound.
    /// - `Resource` when disk or handle caps refuse the write.
    /// - `Io` / `Quarantined` on storage failure.
    pub async fn append(
        &self,
        event: Event,
        agent_id: Option<&str>,
    ) -> Result<Event, EventStoreError> {
        self.ensure_operational()?;

        let mut event = event;
        self.input_validator.validate_event(&event)?;

        if let Some(agent_id) = agent_id {
            self.authorizer
                .authorize_write(agent_id, 1, Some(&event.aggregate_id))?;
            if event.source_agent.is_none() {
                event.source_agent = Some(agent_id.to_string());
            }
        }

        let size = event.size_bytes();
        if size > MAX_EVENT_SIZE_BYTES {
            return Err(EventStoreError::SizeExceeded {
                size,
                limit: MAX_EVENT_SIZE_BYTES,
            });
        }
        self.resource_limiter
            .check_disk_usage(&self.config.data_dir, size as u64)?;
        self.resource_limiter
            .check_available_space(&self.config.data_dir, size as u64)?;

        let started = Instant::now();
        let result = self.write_events(vec![event]).await;

        match result {
            Ok(mut events) => {
                self.with_metrics(|m| m.record_append(elapsed_ms(started)));
                // write_events always returns as many events as it was given.
                events.pop().ok_or(EventStoreError::Quarantined)
            }
            Err(err) => {
                self.with_metrics(|m| m.append_errors += 1);
                Err(err)
            }
        }
    }

    /// Atomically append a batch with contiguous sequences and one sync.
    ///
    /// # Errors
    ///
    /// See [`EventStore::append`]; batch limits are validated first.
    pub async fn append_batch(
        &self,
        batch: EventBatch,
        agent_id: Option<&str>,
    ) -> Result<Vec<Event>, EventStoreError> {
        self.ensure_operational()?;
        self.input_validator.validate_batch(&batch)?;

        let mut events = batch.events;

        if let Some(agent_id) = agent_id {
            self.authorizer
                .authorize_write(agent_id, events.len(), None)?;
            for event in &mut events {
                if event.source_agent.is_none() {
                    event.source_agent = Some(agent_id.to_string());
                }
            }
        }

        let total_size: usize = events.iter().map(Event::size_bytes).sum();
        for event in &events {
            let size = event.size_bytes();
            if size > MAX_EVENT_SIZE_BYTES {
                return Err(EventStoreError::SizeExceeded {
                    size,
                    limit: MAX_EVENT_SIZE_BYTES,
                });
            }
        }
        self.resource_limiter
            .check_disk_usage(&self.config.data_dir, total_size as u64)?;
        self.resource_limiter
            .check_available_space(&self.config.data_dir, total_size as u64)?;

        let started = Instant::now();
        let result = self.write_events(events).await;

        match result {
            Ok(events) => {
                self.with_metrics(|m| m.record_append(elapsed_ms(started)));
                Ok(events)
            }
            Err(err) => {
                self.with_metrics(|m| m.append_errors += 1);
                Err(err)
            }
        }
    }

    /// Write events under the global write lock: assign contiguous
    /// sequences and IDs, write all records, sync once, update the index.
    async fn write_events(&self, mut events: Vec<Event>) -> Result<Vec<Event>, EventStoreError> {
        let mut writer_guard = self.writer.lock().await;
        let writer = writer_guard.as_mut().ok_or(EventStoreError::Shutdown)?;

        let start_sequence = self.sequence.load(Ordering::SeqCst) + 1;

        // Serialize everything before touching the file so a malformed
        // event leaves no state change.
        let mut records = Vec::with_capacity(events.len());
        for (i, event) in events.iter_mut().enumerate() {
            event.sequence = Some(start_sequence + i as u64);
            event.event_id = Some(self.id_generator.generate());

            let payload = event
                .to_bytes()
                .map_err(|e| EventStoreError::Serialization {
                    message: e.to_string(),
                })?;
            records.push(encode_record(&self.config.secret, &payload));
        }

        for record in &records {
            if let Err(e) = writer.write_record(record) {
                self.quarantine("record write failed");
                return Err(EventStoreError::io("write_record", e));
            }
        }
        if let Err(e) = writer.sync(self.config.sync_policy) {
            self.quarantine("segment sync failed");
            return Err(EventStoreError::io("sync", e));
        }

        let last_sequence = start_sequence + events.len() as u64 - 1;
        self.sequence.store(last_sequence, Ordering::SeqCst);

        if let Ok(mut index) = self.index.write() {
            for event in &events {
                index.insert(event);
            }
        }

        if writer.should_roll() {
            if let Err(error) = writer.roll() {
                // The append itself is durable; rolling retries next time.
                warn!(%error, "Segment roll failed");
            }
        }

        Ok(events)
    }

    /// Query events with filtering, ordering, and pagination.
    ///
    /// # Errors
    ///
    /// - `Auth` when the querying agent lacks `events:query`.
    /// - `Io` when a segment cannot be read.
    pub async fn query(
        &self,
        query: EventQuery,
        agent_id: Option<&str>,
    ) -> Result<QueryResult, EventStoreError> {
        self.ensure_operational()?;

        if let Some(agent_id) = agent_id {
            self.authorizer.authorize_query(agent_id).map_err(|e| {
                self.with_metrics(|m| m.query_errors += 1);
                e
            })?;
        }

        let started = Instant::now();

        let candidates = self
            .index
            .read()
            .ok()
            .and_then(|index| index.candidates(&query.filter));

        let mut matched = Vec::new();
        let scan = self.scan_segments(|event| {
            if let (Some(candidates), Some(sequence)) = (&candidates, event.sequence) {
                if !candidates.contains(&sequence) {
                    return;
                }
            }
            if query.filter.matches(event) {
                matched.push(event.clone());
            }
        });
        if let Err(err) = scan {
            self.with_metrics(|m| m.query_errors += 1);
            return Err(err);
        }

        match query.order_by {
            OrderBy::Sequence => matched.sort_by_key(|e| e.sequence.unwrap_or(0)),
            OrderBy::Timestamp => matched.sort_by_key(|e| e.timestamp_ms),
        }
        if !query.ascending {
            matched.reverse();
        }

        let total_count = matched.len();
        let limit = query.effective_limit();
        let events: Vec<Event> = matched
            .into_iter()
            .skip(query.offset)
            .take(limit)
            .collect();
        let has_more = total_count > query.offset + limit;

        let execution_time_ms = elapsed_ms(started);
        self.with_metrics(|m| m.record_query(execution_time_ms));

        Ok(QueryResult {
            events,
            total_count,
            has_more,
            execution_time_ms,
        })
    }

    /// Lazy, restartable scan of the log from `start_sequence` (inclusive).
    ///
    /// # Errors
    ///
    /// Returns `Io` when the segment listing fails; per-segment read
    /// failures surface as the end of the stream with a logged warning.
    pub fn stream(
        &self,
        filter: EventFilter,
        start_sequence: u64,
    ) -> Result<EventStream, EventStoreError> {
        self.ensure_operational()?;
        let segments = list_segments(&self.config.data_dir)
            .map_err(|e| EventStoreError::io("list_segments", e))?;

        Ok(EventStream {
            secret: self.config.secret.clone(),
            segments: segments.into(),
            current: Vec::new().into_iter(),
            filter,
            start_sequence,
        })
    }

    /// Current health snapshot.
    #[must_use]
    pub fn health(&self) -> SystemHealth {
        let (
            append_latency,
            query_latency,
            append_errors,
            query_errors,
            appends,
            queries,
            anomalies,
        ) = {
            let metrics = match self.metrics.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            (
                mean(&metrics.append_times_ms),
                mean(&metrics.query_times_ms),
                metrics.append_errors,
                metrics.query_errors,
                metrics.append_times_ms.len() as u64,
                metrics.query_times_ms.len() as u64,
                metrics.recovery_anomalies,
            )
        };

        let disk_usage = directory_usage(&self.config.data_dir);
        let disk_free = fs2::available_space(&self.config.data_dir).unwrap_or(0);
        let log_file_count = list_segments(&self.config.data_dir)
            .map(|segments| segments.len())
            .unwrap_or(0);

        SystemHealth {
            status: self.status(),
            current_sequence: self.current_sequence(),
            events_per_second: appends as f64 / 60.0,
            disk_usage_bytes: disk_usage,
            disk_free_bytes: disk_free,
            log_file_count,
            average_append_latency_ms: append_latency,
            average_query_latency_ms: query_latency,
            append_error_rate: rate(append_errors, appends + append_errors),
            query_error_rate: rate(query_errors, queries + query_errors),
            recovery_anomalies: anomalies,
        }
    }

    /// Globally ordered sequence of the most recent append.
    #[must_use]
    pub fn current_sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    /// Lifecycle status.
    #[must_use]
    pub fn status(&self) -> StoreStatus {
        self.status
            .read()
            .map(|s| *s)
            .unwrap_or(StoreStatus::Quarantined)
    }

    /// The injected identity registry.
    #[must_use]
    pub fn identity(&self) -> &IdentityRegistry {
        &self.identity
    }

    /// Store configuration.
    #[must_use]
    pub fn config(&self) -> &EventStoreConfig {
        &self.config
    }

    /// Clean shutdown: final sync, close the segment, refuse further work.
    pub async fn shutdown(&self) {
        let mut writer_guard = self.writer.lock().await;
        if let Some(mut writer) = writer_guard.take() {
            if let Err(error) = writer.sync(crate::config::SyncPolicy::Fsync) {
                warn!(%error, "Final sync failed during shutdown");
            }
            self.resource_limiter.release_file_handle();
        }
        if let Ok(mut status) = self.status.write() {
            *status = StoreStatus::Shutdown;
        }
        info!("Event store shut down");
    }

    fn ensure_operational(&self) -> Result<(), EventStoreError> {
        match self.status() {
            StoreStatus::Healthy => Ok(()),
            StoreStatus::Quarantined => Err(EventStoreError::Quarantined),
            StoreStatus::Shutdown => Err(EventStoreError::Shutdown),
        }
    }

    fn quarantine(&self, reason: &str) {
        error!(reason, "Quarantining event store");
        if let Ok(mut status) = self.status.write() {
            *status = StoreStatus::Quarantined;
        }
    }

    fn scan_segments(
        &self,
        mut visit: impl FnMut(&Event),
    ) -> Result<(), EventStoreError> {
        let segments = list_segments(&self.config.data_dir)
            .map_err(|e| EventStoreError::io("list_segments", e))?;

        for segment in segments {
            let content =
                read_segment(&segment).map_err(|e| EventStoreError::io("read_segment", e))?;
            for payload in RecordIter::new(&self.config.secret, &content) {
                if let Ok(event) = Event::from_bytes(payload) {
                    visit(&event);
                }
            }
        }
        Ok(())
    }

    fn with_metrics(&self, update: impl FnOnce(&mut StoreMetrics)) {
        let mut metrics = match self.metrics.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        update(&mut metrics);
    }
}

/// Lazy event stream over segment files.
///
/// Finite and restartable: constructing a new stream with the same
/// `start_sequence` resumes from the same position.
pub struct EventStream {
    secret: Vec<u8>,
    segments: VecDeque<PathBuf>,
    current: std::vec::IntoIter<Event>,
    filter: EventFilter,
    start_sequence: u64,
}

impl Iterator for EventStream {
    type Item = Event;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            for event in self.current.by_ref() {
                let in_range = event
                    .sequence
                    .is_some_and(|sequence| sequence >= self.start_sequence);
                if in_range && self.filter.matches(&event) {
                    return Some(event);
                }
            }

            let segment = self.segments.pop_front()?;
            match read_segment(&segment) {
                Ok(content) => {
                    let events: Vec<Event> = RecordIter::new(&self.secret, &content)
                        .filter_map(|payload| Event::from_bytes(payload).ok())
                        .collect();
                    self.current = events.into_iter();
                }
                Err(error) => {
                    warn!(%error, segment = %segment.display(), "Skipping unreadable segment");
                }
            }
        }
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

fn mean(samples: &VecDeque<f64>) -> f64 {
    if samples.is_empty() {
        0.0
    } else {
        samples.iter().sum::<f64>() / samples.len() as f64
    }
}

fn rate(errors: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        errors as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AgentRole;
    use shared_types::{EventType, Value};
    use std::collections::BTreeMap;

    fn open_store(dir: &std::path::Path) -> EventStore {
        let config = EventStoreConfig::new(dir, b"store-test-secret".to_vec());
        let identity = IdentityRegistry::new(b"store-test-secret".to_vec());
        EventStore::open(config, identity).unwrap()
    }

    fn sample_event(aggregate_id: &str) -> Event {
        let mut data = BTreeMap::new();
        data.insert("k".to_string(), Value::from("v"));
        Event::new(EventType::Custom, aggregate_id, "elicitation")
            .with_data(data)
            .with_source_component("test")
    }

    #[tokio::test]
    async fn test_append_assigns_dense_sequences() {
        let temp = tempfile::tempdir().unwrap();
        let store = open_store(temp.path());

        for expected in 1..=5u64 {
            let event = store.append(sample_event("agg"), None).await.unwrap();
            assert_eq!(event.sequence, Some(expected));
            assert!(event.event_id.is_some());
        }
        assert_eq!(store.current_sequence(), 5);
    }

    #[tokio::test]
    async fn test_batch_contiguous_sequences() {
        let temp = tempfile::tempdir().unwrap();
        let store = open_store(temp.path());

        store.append(sample_event("first"), None).await.unwrap();

        let batch = EventBatch::new(vec![
            sample_event("a"),
            sample_event("b"),
            sample_event("c"),
        ]);
        let events = store.append_batch(batch, None).await.unwrap();
        let sequences: Vec<u64> = events.iter().filter_map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn test_append_then_query_round_trip() {
        let temp = tempfile::tempdir().unwrap();
        let store = open_store(temp.path());

        let appended = store.append(sample_event("agg_x"), None).await.unwrap();

        let query = EventQuery::with_filter(EventFilter::for_aggregate("agg_x"));
        let result = store.query(query, None).await.unwrap();
        assert_eq!(result.events.len(), 1);
        assert_eq!(result.events[0], appended);
        assert!(!result.has_more);
    }

    #[tokio::test]
    async fn test_recovery_rederives_sequence() {
        let temp = tempfile::tempdir().unwrap();
        {
            let store = open_store(temp.path());
            for _ in 0..7 {
                store.append(sample_event("agg"), None).await.unwrap();
            }
            store.shutdown().await;
        }

        let reopened = open_store(temp.path());
        assert_eq!(reopened.current_sequence(), 7);

        let event = reopened.append(sample_event("agg"), None).await.unwrap();
        assert_eq!(event.sequence, Some(8));
    }

    #[tokio::test]
    async fn test_tampered_record_skipped_on_recovery() {
        let temp = tempfile::tempdir().unwrap();
        {
            let store = open_store(temp.path());
            for _ in 0..3 {
                store.append(sample_event("agg"), None).await.unwrap();
            }
            store.shutdown().await;
        }

        // Corrupt the middle of the segment.
        let segments = list_segments(temp.path()).unwrap();
        let path = &segments[0];
        let mut content = std::fs::read(path).unwrap();
        let middle = content.len() / 2;
        content[middle] ^= 0xFF;
        std::fs::write(path, content).unwrap();

        let reopened = open_store(temp.path());
        let health = reopened.health();
        assert!(health.recovery_anomalies > 0);
    }

    #[tokio::test]
    async fn test_oversized_event_rejected() {
        let temp = tempfile::tempdir().unwrap();
        let store = open_store(temp.path());

        let mut data = BTreeMap::new();
        data.insert(
            "blob".to_string(),
            Value::Str("x".repeat(MAX_EVENT_SIZE_BYTES + 1)),
        );
        let event = Event::new(EventType::Custom, "agg", "t").with_data(data);

        let result = store.append(event, None).await;
        assert!(matches!(
            result,
            Err(EventStoreError::Security(_)) | Err(EventStoreError::SizeExceeded { .. })
        ));
        assert_eq!(store.current_sequence(), 0);
    }

    #[tokio::test]
    async fn test_unauthenticated_writer_rejected() {
        let temp = tempfile::tempdir().unwrap();
        let store = open_store(temp.path());

        let result = store.append(sample_event("agg"), Some("stranger")).await;
        assert!(matches!(result, Err(EventStoreError::Auth(_))));
    }

    #[tokio::test]
    async fn test_authorized_writer_stamps_source_agent() {
        let temp = tempfile::tempdir().unwrap();
        let store = open_store(temp.path());

        let registry = store.identity().clone();
        let token = registry.create_token("agent_a");
        registry
            .authenticate("agent_a", &token, AgentRole::Agent)
            .unwrap();

        let event = store
            .append(sample_event("agg"), Some("agent_a"))
            .await
            .unwrap();
        assert_eq!(event.source_agent.as_deref(), Some("agent_a"));
    }

    #[tokio::test]
    async fn test_query_filters_and_pagination() {
        let temp = tempfile::tempdir().unwrap();
        let store = open_store(temp.path());

        for i in 0..10 {
            store
                .append(sample_event(&format!("agg_{}", i % 2)), None)
                .await
                .unwrap();
        }

        let query = EventQuery {
            filter: EventFilter::for_aggregate("agg_0"),
            offset: 2,
            limit: 2,
            order_by: OrderBy::Sequence,
            ascending: true,
        };
        let result = store.query(query, None).await.unwrap();
        assert_eq!(result.total_count, 5);
        assert_eq!(result.events.len(), 2);
        assert!(result.has_more);
        assert_eq!(result.events[0].sequence, Some(5));
    }

    #[tokio::test]
    async fn test_query_descending() {
        let temp = tempfile::tempdir().unwrap();
        let store = open_store(temp.path());

        for _ in 0..4 {
            store.append(sample_event("agg"), None).await.unwrap();
        }

        let query = EventQuery {
            ascending: false,
            ..EventQuery::default()
        };
        let result = store.query(query, None).await.unwrap();
        assert_eq!(result.events[0].sequence, Some(4));
        assert_eq!(result.events[3].sequence, Some(1));
    }

    #[tokio::test]
    async fn test_stream_restartable_from_sequence() {
        let temp = tempfile::tempdir().unwrap();
        let store = open_store(temp.path());

        for _ in 0..6 {
            store.append(sample_event("agg"), None).await.unwrap();
        }

        let collected: Vec<u64> = store
            .stream(EventFilter::all(), 4)
            .unwrap()
            .filter_map(|e| e.sequence)
            .collect();
        assert_eq!(collected, vec![4, 5, 6]);

        // Restart from the same point yields the same events.
        let again: Vec<u64> = store
            .stream(EventFilter::all(), 4)
            .unwrap()
            .filter_map(|e| e.sequence)
            .collect();
        assert_eq!(again, collected);
    }

    #[tokio::test]
    async fn test_shutdown_refuses_operations() {
        let temp = tempfile::tempdir().unwrap();
        let store = open_store(temp.path());
        store.shutdown().await;

        let result = store.append(sample_event("agg"), None).await;
        assert!(matches!(result, Err(EventStoreError::Shutdown)));
        assert_eq!(store.status(), StoreStatus::Shutdown);
    }

    #[tokio::test]
    async fn test_health_reports_counts() {
        let temp = tempfile::tempdir().unwrap();
        let store = open_store(temp.path());

        store.append(sample_event("agg"), None).await.unwrap();
        let _ = store.query(EventQuery::default(), None).await.unwrap();

        let health = store.health();
        assert_eq!(health.status, StoreStatus::Healthy);
        assert_eq!(health.current_sequence, 1);
        assert_eq!(health.log_file_count, 1);
        assert!(health.disk_usage_bytes > 0);
        assert!(health.average_append_latency_ms >= 0.0);
    }
}
