//! Log polling feed
//!
//! Client-side cooperative loop that repeatedly asks the server for activity
//! log entries newer than the last-seen watermark and raises a one-shot
//! notification for every entry it has not shown before. One tick runs at a
//! time: the loop awaits each fetch before sleeping again, so there is never
//! an overlapping request to race against.
//!
//! De-duplication state is owned by [`LogFeed`] itself: a watermark
//! timestamp plus a bounded set of recently-seen entry ids with FIFO
//! eviction. Nothing global, nothing that grows forever.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::MissedTickBehavior;

use crate::models::LogLevel;

/// Seconds between polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(7);

/// Ids remembered for de-duplication before the oldest are evicted
const SEEN_CAPACITY: usize = 256;

/// An activity log entry as served by `GET /api/v1/logs`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: i64,
    pub level: LogLevel,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Where the feed gets its entries. The HTTP implementation talks to the
/// server; tests substitute canned batches.
pub trait LogSource {
    /// Most recent page of entries, newest-first (first tick)
    async fn fetch_latest(&self) -> anyhow::Result<Vec<LogEntry>>;

    /// Entries strictly newer than the watermark, newest-first
    async fn fetch_newer_than(&self, watermark: DateTime<Utc>) -> anyhow::Result<Vec<LogEntry>>;
}

/// Sink for one-shot notifications about entries not shown before
pub trait Notifier {
    fn notify(&mut self, entry: &LogEntry);
}

/// Bounded set of recently-seen entry ids with FIFO eviction
#[derive(Debug)]
struct SeenSet {
    ids: HashSet<i64>,
    order: VecDeque<i64>,
    capacity: usize,
}

impl SeenSet {
    fn new(capacity: usize) -> Self {
        Self {
            ids: HashSet::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    /// Returns true when the id was not present yet
    fn insert(&mut self, id: i64) -> bool {
        if !self.ids.insert(id) {
            return false;
        }
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.ids.remove(&evicted);
            }
        }
        true
    }
}

/// Polling feed state: watermark, de-duplication set, and the newest-first
/// list of entries fetched so far.
#[derive(Debug)]
pub struct LogFeed {
    entries: Vec<LogEntry>,
    seen: SeenSet,
    watermark: Option<DateTime<Utc>>,
}

impl Default for LogFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl LogFeed {
    pub fn new() -> Self {
        Self::with_seen_capacity(SEEN_CAPACITY)
    }

    fn with_seen_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            seen: SeenSet::new(capacity),
            watermark: None,
        }
    }

    /// Entries fetched so far, newest-first
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// One poll cycle. Fetch errors are traced and swallowed; the next tick
    /// retries naturally. Returns how many notifications were raised.
    pub async fn tick<S: LogSource, N: Notifier>(&mut self, source: &S, notifier: &mut N) -> usize {
        let fetched = match self.watermark {
            Some(ts) => source.fetch_newer_than(ts).await,
            None => source.fetch_latest().await,
        };

        let batch = match fetched {
            Ok(batch) => batch,
            Err(err) => {
                tracing::warn!("Log poll failed: {}", err);
                return 0;
            }
        };

        if batch.is_empty() {
            return 0;
        }

        // Advance the watermark to the newest timestamp fetched
        if let Some(newest) = batch.iter().map(|e| e.created_at).max() {
            if self.watermark.map_or(true, |w| newest > w) {
                self.watermark = Some(newest);
            }
        }

        // Notify oldest-first so the operator reads events in order
        let mut notified = 0;
        let mut fresh = Vec::new();
        for entry in batch.into_iter().rev() {
            if self.seen.insert(entry.id) {
                notifier.notify(&entry);
                notified += 1;
                fresh.push(entry);
            }
        }

        // Prepend, restoring newest-first
        fresh.reverse();
        fresh.append(&mut self.entries);
        self.entries = fresh;

        notified
    }

    /// Drive the feed until the task is dropped or aborted. A completed
    /// in-flight request cannot outlive the feed: state only changes inside
    /// this future.
    pub async fn run<S: LogSource, N: Notifier>(
        mut self,
        source: S,
        mut notifier: N,
        period: Duration,
    ) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            self.tick(&source, &mut notifier).await;
        }
    }
}

/// Feed endpoint configuration
#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub server_url: String,
    pub token: String,
    pub timeout_seconds: u64,
}

/// [`LogSource`] backed by the server's logs endpoint
pub struct HttpLogSource {
    config: FeedConfig,
    http_client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct LogsResponse {
    success: bool,
    logs: Vec<LogEntry>,
}

impl HttpLogSource {
    pub fn new(config: FeedConfig) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self { config, http_client })
    }

    async fn fetch(&self, watermark: Option<DateTime<Utc>>) -> anyhow::Result<Vec<LogEntry>> {
        let url = format!("{}/api/v1/logs", self.config.server_url);
        let mut request = self
            .http_client
            .get(&url)
            .bearer_auth(&self.config.token);

        if let Some(ts) = watermark {
            request = request.query(&[("last_fetched", ts.to_rfc3339())]);
        }

        let response = request.send().await?.error_for_status()?;
        let body: LogsResponse = response.json().await?;
        if !body.success {
            anyhow::bail!("Server rejected the log request");
        }
        Ok(body.logs)
    }
}

impl LogSource for HttpLogSource {
    async fn fetch_latest(&self) -> anyhow::Result<Vec<LogEntry>> {
        self.fetch(None).await
    }

    async fn fetch_newer_than(&self, watermark: DateTime<Utc>) -> anyhow::Result<Vec<LogEntry>> {
        self.fetch(Some(watermark)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Mutex;

    fn entry(id: i64, offset_secs: i64) -> LogEntry {
        LogEntry {
            id,
            level: LogLevel::Info,
            message: format!("entry {}", id),
            created_at: Utc.with_ymd_and_hms(2025, 8, 6, 10, 0, 0).unwrap()
                + chrono::Duration::seconds(offset_secs),
        }
    }

    /// Serves canned batches in order and records the watermarks it was
    /// asked about.
    struct FakeSource {
        batches: Mutex<VecDeque<anyhow::Result<Vec<LogEntry>>>>,
        requests: Mutex<Vec<Option<DateTime<Utc>>>>,
    }

    impl FakeSource {
        fn new(batches: Vec<anyhow::Result<Vec<LogEntry>>>) -> Self {
            Self {
                batches: Mutex::new(batches.into_iter().collect()),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn next_batch(&self, watermark: Option<DateTime<Utc>>) -> anyhow::Result<Vec<LogEntry>> {
            self.requests.lock().unwrap().push(watermark);
            self.batches
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    impl LogSource for FakeSource {
        async fn fetch_latest(&self) -> anyhow::Result<Vec<LogEntry>> {
            self.next_batch(None)
        }

        async fn fetch_newer_than(
            &self,
            watermark: DateTime<Utc>,
        ) -> anyhow::Result<Vec<LogEntry>> {
            self.next_batch(Some(watermark))
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        notified: Vec<i64>,
    }

    impl Notifier for RecordingNotifier {
        fn notify(&mut self, entry: &LogEntry) {
            self.notified.push(entry.id);
        }
    }

    #[tokio::test]
    async fn test_first_tick_notifies_oldest_first() {
        // Server returns newest-first: [L3, L2, L1]
        let source = FakeSource::new(vec![Ok(vec![entry(3, 30), entry(2, 20), entry(1, 10)])]);
        let mut notifier = RecordingNotifier::default();
        let mut feed = LogFeed::new();

        let notified = feed.tick(&source, &mut notifier).await;

        assert_eq!(notified, 3);
        assert_eq!(notifier.notified, vec![1, 2, 3]);
        // In-memory list stays newest-first
        let ids: Vec<i64> = feed.entries().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![3, 2, 1]);
    }

    #[tokio::test]
    async fn test_refetched_entry_is_not_renotified() {
        let source = FakeSource::new(vec![
            Ok(vec![entry(3, 30), entry(2, 20), entry(1, 10)]),
            Ok(vec![entry(3, 30)]),
        ]);
        let mut notifier = RecordingNotifier::default();
        let mut feed = LogFeed::new();

        feed.tick(&source, &mut notifier).await;
        let second = feed.tick(&source, &mut notifier).await;

        assert_eq!(second, 0);
        assert_eq!(notifier.notified, vec![1, 2, 3]);
        assert_eq!(feed.entries().len(), 3);
    }

    #[tokio::test]
    async fn test_never_notifies_twice_across_many_ticks() {
        let batch = vec![entry(3, 30), entry(2, 20), entry(1, 10)];
        let source = FakeSource::new(vec![
            Ok(batch.clone()),
            Ok(batch.clone()),
            Ok(batch.clone()),
            Ok(batch.clone()),
            Ok(batch),
        ]);
        let mut notifier = RecordingNotifier::default();
        let mut feed = LogFeed::new();

        for _ in 0..5 {
            feed.tick(&source, &mut notifier).await;
        }

        assert_eq!(notifier.notified, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_second_tick_asks_for_strictly_newer_entries() {
        let source = FakeSource::new(vec![
            Ok(vec![entry(3, 30), entry(2, 20), entry(1, 10)]),
            Ok(vec![]),
        ]);
        let mut notifier = RecordingNotifier::default();
        let mut feed = LogFeed::new();

        feed.tick(&source, &mut notifier).await;
        feed.tick(&source, &mut notifier).await;

        let requests = source.requests.lock().unwrap();
        assert_eq!(requests[0], None);
        assert_eq!(requests[1], Some(entry(3, 30).created_at));
    }

    #[tokio::test]
    async fn test_new_entries_are_prepended() {
        let source = FakeSource::new(vec![
            Ok(vec![entry(2, 20), entry(1, 10)]),
            Ok(vec![entry(4, 40), entry(3, 30)]),
        ]);
        let mut notifier = RecordingNotifier::default();
        let mut feed = LogFeed::new();

        feed.tick(&source, &mut notifier).await;
        feed.tick(&source, &mut notifier).await;

        let ids: Vec<i64> = feed.entries().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![4, 3, 2, 1]);
        assert_eq!(notifier.notified, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_fetch_error_is_swallowed_and_next_tick_retries() {
        let source = FakeSource::new(vec![
            Err(anyhow::anyhow!("connection refused")),
            Ok(vec![entry(1, 10)]),
        ]);
        let mut notifier = RecordingNotifier::default();
        let mut feed = LogFeed::new();

        assert_eq!(feed.tick(&source, &mut notifier).await, 0);
        assert!(feed.entries().is_empty());

        assert_eq!(feed.tick(&source, &mut notifier).await, 1);
        assert_eq!(notifier.notified, vec![1]);
    }

    #[tokio::test]
    async fn test_seen_set_is_bounded() {
        let mut seen = SeenSet::new(2);
        assert!(seen.insert(1));
        assert!(seen.insert(2));
        assert!(seen.insert(3));
        // 1 was evicted, so it counts as fresh again
        assert!(seen.insert(1));
        assert!(!seen.insert(3));
        assert!(seen.ids.len() <= 2);
    }
}
