//! Cursored change-feed polling over `SHOW CHANGES`.
//!
//! Stateless: the only state is the cursor, a monotonically non-decreasing
//! versionstamp meaning "everything before this has been observed". The
//! server-side changefeed must be defined on the table first
//! (`DEFINE TABLE <t> CHANGEFEED <retention>`).

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use surrealix_proto::Value;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::connection::Surreal;
use crate::error::{Error, Result};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// One action-tagged entry inside a change row.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEntry {
    Create(Value),
    Update(Value),
    Delete(Value),
    /// Schema descriptor emitted when the table definition changes;
    /// consumers skip these.
    DefineTable(Value),
    Other(Value),
}

impl ChangeEntry {
    fn from_value(value: Value) -> Self {
        if let Some(map) = value.as_object() {
            if let Some(record) = map.get("create") {
                return ChangeEntry::Create(record.clone());
            }
            if let Some(record) = map.get("update") {
                return ChangeEntry::Update(record.clone());
            }
            if let Some(record) = map.get("delete") {
                return ChangeEntry::Delete(record.clone());
            }
            if let Some(def) = map.get("define_table") {
                return ChangeEntry::DefineTable(def.clone());
            }
        }
        ChangeEntry::Other(value)
    }

    pub fn is_schema(&self) -> bool { matches!(self, ChangeEntry::DefineTable(_)) }

    /// The affected record id, when the entry carries one.
    pub fn record_id(&self) -> Option<String> {
        match self {
            ChangeEntry::Create(record) | ChangeEntry::Update(record) | ChangeEntry::Delete(record) => {
                record.get("id").and_then(Value::record_id_string)
            }
            _ => None,
        }
    }
}

/// One change-feed row: a versionstamp and the mutations it covers.
#[derive(Debug, Clone, PartialEq)]
pub struct TableChange {
    pub versionstamp: Option<String>,
    pub changes: Vec<ChangeEntry>,
    pub raw: Value,
}

impl TableChange {
    pub fn from_value(value: Value) -> Self {
        let versionstamp = match value.get("versionstamp") {
            Some(Value::Int(v)) => Some(v.to_string()),
            Some(Value::Strand(v)) => Some(v.clone()),
            _ => None,
        };
        let changes = value
            .get("changes")
            .and_then(Value::as_array)
            .map(|items| items.iter().cloned().map(ChangeEntry::from_value).collect())
            .unwrap_or_default();
        Self { versionstamp, changes, raw: value }
    }
}

fn now_cursor() -> String { Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true) }

/// Polling streamer for one table's change feed.
pub struct ChangeFeedStream {
    conn: Arc<dyn Surreal>,
    table: String,
    poll_interval: Duration,
    batch_size: usize,
    cursor: Option<String>,
    buffer: VecDeque<TableChange>,
    stopped: bool,
}

impl ChangeFeedStream {
    pub fn new(conn: Arc<dyn Surreal>, table: impl Into<String>) -> Self {
        Self {
            conn,
            table: table.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            batch_size: DEFAULT_BATCH_SIZE,
            cursor: None,
            buffer: VecDeque::new(),
            stopped: false,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Start from a caller-supplied point (ISO timestamp or versionstamp)
    /// instead of the current server time.
    pub fn since(mut self, since: impl Into<String>) -> Self {
        self.cursor = Some(since.into());
        self
    }

    /// Current position: everything before it has been observed.
    pub fn cursor(&self) -> Option<&str> { self.cursor.as_deref() }

    /// One-shot DDL defining the changefeed with the given retention
    /// (`1h`, `7d`, ...).
    pub async fn define_changefeed(&self, retention: &str) -> Result<()> {
        let sql = format!("DEFINE TABLE {} CHANGEFEED {}", self.table, retention);
        self.conn
            .query(&sql, BTreeMap::new())
            .await
            .map_err(|e| Error::ChangeFeed(format!("failed to define change feed: {e}")))?;
        Ok(())
    }

    /// Fetch changes after `since` (defaulting to the cursor, then to now).
    pub async fn get_changes(&self, since: Option<&str>, limit: Option<usize>) -> Result<Vec<TableChange>> {
        let since = since
            .map(str::to_owned)
            .or_else(|| self.cursor.clone())
            .unwrap_or_else(now_cursor);
        let limit = limit.unwrap_or(self.batch_size);

        let sql = format!("SHOW CHANGES FOR TABLE {} SINCE '{}' LIMIT {}", self.table, since, limit);
        let response = self
            .conn
            .query(&sql, BTreeMap::new())
            .await
            .map_err(|e| Error::ChangeFeed(format!("failed to get changes: {e}")))?;

        let Some(result) = response.first_result() else { return Ok(Vec::new()) };
        if !result.is_ok() {
            return Err(Error::ChangeFeed(format!("change feed query rejected: {:?}", result.result)));
        }
        Ok(match &result.result {
            Value::Array(items) => items.iter().cloned().map(TableChange::from_value).collect(),
            Value::Object(_) => vec![TableChange::from_value(result.result.clone())],
            _ => Vec::new(),
        })
    }

    fn ensure_cursor(&mut self) {
        if self.cursor.is_none() {
            self.cursor = Some(now_cursor());
        }
    }

    fn advance_cursor(&mut self, change: &TableChange) {
        if let Some(versionstamp) = &change.versionstamp {
            self.cursor = Some(versionstamp.clone());
        }
    }

    /// Yield the next change, polling and sleeping as needed. The cursor
    /// advances to each yielded change's versionstamp, so a restart resumes
    /// exactly after the last delivered change. Transient poll errors are
    /// logged and retried. Every await is a cancellation point.
    pub async fn next(&mut self) -> Option<TableChange> {
        self.ensure_cursor();
        loop {
            if self.stopped {
                return None;
            }
            if let Some(change) = self.buffer.pop_front() {
                self.advance_cursor(&change);
                return Some(change);
            }
            match self.get_changes(None, None).await {
                Ok(changes) if changes.is_empty() => sleep(self.poll_interval).await,
                Ok(changes) => self.buffer.extend(changes),
                Err(e) => {
                    warn!(table = %self.table, "change feed poll failed, retrying: {e}");
                    sleep(self.poll_interval).await;
                }
            }
        }
    }

    /// Batch variant of [`ChangeFeedStream::next`]; the cursor advances to
    /// the last change of each yielded batch.
    pub async fn next_batch(&mut self) -> Option<Vec<TableChange>> {
        self.ensure_cursor();
        loop {
            if self.stopped {
                return None;
            }
            if !self.buffer.is_empty() {
                let batch: Vec<TableChange> = self.buffer.drain(..).collect();
                if let Some(last) = batch.last() {
                    self.advance_cursor(last);
                }
                return Some(batch);
            }
            match self.get_changes(None, None).await {
                Ok(changes) if changes.is_empty() => sleep(self.poll_interval).await,
                Ok(changes) => self.buffer.extend(changes),
                Err(e) => {
                    warn!(table = %self.table, "change feed poll failed, retrying: {e}");
                    sleep(self.poll_interval).await;
                }
            }
        }
    }

    /// End the stream; `next` returns `None` afterwards.
    pub fn stop(&mut self) { self.stopped = true }
}

/// Round-robin merge of several tables' change feeds.
///
/// No cross-table ordering is promised; within one table the per-stream
/// cursor guarantees hold.
pub struct MultiTableChangeFeed {
    streams: Vec<ChangeFeedStream>,
    buffer: VecDeque<(usize, TableChange)>,
    poll_interval: Duration,
    stopped: bool,
}

impl MultiTableChangeFeed {
    pub fn new(conn: Arc<dyn Surreal>, tables: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let streams: Vec<ChangeFeedStream> =
            tables.into_iter().map(|table| ChangeFeedStream::new(conn.clone(), table)).collect();
        Self { streams, buffer: VecDeque::new(), poll_interval: DEFAULT_POLL_INTERVAL, stopped: false }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Yield the next `(table, change)` pair from any feed.
    pub async fn next(&mut self) -> Option<(String, TableChange)> {
        for stream in &mut self.streams {
            stream.ensure_cursor();
        }
        loop {
            if self.stopped {
                return None;
            }
            if let Some((idx, change)) = self.buffer.pop_front() {
                self.streams[idx].advance_cursor(&change);
                return Some((self.streams[idx].table.clone(), change));
            }

            let mut fetched_any = false;
            for idx in 0..self.streams.len() {
                match self.streams[idx].get_changes(None, None).await {
                    Ok(changes) => {
                        for change in changes {
                            self.buffer.push_back((idx, change));
                            fetched_any = true;
                        }
                    }
                    Err(e) => {
                        debug!(table = %self.streams[idx].table, "multi-table poll failed: {e}");
                    }
                }
            }
            if !fetched_any {
                sleep(self.poll_interval).await;
            }
        }
    }

    pub fn stop(&mut self) {
        self.stopped = true;
        for stream in &mut self.streams {
            stream.stop();
        }
    }
}
