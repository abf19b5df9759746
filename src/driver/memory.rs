//! In-process driver.
//!
//! A [`MemoryCluster`] answers statements from registered result fixtures.
//! It pages, reports trace ids, and runs scripted failures through the
//! statement's retry strategy the way a real cluster and driver would, so
//! everything above the driver seam can be exercised without a server.
//!
//! ```rust,ignore
//! let driver = MemoryDriver::new();
//! driver.cluster().respond(
//!     "SELECT * FROM users",
//!     vec![ColumnSpec::new("id", ColumnType::Int)],
//!     vec![NativeRow::new(vec![Some(CqlValue::Int(1))])],
//! );
//! ```

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use super::{ColumnSpec, Driver, NativeResult, NativeRow, Session};
use crate::config::ClusterOptions;
use crate::error::{ClientError, ClientResult, ExecutionError};
use crate::options::{Consistency, SerialConsistency};
use crate::retry::RetryDecision;
use crate::statement::Statement;
use crate::value::Value;

/// Level used when a statement does not set one.
pub const DEFAULT_CONSISTENCY: Consistency = Consistency::LocalOne;

/// One statement as the cluster received it.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutedStatement {
    pub query: String,
    pub values: Vec<Value>,
    /// Level of the final attempt.
    pub consistency: Consistency,
    pub serial_consistency: Option<SerialConsistency>,
    pub page_size: i32,
    pub timestamp: Option<i64>,
    pub tracing: bool,
    pub idempotent: bool,
    /// Attempts made, retries included.
    pub attempts: u32,
}

#[derive(Debug, Clone)]
struct Fixture {
    columns: Vec<ColumnSpec>,
    rows: Vec<NativeRow>,
}

#[derive(Debug, Default)]
struct ClusterState {
    keyspaces: HashSet<String>,
    fixtures: HashMap<String, Fixture>,
    failures: HashMap<String, VecDeque<ExecutionError>>,
    executed: Vec<ExecutedStatement>,
    connect_failures: usize,
}

/// Shared state of the in-process cluster.
#[derive(Debug, Default)]
pub struct MemoryCluster {
    state: Mutex<ClusterState>,
    connects: AtomicUsize,
    open_sessions: AtomicUsize,
}

impl MemoryCluster {
    /// A cluster with the `system` keyspace.
    pub fn new() -> Self {
        let cluster = Self::default();
        cluster.create_keyspace("system");
        cluster
    }

    fn lock(&self) -> MutexGuard<'_, ClusterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn create_keyspace(&self, name: &str) {
        self.lock().keyspaces.insert(name.to_string());
    }

    /// Answer `query` with these rows, paged by the statement's page size.
    pub fn respond(&self, query: &str, columns: Vec<ColumnSpec>, rows: Vec<NativeRow>) {
        self.lock()
            .fixtures
            .insert(normalize(query), Fixture { columns, rows });
    }

    /// Fail the next attempts of `query` with these errors, in order.
    pub fn fail_next(&self, query: &str, errors: impl IntoIterator<Item = ExecutionError>) {
        self.lock()
            .failures
            .entry(normalize(query))
            .or_default()
            .extend(errors);
    }

    /// Refuse the next `n` connection attempts.
    pub fn refuse_connects(&self, n: usize) {
        self.lock().connect_failures = n;
    }

    /// Connection attempts so far, failed ones included.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::Acquire)
    }

    /// Sessions opened and not yet closed.
    pub fn open_sessions(&self) -> usize {
        self.open_sessions.load(Ordering::Acquire)
    }

    /// Statements received so far, oldest first.
    pub fn executed(&self) -> Vec<ExecutedStatement> {
        self.lock().executed.clone()
    }

    fn connect(&self, options: &ClusterOptions) -> ClientResult<()> {
        self.connects.fetch_add(1, Ordering::AcqRel);
        let mut state = self.lock();
        if state.connect_failures > 0 {
            state.connect_failures -= 1;
            return Err(ClientError::Connection(format!(
                "All host(s) tried for query failed: {}",
                options
                    .contact_points
                    .iter()
                    .map(|p| p.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }
        if let Some(keyspace) = &options.keyspace {
            if !state.keyspaces.contains(keyspace) {
                return Err(ClientError::Connection(format!(
                    "Keyspace '{}' does not exist",
                    keyspace
                )));
            }
        }
        self.open_sessions.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn execute(&self, statement: Statement) -> Result<NativeResult, ExecutionError> {
        let key = normalize(&statement.query);
        let requested = statement.consistency.unwrap_or(DEFAULT_CONSISTENCY);
        let mut state = self.lock();

        let mut consistency = requested;
        let mut retries = 0;
        let mut outcome = None;
        loop {
            let failure = state.failures.get_mut(&key).and_then(VecDeque::pop_front);
            let Some(error) = failure else {
                break;
            };
            match statement.retry.decide(&error, retries, statement.idempotent) {
                RetryDecision::Retry(level) => {
                    debug!(query = %key, ?level, "retrying after: {}", error);
                    retries += 1;
                    consistency = level;
                }
                RetryDecision::Rethrow => {
                    outcome = Some(Err(error));
                    break;
                }
                RetryDecision::Ignore => {
                    outcome = Some(Ok(NativeResult::void()));
                    break;
                }
            }
        }

        state.executed.push(ExecutedStatement {
            query: statement.query.clone(),
            values: statement.values.clone(),
            consistency,
            serial_consistency: statement.serial_consistency,
            page_size: statement.page_size,
            timestamp: statement.timestamp,
            tracing: statement.tracing,
            idempotent: statement.idempotent,
            attempts: retries + 1,
        });

        let mut result = match outcome {
            Some(outcome) => outcome?,
            None => match state.fixtures.get(&key) {
                Some(fixture) => page(&key, fixture, &statement)?,
                None => NativeResult::void(),
            },
        };
        if consistency != requested {
            result.achieved_consistency = Some(consistency);
        }
        if statement.tracing {
            result.tracing_id = Some(Uuid::new_v4());
        }
        Ok(result)
    }
}

/// Cut the page starting at the statement's paging state.
fn page(key: &str, fixture: &Fixture, statement: &Statement) -> Result<NativeResult, ExecutionError> {
    let offset = match &statement.paging_state {
        Some(raw) => decode_paging_state(key, raw)?,
        None => 0,
    };
    let page_size = statement.page_size.max(1) as usize;
    let end = (offset + page_size).min(fixture.rows.len());
    let rows = fixture.rows.get(offset..end).unwrap_or_default().to_vec();
    let paging_state = (end < fixture.rows.len()).then(|| encode_paging_state(key, end));

    Ok(NativeResult {
        columns: fixture.columns.clone(),
        rows,
        paging_state,
        ..NativeResult::default()
    })
}

fn fingerprint(key: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

fn encode_paging_state(key: &str, offset: usize) -> Vec<u8> {
    let mut raw = Vec::with_capacity(16);
    raw.extend_from_slice(&fingerprint(key).to_be_bytes());
    raw.extend_from_slice(&(offset as u64).to_be_bytes());
    raw
}

fn decode_paging_state(key: &str, raw: &[u8]) -> Result<usize, ExecutionError> {
    let malformed =
        || ExecutionError::InvalidPagingState(format!("expected 16 bytes, got {}", raw.len()));
    if raw.len() != 16 {
        return Err(malformed());
    }
    let (print, offset) = raw.split_at(8);
    let print = u64::from_be_bytes(print.try_into().map_err(|_| malformed())?);
    let offset = u64::from_be_bytes(offset.try_into().map_err(|_| malformed())?);
    if print != fingerprint(key) {
        return Err(ExecutionError::InvalidPagingState(
            "paging state was produced by a different statement".into(),
        ));
    }
    Ok(offset as usize)
}

/// Statements that differ only in surrounding or repeated whitespace and a
/// trailing semicolon are the same statement.
fn normalize(query: &str) -> String {
    query
        .trim()
        .trim_end_matches(';')
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Driver backed by a [`MemoryCluster`].
#[derive(Debug, Clone)]
pub struct MemoryDriver {
    cluster: Arc<MemoryCluster>,
}

impl Default for MemoryDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::with_cluster(Arc::new(MemoryCluster::new()))
    }

    pub fn with_cluster(cluster: Arc<MemoryCluster>) -> Self {
        Self { cluster }
    }

    pub fn cluster(&self) -> &Arc<MemoryCluster> {
        &self.cluster
    }
}

/// Session on a [`MemoryCluster`].
#[derive(Debug)]
pub struct MemorySession {
    cluster: Arc<MemoryCluster>,
    closed: AtomicBool,
}

#[async_trait]
impl Driver for MemoryDriver {
    type Session = MemorySession;

    async fn connect(&self, options: &ClusterOptions) -> ClientResult<MemorySession> {
        self.cluster.connect(options)?;
        Ok(MemorySession {
            cluster: self.cluster.clone(),
            closed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl Session for MemorySession {
    async fn execute(&self, statement: Statement) -> Result<NativeResult, ExecutionError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ExecutionError::Aborted("session is closed".into()));
        }
        // Completions arrive later than submission, like network I/O.
        tokio::task::yield_now().await;
        self.cluster.execute(statement)
    }

    async fn close(&self) -> ClientResult<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.cluster.open_sessions.fetch_sub(1, Ordering::AcqRel);
        }
        Ok(())
    }
}
