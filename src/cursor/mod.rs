//! # Cursor Registry
//!
//! Parks a paused pipeline under a monotonic cursor id and resumes it on
//! `CURSOR READ`. Ids are never reused while the process lives. A cursor
//! dies three ways: drained (the pipeline hit Eof), explicitly closed, or
//! idle past its `MAXIDLE` — the latter enforced by a single coarse reaper
//! thread that samples the table at a quarter of the smallest idle bound,
//! never with per-cursor timers.
//!
//! A read and a reap race atomically on the table lock: whoever removes
//! the entry first wins, and a resumed cursor gets its idle clock reset
//! when it is parked again.

use crate::error::{QueryError, QueryResult};
use crate::pipeline::Pipeline;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::debug;

/// Default idle bound when `MAXIDLE` is not given.
pub const DEFAULT_MAX_IDLE: Duration = Duration::from_millis(300_000);

/// A parked pipeline with its bookkeeping.
pub struct ParkedCursor {
    pub id: u64,
    pub index: String,
    pub pipeline: Pipeline,
    pub last_access: Instant,
    pub max_idle: Duration,
}

impl std::fmt::Debug for ParkedCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParkedCursor")
            .field("id", &self.id)
            .field("index", &self.index)
            .field("last_access", &self.last_access)
            .field("max_idle", &self.max_idle)
            .finish_non_exhaustive()
    }
}

pub struct CursorRegistry {
    table: Mutex<HashMap<u64, ParkedCursor>>,
    next_id: AtomicU64,
    max_cursors: usize,
    reaper_stop: Arc<AtomicBool>,
}

impl CursorRegistry {
    pub fn new(max_cursors: usize) -> Self {
        CursorRegistry {
            table: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            max_cursors,
            reaper_stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Park a fresh cursor; fails with `Limit` at the table cap.
    pub fn park(
        &self,
        index: &str,
        pipeline: Pipeline,
        max_idle: Option<Duration>,
    ) -> QueryResult<u64> {
        let mut table = self.table.lock();
        if table.len() >= self.max_cursors {
            return Err(QueryError::Limit(format!(
                "maximum of {} open cursors reached",
                self.max_cursors
            )));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        table.insert(
            id,
            ParkedCursor {
                id,
                index: index.to_string(),
                pipeline,
                last_access: Instant::now(),
                max_idle: max_idle.unwrap_or(DEFAULT_MAX_IDLE),
            },
        );
        Ok(id)
    }

    /// Remove a cursor for resumption. The caller either re-parks it or
    /// lets it drop.
    pub fn take(&self, id: u64) -> QueryResult<ParkedCursor> {
        self.table
            .lock()
            .remove(&id)
            .ok_or(QueryError::NoCursor(id))
    }

    /// Park a resumed cursor again, idle clock reset.
    pub fn repark(&self, mut cursor: ParkedCursor) {
        cursor.last_access = Instant::now();
        self.table.lock().insert(cursor.id, cursor);
    }

    /// Explicit `CURSOR DEL`.
    pub fn delete(&self, id: u64) -> QueryResult<()> {
        self.table
            .lock()
            .remove(&id)
            .map(|_| ())
            .ok_or(QueryError::NoCursor(id))
    }

    /// Drop every cursor idle past its bound; returns how many died.
    pub fn reap_idle(&self) -> usize {
        let now = Instant::now();
        let mut table = self.table.lock();
        let before = table.len();
        table.retain(|id, cursor| {
            let keep = now.duration_since(cursor.last_access) <= cursor.max_idle;
            if !keep {
                debug!(cursor = id, "reaping idle cursor");
            }
            keep
        });
        before - table.len()
    }

    /// Sampling interval: a quarter of the smallest idle bound in the
    /// table, clamped to something coarse.
    fn reap_interval(&self) -> Duration {
        let table = self.table.lock();
        let smallest = table
            .values()
            .map(|c| c.max_idle)
            .min()
            .unwrap_or(DEFAULT_MAX_IDLE);
        (smallest / 4).clamp(Duration::from_millis(25), Duration::from_millis(250))
    }

    /// Start the single reaper thread. The thread holds a weak handle so
    /// it dies with the registry.
    pub fn spawn_reaper(registry: &Arc<CursorRegistry>) {
        let weak: Weak<CursorRegistry> = Arc::downgrade(registry);
        let stop = Arc::clone(&registry.reaper_stop);
        std::thread::Builder::new()
            .name("cursor-reaper".to_string())
            .spawn(move || loop {
                let interval = match weak.upgrade() {
                    Some(registry) => registry.reap_interval(),
                    None => return,
                };
                std::thread::sleep(interval);
                if stop.load(Ordering::Relaxed) {
                    return;
                }
                let Some(registry) = weak.upgrade() else {
                    return;
                };
                registry.reap_idle();
            })
            .expect("spawn cursor reaper");
    }

    /// Ask a running reaper to exit after its current sleep.
    pub fn stop_reaper(&self) {
        self.reaper_stop.store(true, Ordering::Relaxed);
    }
}

impl Drop for CursorRegistry {
    fn drop(&mut self) {
        self.stop_reaper();
    }
}
