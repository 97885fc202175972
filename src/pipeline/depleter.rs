//! Depleter processor: background upstream prefetch.
//!
//! Runs its upstream chain on a worker-pool thread, buffering results into
//! a bounded SPSC queue, and re-emits them in exact upstream order. Used
//! by hybrid branches to overlap I/O. The worker observes cancellation
//! through the shared execution context it carries; a dropped consumer
//! unblocks it through the closed channel.

use super::{deadline_status, ExecContext, ResultProcessor, RpResult, RpStatus, RpType, SearchResult};
use crate::error::QueryError;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use std::sync::LazyLock;
use std::time::Duration;

/// Default bound for the prefetch queue; see
/// `PipelineConfig::depleter_queue_depth`.
pub const DEFAULT_QUEUE_DEPTH: usize = 16;

/// Dedicated worker pool for depleted branches, one thread per core.
///
/// Depleter workers block on their bounded queues under backpressure;
/// giving them their own pool keeps those stalls away from anything else
/// scheduled on rayon's global pool.
static DEPLETER_POOL: LazyLock<rayon::ThreadPool> = LazyLock::new(|| {
    rayon::ThreadPoolBuilder::new()
        .num_threads(num_cpus::get().max(2))
        .thread_name(|i| format!("depleter-{i}"))
        .build()
        .expect("depleter pool construction")
});

enum Msg {
    Result(Box<SearchResult>),
    Done(RpStatus),
    Failed(QueryError),
}

pub struct RpDepleter {
    rx: Receiver<Msg>,
    finished: bool,
}

impl RpDepleter {
    /// Move `upstream` onto the depleter pool and start depleting it.
    ///
    /// The context is cloned into the worker so deadline checks inside the
    /// moved chain observe the same cancellation flag as the consumer.
    pub fn spawn(upstream: Box<dyn ResultProcessor>, cx: ExecContext, queue_depth: usize) -> Self {
        let (tx, rx) = bounded(queue_depth.max(1));
        let mut upstream = upstream;
        DEPLETER_POOL.spawn(move || {
            loop {
                let mut res = SearchResult::new();
                match upstream.next(&cx, &mut res) {
                    Ok(RpStatus::Ok) => {
                        // blocks when the queue is full; consumer gone
                        // means the pipeline was freed, so just stop
                        if tx.send(Msg::Result(Box::new(res))).is_err() {
                            return;
                        }
                    }
                    Ok(status) => {
                        let _ = tx.send(Msg::Done(status));
                        return;
                    }
                    Err(err) => {
                        let _ = tx.send(Msg::Failed(err));
                        return;
                    }
                }
            }
        });
        RpDepleter { rx, finished: false }
    }
}

const RECV_TICK: Duration = Duration::from_millis(10);

impl ResultProcessor for RpDepleter {
    fn rp_type(&self) -> RpType {
        RpType::Depleter
    }

    fn next(&mut self, cx: &ExecContext, out: &mut SearchResult) -> RpResult {
        if self.finished {
            return Ok(RpStatus::Eof);
        }
        loop {
            match self.rx.recv_timeout(RECV_TICK) {
                Ok(Msg::Result(res)) => {
                    *out = *res;
                    return Ok(RpStatus::Ok);
                }
                Ok(Msg::Done(status)) => {
                    self.finished = true;
                    return Ok(status);
                }
                Ok(Msg::Failed(err)) => {
                    self.finished = true;
                    return Err(err);
                }
                Err(RecvTimeoutError::Timeout) => {
                    // keep waiting unless our own deadline fired
                    if let Some(status) = deadline_status(cx) {
                        self.finished = true;
                        return Ok(status);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    self.finished = true;
                    return Err(QueryError::Internal(
                        "depleter worker exited without a final status".to_string(),
                    ));
                }
            }
        }
    }
}
