//! Concurrent fan-out / fan-in over a phase's workers.

use crate::errors::WorkerError;
use crate::phase::Phase;
use crate::worker::{DomainInput, Worker, WorkerOutput};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Per-call options for [`fan_out`].
#[derive(Debug, Clone, Default)]
pub struct FanOutOptions {
    /// Limit applied to each worker call individually.
    pub timeout: Option<Duration>,
    /// Cancels every in-flight worker when triggered.
    pub cancel: CancellationToken,
}

impl FanOutOptions {
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Run every worker concurrently and merge the outputs in registration order.
///
/// The first failure (error, timeout or panic) aborts all sibling tasks and
/// fails the whole call; partial results are never returned.
pub async fn fan_out(
    phase: Phase,
    workers: &[Arc<dyn Worker>],
    input: Arc<DomainInput>,
    prior: Arc<Vec<WorkerOutput>>,
    options: &FanOutOptions,
) -> Result<Vec<WorkerOutput>, WorkerError> {
    if workers.is_empty() {
        return Ok(Vec::new());
    }

    let mut join_set = JoinSet::new();
    let mut task_slots = HashMap::with_capacity(workers.len());
    let roles: Vec<String> = workers.iter().map(|w| w.role().to_string()).collect();

    for (index, worker) in workers.iter().enumerate() {
        let worker = Arc::clone(worker);
        let input = Arc::clone(&input);
        let prior = Arc::clone(&prior);
        let timeout = options.timeout;

        let handle = join_set.spawn(async move {
            let call = worker.execute(&input, &prior);
            let result = match timeout {
                Some(limit) => match tokio::time::timeout(limit, call).await {
                    Ok(result) => result,
                    Err(_) => Err(WorkerError::TimedOut {
                        role: worker.role().to_string(),
                        timeout: limit,
                    }),
                },
                None => call.await,
            };
            (index, result)
        });
        task_slots.insert(handle.id(), index);
    }

    tracing::debug!(%phase, workers = ?roles, "fanned out workers");

    let mut slots: Vec<Option<WorkerOutput>> = vec![None; workers.len()];

    loop {
        let joined = tokio::select! {
            biased;
            _ = options.cancel.cancelled() => {
                join_set.abort_all();
                tracing::info!(%phase, "fan-out cancelled, aborted sibling workers");
                return Err(WorkerError::Cancelled);
            }
            joined = join_set.join_next() => joined,
        };

        let Some(joined) = joined else {
            break;
        };

        match joined {
            Ok((index, Ok(output))) => {
                tracing::debug!(%phase, role = %roles[index], "worker finished");
                slots[index] = Some(output.stamped(phase));
            }
            Ok((index, Err(err))) => {
                join_set.abort_all();
                tracing::warn!(%phase, role = %roles[index], error = %err, "worker failed, failing phase");
                return Err(err);
            }
            Err(join_err) => {
                join_set.abort_all();
                let role = task_slots
                    .get(&join_err.id())
                    .map(|i| roles[*i].clone())
                    .unwrap_or_else(|| "unknown".to_string());
                return Err(WorkerError::Aborted {
                    role,
                    message: join_err.to_string(),
                });
            }
        }
    }

    Ok(slots.into_iter().flatten().collect())
}
