use tokio::task::JoinHandle;
use tokio::time::Instant;
use typed_builder::TypedBuilder;

use super::{Execution, Executor};
use crate::{aggregate::Aggregate, error::VolleyError, metric::Dispatch, scenario::Scenario};
use internals::*;

use futures::future::join_all;
use std::{future::Future, time::Duration};

/// Executor for one concurrency level.
///
/// Spawns `concurrency` worker tasks, holds them behind a start barrier and
/// releases them together. Each worker issues `rounds` requests back to back and
/// keeps its own aggregate; nothing is shared between workers until they are joined.
///
/// Request ids are 1-based and contiguous per client: client `c` owns
/// `c * rounds + 1 ..= c * rounds + rounds`.
#[derive(Debug, Clone, TypedBuilder)]
pub struct BarrierExecutor {
    /// Concurrency level, used in every [`Dispatch`].
    pub level: usize,
    /// Number of simultaneous clients.
    pub concurrency: usize,
    /// Requests per client.
    #[builder(default = 1)]
    pub rounds: usize,
    /// Upper bound on waiting for all workers to park before release.
    #[builder(default = Duration::from_millis(250))]
    pub settle: Duration,
}

impl BarrierExecutor {
    /// Dispatches owned by client `client` (0-based).
    pub fn dispatches(&self, client: usize) -> Vec<Dispatch> {
        (1..=self.rounds)
            .map(|round| Dispatch {
                level: self.level,
                request_id: client * self.rounds + round,
            })
            .collect()
    }
}

impl<A, F, Fut> Executor<A, F, Fut> for BarrierExecutor
where
    Self: Send + Sync + Sized,
    A: Aggregate + 'static,
    F: Fn(Dispatch) -> Fut + Send + Sync + Clone + 'static,
    Fut: Future<Output = A::Metric> + Send + 'static,
{
    type Error = VolleyError;

    async fn exec(&self, scenario: &Scenario<A, F, Fut>) -> Result<Execution<A>, Self::Error> {
        if self.concurrency == 0 || self.rounds == 0 {
            return Err(VolleyError::InvalidConfig(format!(
                "level {} needs at least one client and one round (got {} clients, {} rounds)",
                self.level, self.concurrency, self.rounds
            )));
        }

        let (ctx, gate) = ExecutionContext::new(self.concurrency);
        tracing::debug!("Spawning {} workers for level {}...", self.concurrency, self.level);
        let handles = spawn_workers(
            ctx,
            (0..self.concurrency).map(|c| self.dispatches(c)).collect(),
            scenario.action.clone(),
        );

        let released_at = gate.release(self.concurrency, self.settle).await;
        tracing::info!(
            "Level {}: released {} clients ({})",
            self.level,
            self.concurrency,
            scenario.name
        );

        let mut aggregate = A::new();
        let mut finished_at = released_at;
        for (client, res) in join_all(handles).await.into_iter().enumerate() {
            match res {
                Ok(done) => {
                    finished_at = finished_at.max(done.finished_at);
                    aggregate.merge(done.aggregate);
                }
                Err(e) => {
                    tracing::error!("Worker {client} on level {} vanished: {e}", self.level);
                    // Its partial results died with it; account for every dispatch it owned
                    finished_at = finished_at.max(Instant::now());
                    for dispatch in self.dispatches(client) {
                        aggregate.record_lost(&dispatch);
                    }
                }
            }
        }

        tracing::debug!("Level {} joined all workers", self.level);
        Ok(Execution {
            concurrency: self.concurrency,
            dispatched: self.concurrency * self.rounds,
            aggregate,
            released_at,
            finished_at,
        })
    }
}

#[cfg(feature = "internals")]
pub use internals::*;

/// Barrier and worker plumbing for the `BarrierExecutor`.
/// Encapsulated in a module to allow conditional exposure via `#[cfg(feature = "internals")]`.
mod internals {
    use super::*;
    use tokio::sync::{
        mpsc,
        watch::{self, Receiver, Sender},
    };

    /// Worker-side half of the start barrier.
    #[derive(Clone)]
    pub struct ExecutionContext {
        /// Flips to `true` exactly once, on release.
        pub release: Receiver<bool>,
        /// Each worker sends one message once it is waiting on `release`.
        pub parked: mpsc::Sender<()>,
    }

    /// Runner-side half of the start barrier.
    pub struct StartGate {
        release: Sender<bool>,
        parked: mpsc::Receiver<()>,
    }

    impl ExecutionContext {
        pub fn new(workers: usize) -> (Self, StartGate) {
            let (release_tx, release_rx) = watch::channel(false);
            let (parked_tx, parked_rx) = mpsc::channel(workers.max(1));
            (
                Self {
                    release: release_rx,
                    parked: parked_tx,
                },
                StartGate {
                    release: release_tx,
                    parked: parked_rx,
                },
            )
        }
    }

    impl StartGate {
        /// Waits for `workers` parked reports (at most `settle`), then releases
        /// everyone at once. Returns the release instant.
        pub async fn release(mut self, workers: usize, settle: Duration) -> Instant {
            let deadline = tokio::time::sleep(settle);
            tokio::pin!(deadline);

            let mut parked = 0;
            while parked < workers {
                tokio::select! {
                    msg = self.parked.recv() => match msg {
                        Some(()) => parked += 1,
                        // every worker either parked or died already
                        None => break,
                    },
                    _ = &mut deadline => {
                        tracing::warn!("Only {parked}/{workers} workers parked within {settle:?}, releasing anyway");
                        break;
                    }
                }
            }

            let released_at = Instant::now();
            // send_replace never fails, even if every receiver is gone
            self.release.send_replace(true);
            released_at
        }
    }

    /// What a worker hands back once all its dispatches completed.
    pub struct WorkerDone<A> {
        pub aggregate: A,
        pub finished_at: Instant,
    }

    /// Spawns one task per entry of `clients`. Each task parks on the barrier and
    /// then runs its dispatches sequentially.
    pub fn spawn_workers<A, F, Fut>(
        ctx: ExecutionContext,
        clients: Vec<Vec<Dispatch>>,
        action: F,
    ) -> Vec<JoinHandle<WorkerDone<A>>>
    where
        A: Aggregate + 'static,
        F: Fn(Dispatch) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = A::Metric> + Send + 'static,
    {
        clients
            .into_iter()
            .enumerate()
            .map(|(i, dispatches)| {
                let mut release = ctx.release.clone();
                let parked = ctx.parked.clone();
                let action = action.clone();
                tokio::spawn(async move {
                    let mut aggregate = A::new();

                    // Subscribed before reporting in, so the release cannot be missed
                    let _ = parked.send(()).await;
                    drop(parked);
                    if release.wait_for(|released| *released).await.is_err() {
                        tracing::debug!("Worker {i}: release channel closed, starting anyway");
                    }
                    tracing::debug!("Worker {i} released.");

                    for dispatch in dispatches {
                        let metric = action(dispatch).await;
                        aggregate.consume(&metric);
                    }

                    WorkerDone {
                        aggregate,
                        finished_at: Instant::now(),
                    }
                })
            })
            .collect()
    }
}
