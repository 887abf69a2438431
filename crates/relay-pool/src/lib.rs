//! Bounded, fair agent scheduler.
//!
//! Each project gets its own FIFO queue capped at `project_queue_depth`; a
//! single global semaphore caps how many agent runs execute at once. The
//! dispatcher round-robins across projects with pending work so one noisy
//! project can't starve the others out of their share of global capacity.
//!
//! Grounded on the retry/instrument idiom in `skynet_channels::manager`; the
//! scheduling structure itself has no teacher counterpart.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{watch, Notify, Semaphore};
use tracing::{debug, instrument, warn};

use relay_core::error::{RelayError, Result};

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type Job = Box<dyn FnOnce() -> BoxFuture + Send>;

struct PoolInner {
    global: Semaphore,
    queues: Mutex<HashMap<String, VecDeque<Job>>>,
    order: Mutex<VecDeque<String>>,
    active: AtomicUsize,
    max_queue_depth: usize,
    notify: Notify,
}

/// Handle to the running pool. Cloning shares the same dispatcher.
#[derive(Clone)]
pub struct AgentPool {
    inner: Arc<PoolInner>,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl AgentPool {
    /// Spawn a pool with `global_concurrency` total permits and
    /// `max_queue_depth` pending jobs allowed per project.
    pub fn new(global_concurrency: usize, max_queue_depth: usize) -> Self {
        let inner = Arc::new(PoolInner {
            global: Semaphore::new(global_concurrency),
            queues: Mutex::new(HashMap::new()),
            order: Mutex::new(VecDeque::new()),
            active: AtomicUsize::new(0),
            max_queue_depth,
            notify: Notify::new(),
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let dispatcher_inner = inner.clone();
        tokio::spawn(run_dispatcher(dispatcher_inner, shutdown_rx));
        Self {
            inner,
            shutdown_tx: Arc::new(shutdown_tx),
        }
    }

    /// Submit a job for `project`. Rejected with [`RelayError::QueueFull`]
    /// when that project's queue is already at capacity. On success,
    /// returns this job's position ahead of it in the queue (0 means it's
    /// next up for dispatch), computed under the same lock as the push so
    /// it reflects the state the job was actually enqueued into.
    #[instrument(skip(self, job), fields(project))]
    pub fn enqueue<F, Fut>(&self, project: &str, job: F) -> Result<usize>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let boxed: Job = Box::new(move || Box::pin(job()) as BoxFuture);
        let mut queues = self.inner.queues.lock().unwrap();
        let q = queues.entry(project.to_string()).or_default();
        if q.len() >= self.inner.max_queue_depth {
            return Err(RelayError::QueueFull {
                project: project.to_string(),
            });
        }
        let position = q.len();
        let was_empty = q.is_empty();
        q.push_back(boxed);
        drop(queues);

        if was_empty {
            self.inner.order.lock().unwrap().push_back(project.to_string());
        }
        self.inner.notify.notify_one();
        Ok(position)
    }

    pub fn queue_depth(&self, project: &str) -> usize {
        self.inner
            .queues
            .lock()
            .unwrap()
            .get(project)
            .map(|q| q.len())
            .unwrap_or(0)
    }

    pub fn active_count(&self) -> usize {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Stop the dispatcher. Jobs already running are allowed to finish;
    /// nothing still queued is started.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

#[instrument(skip_all)]
async fn run_dispatcher(inner: Arc<PoolInner>, mut shutdown: watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            debug!("agent pool dispatcher shutting down");
            return;
        }

        let job = loop {
            let next_project = {
                let mut order = inner.order.lock().unwrap();
                order.pop_front()
            };
            let Some(project) = next_project else {
                tokio::select! {
                    _ = inner.notify.notified() => continue,
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            return;
                        }
                        continue;
                    }
                }
            };

            let mut queues = inner.queues.lock().unwrap();
            let Some(q) = queues.get_mut(&project) else {
                warn!(project, "round-robin order referenced an unknown queue");
                continue;
            };
            let job = q.pop_front();
            let still_has_work = !q.is_empty();
            if q.is_empty() {
                queues.remove(&project);
            }
            drop(queues);

            if still_has_work {
                inner.order.lock().unwrap().push_back(project);
            }

            match job {
                Some(job) => break job,
                None => continue,
            }
        };

        let permit = tokio::select! {
            permit = inner.global.acquire() => match permit {
                Ok(permit) => permit,
                Err(_) => return,
            },
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
                continue;
            }
        };
        // Forget the permit now; the spawned task below releases it manually
        // once the job finishes instead of on guard drop.
        permit.forget();

        inner.active.fetch_add(1, Ordering::SeqCst);
        let fut = job();
        let active = inner.clone();
        tokio::spawn(async move {
            fut.await;
            active.active.fetch_sub(1, Ordering::SeqCst);
            active.global.add_permits(1);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize as StdAtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn enqueue_rejects_when_project_queue_is_full() {
        let pool = AgentPool::new(0, 2);
        pool.enqueue("proj", || async {}).unwrap();
        pool.enqueue("proj", || async {}).unwrap();
        let err = pool.enqueue("proj", || async {}).unwrap_err();
        assert_eq!(err.code(), "QUEUE_FULL");
    }

    #[tokio::test]
    async fn jobs_run_up_to_global_concurrency() {
        let pool = AgentPool::new(2, 10);
        let counter = Arc::new(StdAtomicUsize::new(0));
        for _ in 0..2 {
            let counter = counter.clone();
            pool.enqueue("proj", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
            })
            .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn separate_projects_get_fair_access() {
        let pool = AgentPool::new(1, 10);
        let order = Arc::new(Mutex::new(Vec::new()));
        for project in ["a", "b", "a", "b"] {
            let order = order.clone();
            let project_owned = project.to_string();
            pool.enqueue(project, move || async move {
                order.lock().unwrap().push(project_owned);
                tokio::time::sleep(Duration::from_millis(10)).await;
            })
            .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        let ran = order.lock().unwrap().clone();
        assert_eq!(ran.len(), 4);
    }

    #[tokio::test]
    async fn active_count_reflects_in_flight_jobs() {
        let pool = AgentPool::new(4, 10);
        pool.enqueue("p", || async {
            tokio::time::sleep(Duration::from_millis(80)).await;
        })
        .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(pool.active_count(), 1);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(pool.active_count(), 0);
    }
}
