//! Worker pool
//!
//! A fixed number of workers pull jobs from a shared input channel and push
//! one `TaskResult` per job onto the output channel. The output channel
//! closes once every worker has exited, which happens when the input
//! channel is closed and drained.

use matrix_core::{RepoJob, RuntimeClient, TaskError, TaskResult};
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::task::TaskRunner;

/// Creates a job channel with minimal buffering
///
/// Senders block until a worker is free to take the job.
pub fn job_channel() -> (mpsc::Sender<RepoJob>, mpsc::Receiver<RepoJob>) {
    mpsc::channel(1)
}

/// Runs task cycles on a fixed-size pool of workers
pub struct Scheduler {
    worker_count: usize,
    runner: Arc<TaskRunner>,
}

impl Scheduler {
    /// Creates a new scheduler
    ///
    /// # Arguments
    /// * `worker_count` - Number of concurrent workers (at least one is used)
    /// * `runner` - Task runner shared by all workers
    pub fn new(worker_count: usize, runner: Arc<TaskRunner>) -> Self {
        Self {
            worker_count: worker_count.max(1),
            runner,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Starts the workers and returns the result stream
    ///
    /// Results arrive in completion order. Exactly one result is produced per
    /// job received, and the returned channel closes after the last one.
    pub fn run_tasks(&self, jobs: mpsc::Receiver<RepoJob>) -> mpsc::Receiver<TaskResult> {
        let (results_tx, results_rx) = mpsc::channel(self.worker_count);
        let jobs = Arc::new(Mutex::new(jobs));

        info!("Starting {} worker(s)", self.worker_count);

        let handles: Vec<JoinHandle<()>> = (0..self.worker_count)
            .map(|worker_id| {
                tokio::spawn(worker_loop(
                    worker_id,
                    Arc::clone(&jobs),
                    results_tx.clone(),
                    Arc::clone(&self.runner),
                ))
            })
            .collect();

        // Workers hold the remaining senders
        drop(results_tx);

        tokio::spawn(async move {
            for handle in handles {
                if let Err(e) = handle.await {
                    warn!("Worker task panicked: {}", e);
                }
            }
            debug!("All workers finished");
        });

        results_rx
    }

    /// Runs every named repo with the given client and collects the results
    pub async fn run_all(
        &self,
        names: Vec<String>,
        client: Arc<dyn RuntimeClient>,
    ) -> Vec<TaskResult> {
        let (jobs_tx, jobs_rx) = job_channel();
        let mut results_rx = self.run_tasks(jobs_rx);

        let total = names.len();
        let producer = tokio::spawn(async move {
            for name in names {
                if jobs_tx.send(RepoJob::new(name, Arc::clone(&client))).await.is_err() {
                    warn!("Job channel closed early");
                    break;
                }
            }
        });

        let mut results = Vec::with_capacity(total);
        while let Some(result) = results_rx.recv().await {
            results.push(result);
        }

        if let Err(e) = producer.await {
            warn!("Job producer panicked: {}", e);
        }

        results
    }
}

async fn worker_loop(
    worker_id: usize,
    jobs: Arc<Mutex<mpsc::Receiver<RepoJob>>>,
    results: mpsc::Sender<TaskResult>,
    runner: Arc<TaskRunner>,
) {
    debug!("Worker {} started", worker_id);

    loop {
        // Only the receive is done under the lock
        let job = jobs.lock().await.recv().await;
        let Some(job) = job else {
            break;
        };

        let name = job.name.clone();
        debug!("Worker {} picked up {}", worker_id, name);

        let result = run_isolated(Arc::clone(&runner), job).await;

        if results.send(result).await.is_err() {
            warn!("Result receiver dropped, discarding result for {}", name);
        }
    }

    debug!("Worker {} exiting", worker_id);
}

/// Runs one job in its own task so a panic still yields a result
async fn run_isolated(runner: Arc<TaskRunner>, job: RepoJob) -> TaskResult {
    let name = job.name.clone();
    let started_at = chrono::Utc::now();

    match tokio::spawn(async move { runner.run(job).await }).await {
        Ok(result) => result,
        Err(e) => {
            error!("Task for {} panicked: {}", name, e);
            TaskResult::failed(name, started_at, TaskError::Panicked(e.to_string()))
        }
    }
}
