//! Cleanup queue and worker pool.

use crate::cleanup::{CleanupCoordinator, CleanupOutcome, CleanupTask};
use crate::config::CleanupConfig;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::watch;

/// How often idle workers check for shutdown.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Counters describing the cleanup queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupStats {
    /// Tasks accepted by `schedule`.
    pub scheduled: u64,
    /// Tasks that ran to completion (including already-gone artifacts).
    pub completed: u64,
    /// Tasks given up on after their last attempt.
    pub failed: u64,
    /// Tasks queued or running.
    pub pending: u64,
}

/// Cloneable handle for queueing cleanup tasks.
///
/// `schedule` pushes onto an unbounded channel and returns immediately, so it
/// is safe to call from `Drop` and from async code.
#[derive(Debug, Clone)]
pub struct CleanupScheduler {
    tx: Sender<CleanupTask>,
    stats: Arc<watch::Sender<CleanupStats>>,
}

impl CleanupScheduler {
    /// Queue a task. Never blocks; failures are logged, not returned.
    pub fn schedule(&self, task: CleanupTask) {
        self.stats.send_modify(|s| {
            s.scheduled += 1;
            s.pending += 1;
        });

        if let Err(e) = self.tx.send(task) {
            tracing::warn!("Cleanup queue closed, dropping task: {}", e.into_inner());
            self.stats.send_modify(|s| {
                s.pending = s.pending.saturating_sub(1);
                s.failed += 1;
            });
        }
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> CleanupStats {
        *self.stats.borrow()
    }

    /// Receiver that observes every counter update.
    pub fn subscribe(&self) -> watch::Receiver<CleanupStats> {
        self.stats.subscribe()
    }

    /// Resolve once no task is queued or running.
    pub async fn wait_idle(&self) {
        let mut rx = self.stats.subscribe();
        // The sender lives as long as `self`, so this only errors if it is gone.
        let _ = rx.wait_for(|s| s.pending == 0).await;
    }
}

/// Retry policy applied by every worker.
#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
}

/// OS threads draining the cleanup queue.
pub struct CleanupWorkers {
    handles: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl CleanupWorkers {
    /// Start `config.workers` threads and return the scheduler feeding them.
    pub fn spawn(
        coordinator: CleanupCoordinator,
        config: &CleanupConfig,
    ) -> std::io::Result<(CleanupScheduler, CleanupWorkers)> {
        let (tx, rx) = unbounded();
        let stats = Arc::new(watch::Sender::new(CleanupStats::default()));
        let shutdown = Arc::new(AtomicBool::new(false));
        let coordinator = Arc::new(coordinator);
        let policy = RetryPolicy {
            max_attempts: config.max_attempts.max(1),
            delay: config.retry_delay(),
        };

        let mut handles = Vec::with_capacity(config.workers.max(1));
        for index in 0..config.workers.max(1) {
            let rx = rx.clone();
            let coordinator = coordinator.clone();
            let stats = stats.clone();
            let shutdown = shutdown.clone();
            let handle = thread::Builder::new()
                .name(format!("cleanup-{index}"))
                .spawn(move || run_worker(rx, &coordinator, &stats, &shutdown, policy))?;
            handles.push(handle);
        }

        tracing::debug!("Started {} cleanup worker(s)", handles.len());

        Ok((
            CleanupScheduler { tx, stats },
            CleanupWorkers { handles, shutdown },
        ))
    }

    /// Signal shutdown, let the workers finish everything already queued, then join.
    pub fn shutdown(mut self) -> Result<(), String> {
        self.shutdown.store(true, Ordering::SeqCst);
        let mut panicked = 0;
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                panicked += 1;
            }
        }
        if panicked > 0 {
            return Err(format!("{panicked} cleanup worker thread(s) panicked"));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

impl Drop for CleanupWorkers {
    fn drop(&mut self) {
        // Without an explicit shutdown, let the threads finish the queue on their own.
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

fn run_worker(
    rx: Receiver<CleanupTask>,
    coordinator: &CleanupCoordinator,
    stats: &watch::Sender<CleanupStats>,
    shutdown: &AtomicBool,
    policy: RetryPolicy,
) {
    loop {
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(task) => run_task(&task, coordinator, stats, policy),
            Err(RecvTimeoutError::Timeout) => {
                if shutdown.load(Ordering::SeqCst) {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    // Anything queued before shutdown still runs once.
    while let Ok(task) = rx.try_recv() {
        run_task(&task, coordinator, stats, policy);
    }
}

fn run_task(
    task: &CleanupTask,
    coordinator: &CleanupCoordinator,
    stats: &watch::Sender<CleanupStats>,
    policy: RetryPolicy,
) {
    let mut attempt = 1;
    let succeeded = loop {
        match coordinator.execute(task) {
            Ok(CleanupOutcome::Deleted) => break true,
            Ok(CleanupOutcome::AlreadyGone) => {
                tracing::debug!("Cleanup {}: already gone", task);
                break true;
            }
            Err(e) if attempt < policy.max_attempts && CleanupCoordinator::is_retryable(&e) => {
                tracing::debug!(
                    "Cleanup {} failed (attempt {}/{}): {}",
                    task,
                    attempt,
                    policy.max_attempts,
                    e
                );
                attempt += 1;
                thread::sleep(policy.delay);
            }
            Err(e) => {
                tracing::warn!("Cleanup {} failed: {}", task, e);
                break false;
            }
        }
    };

    stats.send_modify(|s| {
        s.pending = s.pending.saturating_sub(1);
        if succeeded {
            s.completed += 1;
        } else {
            s.failed += 1;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{Area, AreaManager, Areas, RequestId};
    use tempfile::TempDir;

    fn setup(dir: &TempDir, workers: usize) -> (Areas, CleanupScheduler, CleanupWorkers) {
        let areas = Areas {
            staging: Arc::new(
                AreaManager::open(Area::Staging, dir.path().join("temp"), 4096, false).unwrap(),
            ),
            output: Arc::new(
                AreaManager::open(Area::Output, dir.path().join("output"), 4096, false).unwrap(),
            ),
        };
        let config = CleanupConfig {
            workers,
            max_attempts: 2,
            retry_delay_ms: 10,
        };
        let (scheduler, pool) =
            CleanupWorkers::spawn(CleanupCoordinator::new(areas.clone()), &config).unwrap();
        (areas, scheduler, pool)
    }

    #[tokio::test]
    async fn test_scheduled_tasks_run_and_stats_settle() {
        let dir = TempDir::new().unwrap();
        let (areas, scheduler, pool) = setup(&dir, 3);

        let mut artifacts = Vec::new();
        for _ in 0..20 {
            let artifact = areas.output.allocate(RequestId::new()).unwrap();
            areas.output.write(&artifact, b"wav").unwrap();
            artifacts.push(artifact);
        }
        for artifact in &artifacts {
            scheduler.schedule(CleanupTask::delete(artifact.clone()));
        }

        tokio::time::timeout(Duration::from_secs(5), scheduler.wait_idle())
            .await
            .unwrap();

        let stats = scheduler.stats();
        assert_eq!(stats.scheduled, 20);
        assert_eq!(stats.completed, 20);
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.pending, 0);
        assert!(artifacts.iter().all(|a| !a.path().exists()));
        assert_eq!(areas.output.live_count(), 0);

        pool.shutdown().unwrap();
    }

    #[tokio::test]
    async fn test_failed_task_is_counted_not_surfaced() {
        let dir = TempDir::new().unwrap();
        let (areas, scheduler, pool) = setup(&dir, 1);

        let artifact = areas.staging.allocate(RequestId::new()).unwrap();
        scheduler.schedule(CleanupTask::DeleteArtifact {
            artifact: artifact.clone(),
            requested_by: RequestId::new(),
        });

        tokio::time::timeout(Duration::from_secs(5), scheduler.wait_idle())
            .await
            .unwrap();

        assert_eq!(scheduler.stats().failed, 1);
        assert!(areas.staging.contains(&artifact.id()));

        pool.shutdown().unwrap();
    }

    #[test]
    fn test_shutdown_drains_queue() {
        let dir = TempDir::new().unwrap();
        let (areas, scheduler, pool) = setup(&dir, 2);

        for _ in 0..50 {
            let artifact = areas.output.allocate(RequestId::new()).unwrap();
            areas.output.write(&artifact, b"wav").unwrap();
            scheduler.schedule(CleanupTask::delete(artifact));
        }
        pool.shutdown().unwrap();

        let stats = scheduler.stats();
        assert_eq!(stats.completed, 50);
        assert_eq!(stats.pending, 0);
        assert_eq!(areas.output.live_count(), 0);
    }

    #[test]
    fn test_schedule_after_workers_gone_does_not_panic() {
        let dir = TempDir::new().unwrap();
        let (areas, scheduler, pool) = setup(&dir, 1);
        pool.shutdown().unwrap();

        let artifact = areas.output.allocate(RequestId::new()).unwrap();
        scheduler.schedule(CleanupTask::delete(artifact));

        // Receivers were dropped with the threads, so the send fails and is counted.
        assert_eq!(scheduler.stats().failed, 1);
        assert_eq!(scheduler.stats().pending, 0);
    }

    #[test]
    fn test_pool_size_follows_config() {
        let dir = TempDir::new().unwrap();
        let (_areas, _scheduler, pool) = setup(&dir, 4);
        assert_eq!(pool.len(), 4);
        pool.shutdown().unwrap();
    }
}
