//! Friday Cron - fixed-period jobs
//!
//! A firing that lands while the previous run is still executing is dropped.

use async_trait::async_trait;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

/// Single-slot busy flag. At most one holder at a time; no queue.
#[derive(Debug, Default)]
pub struct SingleFlight {
    busy: AtomicBool,
}

pub struct FlightGuard<'a> {
    busy: &'a AtomicBool,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn try_acquire(&self) -> Option<FlightGuard<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightGuard { busy: &self.busy })
    }

    /// Runs `fut` if nothing else holds the flag, otherwise returns `None`
    /// without polling it.
    pub async fn run<F, T>(&self, fut: F) -> Option<T>
    where
        F: Future<Output = T>,
    {
        let _guard = self.try_acquire()?;
        Some(fut.await)
    }
}

#[async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fired {
    Ran,
    Failed,
    Skipped,
}

pub struct Scheduler {
    job: Arc<dyn Job>,
    period: Duration,
    guard: Arc<SingleFlight>,
}

impl Scheduler {
    pub fn new(job: Arc<dyn Job>, period: Duration) -> Self {
        Self {
            job,
            period,
            guard: Arc::new(SingleFlight::new()),
        }
    }

    /// Shares the busy flag with other entry points that run the same job.
    pub fn with_guard(mut self, guard: Arc<SingleFlight>) -> Self {
        self.guard = guard;
        self
    }

    pub fn guard(&self) -> Arc<SingleFlight> {
        self.guard.clone()
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub async fn fire(&self) -> Fired {
        let outcome = self.guard.run(self.job.run()).await;
        match outcome {
            Some(Ok(())) => Fired::Ran,
            Some(Err(e)) => {
                error!(job = self.job.name(), "Scheduled job failed: {:#}", e);
                Fired::Failed
            }
            None => {
                warn!(
                    job = self.job.name(),
                    "Previous run still in progress, skipping this firing"
                );
                Fired::Skipped
            }
        }
    }

    /// Fires every period, starting one period from now. Missed ticks are
    /// not replayed.
    pub async fn run(self: Arc<Self>) {
        info!(
            job = self.job.name(),
            period_secs = self.period.as_secs(),
            "Scheduler started"
        );

        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            let scheduler = self.clone();
            tokio::spawn(async move {
                scheduler.fire().await;
            });
        }
    }

    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    struct CountingJob {
        runs: AtomicUsize,
        release: Option<Arc<Notify>>,
        started: Arc<Notify>,
        fail: bool,
    }

    impl CountingJob {
        fn instant() -> Self {
            Self {
                runs: AtomicUsize::new(0),
                release: None,
                started: Arc::new(Notify::new()),
                fail: false,
            }
        }

        fn gated(release: Arc<Notify>) -> Self {
            Self {
                release: Some(release),
                ..Self::instant()
            }
        }
    }

    #[async_trait]
    impl Job for CountingJob {
        fn name(&self) -> &str {
            "counting"
        }

        async fn run(&self) -> anyhow::Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            self.started.notify_one();
            if let Some(release) = &self.release {
                release.notified().await;
            }
            if self.fail {
                anyhow::bail!("boom");
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn single_flight_rejects_second_holder() {
        let flight = SingleFlight::new();
        let guard = flight.try_acquire().expect("first acquire");
        assert!(flight.is_busy());
        assert!(flight.try_acquire().is_none());
        assert_eq!(flight.run(async { 1 }).await, None);
        drop(guard);
        assert!(!flight.is_busy());
        assert_eq!(flight.run(async { 2 }).await, Some(2));
    }

    #[tokio::test]
    async fn overlapping_firing_is_skipped() {
        let release = Arc::new(Notify::new());
        let job = Arc::new(CountingJob::gated(release.clone()));
        let started = job.started.clone();
        let scheduler = Arc::new(Scheduler::new(job.clone(), Duration::from_secs(600)));

        let first = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.fire().await })
        };
        started.notified().await;

        assert_eq!(scheduler.fire().await, Fired::Skipped);
        assert_eq!(job.runs.load(Ordering::SeqCst), 1);

        release.notify_one();
        assert_eq!(first.await.expect("join"), Fired::Ran);
        assert!(!scheduler.guard().is_busy());
    }

    #[tokio::test]
    async fn failed_run_releases_the_guard() {
        let job = Arc::new(CountingJob {
            fail: true,
            ..CountingJob::instant()
        });
        let scheduler = Scheduler::new(job.clone(), Duration::from_secs(1));

        assert_eq!(scheduler.fire().await, Fired::Failed);
        assert_eq!(scheduler.fire().await, Fired::Failed);
        assert_eq!(job.runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn shared_guard_blocks_other_entry_points() {
        let guard = Arc::new(SingleFlight::new());
        let job = Arc::new(CountingJob::instant());
        let scheduler = Scheduler::new(job.clone(), Duration::from_secs(1)).with_guard(guard.clone());

        let _held = guard.try_acquire().expect("manual run holds the flag");
        assert_eq!(scheduler.fire().await, Fired::Skipped);
        assert_eq!(job.runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn run_fires_once_per_period_without_initial_firing() {
        let job = Arc::new(CountingJob::instant());
        let scheduler = Arc::new(Scheduler::new(job.clone(), Duration::from_secs(10)));
        let handle = scheduler.spawn();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(job.runs.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(26)).await;
        assert_eq!(job.runs.load(Ordering::SeqCst), 3);

        handle.abort();
    }
}
