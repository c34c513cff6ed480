use std::future::Future;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use nudge_core::error::{NudgeError, Result};

use crate::clock::{Clock, SystemClock};
use crate::context::ExecutionContext;
use crate::job::{Callback, JobOptions, JobQueue};

pub const TIMER_THREAD_NAME: &str = "nudge-scheduler";

/// Longest the timer sleeps without re-reading the clock, so wall-clock jumps
/// are noticed.
const MAX_IDLE: Duration = Duration::from_secs(30);

struct State {
    queue: JobQueue,
    context: Option<ExecutionContext>,
    wake_requested: bool,
    shutdown: bool,
}

struct Shared {
    state: Mutex<State>,
    wakeup: Condvar,
    clock: Arc<dyn Clock>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, state: &mut State) {
        state.wake_requested = true;
        self.wakeup.notify_one();
    }
}

/// In-memory scheduler for one-shot delayed jobs.
///
/// Jobs live only as long as the process. A dedicated timer thread decides
/// when jobs are due; callbacks are always handed to the execution context
/// passed to [`Scheduler::start`].
pub struct Scheduler {
    shared: Arc<Shared>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    queue: JobQueue::default(),
                    context: None,
                    wake_requested: false,
                    shutdown: false,
                }),
                wakeup: Condvar::new(),
                clock,
            }),
            timer: Mutex::new(None),
        }
    }

    pub fn with_system_clock() -> Self {
        Self::new(Arc::new(SystemClock))
    }

    /// Bind to `context` and start the timer thread. A second call is a no-op
    /// and keeps the original binding.
    pub fn start(&self, context: ExecutionContext) -> Result<()> {
        let mut state = self.shared.lock();
        if state.shutdown {
            return Err(NudgeError::Scheduler("scheduler has been shut down".to_string()));
        }
        if let Some(bound) = &state.context {
            tracing::debug!(context = bound.name(), "[SCHED] already started, keeping binding");
            return Ok(());
        }

        let shared = self.shared.clone();
        let handle = std::thread::Builder::new()
            .name(TIMER_THREAD_NAME.to_string())
            .spawn(move || timer_loop(shared))
            .map_err(|e| NudgeError::Scheduler(format!("failed to spawn timer thread: {e}")))?;

        tracing::info!(context = context.name(), "[SCHED] started");
        state.context = Some(context);
        *self.timer.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.shared.lock().context.is_some()
    }

    /// Register `callback` to run once, `minutes` from now.
    pub fn schedule_in_minutes<F, Fut>(
        &self,
        minutes: u32,
        options: JobOptions,
        callback: F,
    ) -> Result<SystemTime>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.schedule_after(Duration::from_secs(u64::from(minutes) * 60), options, callback)
    }

    /// Register `callback` to run once after `delay`. Returns the fire time.
    ///
    /// Fails if [`Scheduler::start`] has not been called: there would be no
    /// context to run the callback on.
    pub fn schedule_after<F, Fut>(
        &self,
        delay: Duration,
        options: JobOptions,
        callback: F,
    ) -> Result<SystemTime>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut state = self.shared.lock();
        if state.context.is_none() {
            return Err(NudgeError::Scheduler("scheduler not started".to_string()));
        }
        if state.shutdown {
            return Err(NudgeError::Scheduler("scheduler has been shut down".to_string()));
        }

        let fire_at = self.shared.clock.now() + delay;
        let callback: Callback = Box::new(move || callback().boxed());
        let id = state.queue.push(fire_at, options, callback);

        tracing::info!(
            job = id,
            fire_at = %DateTime::<Utc>::from(fire_at).to_rfc3339(),
            delay_secs = delay.as_secs(),
            "[SCHED] job scheduled"
        );

        self.shared.notify(&mut state);
        Ok(fire_at)
    }

    /// Number of jobs not yet run or dropped.
    pub fn pending(&self) -> usize {
        self.shared.lock().queue.len()
    }

    /// Make the timer re-read the clock now instead of at its next deadline.
    pub fn wake(&self) {
        let mut state = self.shared.lock();
        self.shared.notify(&mut state);
    }

    /// Stop the timer thread. Pending jobs are discarded.
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.lock();
            if state.shutdown {
                return;
            }
            state.shutdown = true;
            self.shared.notify(&mut state);
        }

        let handle = self
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!("[SCHED] timer thread panicked");
            }
        }
        tracing::info!("[SCHED] stopped");
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn timer_loop(shared: Arc<Shared>) {
    let mut state = shared.lock();
    loop {
        if state.shutdown {
            break;
        }
        state.wake_requested = false;

        let now = shared.clock.now();
        let due = state.queue.take_due(now);
        let context = state.context.clone();
        drop(state);

        for (job, lateness) in due.missed {
            tracing::warn!(
                job = job.id,
                late_secs = lateness.as_secs(),
                grace_secs = job.options.misfire_grace.as_secs(),
                "[SCHED] job missed its grace window, dropping"
            );
        }
        for job in due.coalesced {
            tracing::info!(job = job.id, key = ?job.options.coalesce_key, "[SCHED] job coalesced");
        }

        if let Some(context) = context {
            for job in due.run {
                let callback = job.callback;
                // The callback is only invoked inside the submitted task, so none
                // of its work happens on this thread.
                if let Err(e) = context.submit(async move { callback().await }) {
                    tracing::error!(job = job.id, "[SCHED] could not hand job to context: {e}");
                } else {
                    tracing::debug!(job = job.id, context = context.name(), "[SCHED] job handed off");
                }
            }
        }

        state = shared.lock();
        if state.shutdown {
            break;
        }
        if state.wake_requested {
            continue;
        }

        let wait = state
            .queue
            .next_fire_at()
            .map(|at| {
                at.duration_since(shared.clock.now())
                    .unwrap_or(Duration::ZERO)
            })
            .unwrap_or(MAX_IDLE)
            .min(MAX_IDLE);
        if wait.is_zero() {
            continue;
        }

        state = shared
            .wakeup
            .wait_timeout(state, wait)
            .unwrap_or_else(PoisonError::into_inner)
            .0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::oneshot;

    const MINUTE: Duration = Duration::from_secs(60);
    const DEFAULT_GRACE_PLUS_ONE: Duration = Duration::from_secs(121);

    fn manual() -> (Scheduler, ManualClock) {
        let clock = ManualClock::default();
        (Scheduler::new(Arc::new(clock.clone())), clock)
    }

    fn started() -> (Scheduler, ManualClock, ExecutionContext) {
        let (scheduler, clock) = manual();
        let (context, runner) = ExecutionContext::new("main");
        tokio::spawn(runner.run());
        scheduler.start(context.clone()).unwrap();
        (scheduler, clock, context)
    }

    fn counting(counter: &Arc<AtomicUsize>) -> impl FnOnce() -> futures::future::Ready<()> + Send + 'static {
        let counter = counter.clone();
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            futures::future::ready(())
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    async fn wait_until_empty(scheduler: &Scheduler) {
        for _ in 0..200 {
            if scheduler.pending() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("scheduler still has {} pending job(s)", scheduler.pending());
    }

    #[test]
    fn test_schedule_before_start_fails() {
        let (scheduler, _clock) = manual();
        let err = scheduler
            .schedule_in_minutes(5, JobOptions::default(), || async {})
            .unwrap_err();
        assert!(err.to_string().contains("not started"));
        assert_eq!(scheduler.pending(), 0);
    }

    #[tokio::test]
    async fn test_fires_once_after_exact_delay_on_bound_context() {
        let (scheduler, clock, context) = started();
        let (tx, rx) = oneshot::channel();
        let runs = Arc::new(AtomicUsize::new(0));
        let runs_in_job = runs.clone();

        let fire_at = scheduler
            .schedule_in_minutes(5, JobOptions::default(), move || async move {
                runs_in_job.fetch_add(1, Ordering::SeqCst);
                let thread = std::thread::current().name().map(str::to_string);
                let _ = tx.send((ExecutionContext::current(), thread));
            })
            .unwrap();
        assert_eq!(fire_at, clock.now() + 5 * MINUTE);
        assert_eq!(scheduler.pending(), 1);

        clock.advance(5 * MINUTE);
        scheduler.wake();

        let (ran_on, thread) = tokio::time::timeout(Duration::from_secs(2), rx)
            .await
            .expect("job did not fire")
            .unwrap();
        assert_eq!(ran_on, Some(context.id()));
        assert_ne!(thread.as_deref(), Some(TIMER_THREAD_NAME));

        clock.advance(10 * MINUTE);
        scheduler.wake();
        settle().await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.pending(), 0);
    }

    #[tokio::test]
    async fn test_does_not_fire_early() {
        let (scheduler, clock, _context) = started();
        let runs = Arc::new(AtomicUsize::new(0));
        scheduler
            .schedule_in_minutes(5, JobOptions::default(), counting(&runs))
            .unwrap();

        clock.advance(4 * MINUTE);
        scheduler.wake();
        settle().await;

        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.pending(), 1);
    }

    #[tokio::test]
    async fn test_closure_body_runs_on_context_not_timer() {
        let (scheduler, clock, context) = started();
        let (tx, rx) = oneshot::channel();
        scheduler
            .schedule_in_minutes(1, JobOptions::default(), move || {
                // Runs before the returned future is polled
                let _ = tx.send(ExecutionContext::current());
                futures::future::ready(())
            })
            .unwrap();

        clock.advance(MINUTE);
        scheduler.wake();

        let ran_on = tokio::time::timeout(Duration::from_secs(2), rx)
            .await
            .expect("job did not fire")
            .unwrap();
        assert_eq!(ran_on, Some(context.id()));
    }

    #[tokio::test]
    async fn test_misfire_beyond_grace_is_dropped() {
        let (scheduler, clock, _context) = started();
        let runs = Arc::new(AtomicUsize::new(0));
        scheduler
            .schedule_in_minutes(1, JobOptions::default(), counting(&runs))
            .unwrap();

        clock.advance(MINUTE + DEFAULT_GRACE_PLUS_ONE);
        scheduler.wake();
        wait_until_empty(&scheduler).await;
        settle().await;

        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_late_within_grace_still_fires() {
        let (scheduler, clock, _context) = started();
        let runs = Arc::new(AtomicUsize::new(0));
        scheduler
            .schedule_in_minutes(1, JobOptions::default(), counting(&runs))
            .unwrap();

        clock.advance(MINUTE + Duration::from_secs(90));
        scheduler.wake();
        wait_until_empty(&scheduler).await;
        settle().await;

        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_coalesced_jobs_run_once() {
        let (scheduler, clock, _context) = started();
        let runs = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            scheduler
                .schedule_in_minutes(2, JobOptions::default().coalesce_on("u1"), counting(&runs))
                .unwrap();
        }

        clock.advance(2 * MINUTE);
        scheduler.wake();
        wait_until_empty(&scheduler).await;
        settle().await;

        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_second_start_keeps_first_binding() {
        let (scheduler, clock, first) = started();
        let (second, second_runner) = ExecutionContext::new("other");
        tokio::spawn(second_runner.run());
        scheduler.start(second.clone()).unwrap();

        let (tx, rx) = oneshot::channel();
        scheduler
            .schedule_in_minutes(1, JobOptions::default(), move || async move {
                let _ = tx.send(ExecutionContext::current());
            })
            .unwrap();
        clock.advance(MINUTE);
        scheduler.wake();

        let ran_on = tokio::time::timeout(Duration::from_secs(2), rx)
            .await
            .expect("job did not fire")
            .unwrap();
        assert_eq!(ran_on, Some(first.id()));
        assert_ne!(ran_on, Some(second.id()));
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_jobs() {
        let (scheduler, _clock, _context) = started();
        scheduler.shutdown();
        assert!(scheduler
            .schedule_in_minutes(1, JobOptions::default(), || async {})
            .is_err());
        // Idempotent
        scheduler.shutdown();
    }
}
