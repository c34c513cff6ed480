use std::collections::BTreeMap;
use std::time::{Duration, SystemTime};

use futures::future::BoxFuture;

/// How late a job may still run after its fire time.
pub const DEFAULT_MISFIRE_GRACE: Duration = Duration::from_secs(120);

/// Per-job firing policy, fixed at registration.
#[derive(Debug, Clone)]
pub struct JobOptions {
    /// Past this lateness the job is dropped instead of run.
    pub misfire_grace: Duration,
    /// Jobs sharing a key that come due in the same evaluation run once.
    pub coalesce_key: Option<String>,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            misfire_grace: DEFAULT_MISFIRE_GRACE,
            coalesce_key: None,
        }
    }
}

impl JobOptions {
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.misfire_grace = grace;
        self
    }

    pub fn coalesce_on(mut self, key: impl Into<String>) -> Self {
        self.coalesce_key = Some(key.into());
        self
    }
}

pub(crate) type Callback = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

pub(crate) struct PendingJob {
    pub(crate) id: u64,
    pub(crate) fire_at: SystemTime,
    pub(crate) options: JobOptions,
    pub(crate) callback: Callback,
}

impl PendingJob {
    fn lateness(&self, now: SystemTime) -> Duration {
        now.duration_since(self.fire_at).unwrap_or(Duration::ZERO)
    }
}

/// Outcome of one evaluation of the queue.
#[derive(Default)]
pub(crate) struct DueJobs {
    pub(crate) run: Vec<PendingJob>,
    pub(crate) missed: Vec<(PendingJob, Duration)>,
    pub(crate) coalesced: Vec<PendingJob>,
}

/// Pending jobs ordered by fire time, then registration order.
#[derive(Default)]
pub(crate) struct JobQueue {
    jobs: BTreeMap<(SystemTime, u64), PendingJob>,
    next_id: u64,
}

impl JobQueue {
    pub(crate) fn push(&mut self, fire_at: SystemTime, options: JobOptions, callback: Callback) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.jobs.insert(
            (fire_at, id),
            PendingJob {
                id,
                fire_at,
                options,
                callback,
            },
        );
        id
    }

    pub(crate) fn len(&self) -> usize {
        self.jobs.len()
    }

    pub(crate) fn next_fire_at(&self) -> Option<SystemTime> {
        self.jobs.keys().next().map(|(fire_at, _)| *fire_at)
    }

    /// Remove every job due at `now` and sort it into run / missed / coalesced.
    pub(crate) fn take_due(&mut self, now: SystemTime) -> DueJobs {
        let mut due = DueJobs::default();

        while let Some(entry) = self.jobs.first_entry() {
            if entry.key().0 > now {
                break;
            }
            let job = entry.remove();

            let lateness = job.lateness(now);
            if lateness > job.options.misfire_grace {
                due.missed.push((job, lateness));
                continue;
            }

            let duplicate = job.options.coalesce_key.as_ref().is_some_and(|key| {
                due.run
                    .iter()
                    .any(|r| r.options.coalesce_key.as_ref() == Some(key))
            });
            if duplicate {
                due.coalesced.push(job);
            } else {
                due.run.push(job);
            }
        }

        due
    }
}
