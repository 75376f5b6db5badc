//! Single logical task queue for background persistence.
//!
//! Jobs run one at a time, in posting order, on tokio's blocking pool so they
//! may block on storage completions. Delayed jobs are armed as tokio timers and
//! join the queue when they fire.
//!
//! The queue counts outstanding work (armed timers, queued jobs and the job
//! currently running) so callers needing durability can `drain()` it.

use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::{Handle, TryCurrentError};
use tokio::sync::{mpsc, Notify};
use tokio::task::AbortHandle;

/// A unit of background work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

const ARMED: u8 = 0;
const FIRED: u8 = 1;
const CANCELLED: u8 = 2;

#[derive(Default)]
struct Counters {
    outstanding: AtomicUsize,
    completed: AtomicU64,
    idle: Notify,
}

impl Counters {
    fn acquire(&self) {
        self.outstanding.fetch_add(1, Ordering::SeqCst);
    }

    /// Drop one unit of outstanding work without counting it as completed.
    fn release(&self) {
        if self.outstanding.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    fn complete(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
        self.release();
    }
}

/// Cloneable handle to one task queue.
#[derive(Clone)]
pub struct TaskQueue {
    tx: mpsc::UnboundedSender<Job>,
    counters: Arc<Counters>,
    handle: Handle,
}

impl TaskQueue {
    /// Start a queue whose worker runs on `handle`.
    pub fn new(handle: Handle) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let counters = Arc::new(Counters::default());

        let worker_counters = counters.clone();
        handle.spawn(async move {
            while let Some(job) = rx.recv().await {
                if let Err(e) = tokio::task::spawn_blocking(job).await {
                    log::error!("Queued task failed: {}", e);
                }
                worker_counters.complete();
            }
            log::debug!("Task queue worker stopped");
        });

        Self {
            tx,
            counters,
            handle,
        }
    }

    /// Start a queue on the runtime the caller is running in.
    pub fn current() -> Result<Self, TryCurrentError> {
        Ok(Self::new(Handle::try_current()?))
    }

    /// Queue `job` to run after everything already queued.
    pub fn post(&self, job: Job) {
        self.counters.acquire();
        self.enqueue(job);
    }

    /// Arm a timer that queues `job` after `delay`.
    ///
    /// The timer keeps running if the returned handle is dropped; only
    /// [`TimerHandle::cancel`] stops it.
    pub fn post_after(&self, delay: Duration, job: Job) -> TimerHandle {
        self.counters.acquire();
        let state = Arc::new(AtomicU8::new(ARMED));

        let timer_state = state.clone();
        let queue = self.clone();
        let task = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if timer_state
                .compare_exchange(ARMED, FIRED, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                // The unit acquired when arming now belongs to the queued job.
                queue.enqueue(job);
            }
        });

        TimerHandle {
            state,
            task: task.abort_handle(),
            counters: self.counters.clone(),
        }
    }

    /// Wait until no timer is armed and no job is queued or running.
    pub async fn drain(&self) {
        loop {
            let notified = self.counters.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.outstanding() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Jobs finished since the queue started.
    pub fn completed(&self) -> u64 {
        self.counters.completed.load(Ordering::SeqCst)
    }

    /// Armed timers plus queued and running jobs.
    pub fn outstanding(&self) -> usize {
        self.counters.outstanding.load(Ordering::SeqCst)
    }

    fn enqueue(&self, job: Job) {
        if self.tx.send(job).is_err() {
            log::warn!("Task queue worker is gone; dropping job");
            self.counters.release();
        }
    }
}

/// The armed side of [`TaskQueue::post_after`].
pub struct TimerHandle {
    state: Arc<AtomicU8>,
    task: AbortHandle,
    counters: Arc<Counters>,
}

impl TimerHandle {
    /// Disarm the timer. Returns false if it already fired or was cancelled.
    pub fn cancel(&self) -> bool {
        if self
            .state
            .compare_exchange(ARMED, CANCELLED, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        self.task.abort();
        self.counters.release();
        true
    }

    pub fn is_armed(&self) -> bool {
        self.state.load(Ordering::SeqCst) == ARMED
    }
}
