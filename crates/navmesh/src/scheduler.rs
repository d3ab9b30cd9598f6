//! Schedulers running deferred work: once per frame on the caller's thread, or on a
//! tokio worker

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Identifies a scheduled task
pub type TaskId = u64;

pub type OnceTask = Box<dyn FnOnce() + Send>;
pub type RepeatingTask = Box<dyn FnMut() + Send>;

/// Schedule-once, schedule-repeating and cancel primitives
pub trait Scheduler: Send + Sync {
    /// Runs `task` once at the next opportunity
    fn schedule_once(&self, task: OnceTask) -> TaskId;

    /// Runs `task` once in the next scheduling round, never in the current one.
    ///
    /// Work that polls for a condition reschedules itself through this.
    fn schedule_next_round(&self, task: OnceTask) -> TaskId {
        self.schedule_once(task)
    }

    /// Runs `task` on every opportunity until cancelled
    fn schedule_repeating(&self, task: RepeatingTask) -> TaskId;

    /// Cancels a task that has not run yet, or stops a repeating one
    fn cancel(&self, id: TaskId) -> bool;
}

/// Locks `mutex`, recovering the data of a poisoned lock
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
struct FrameQueue {
    next_id: TaskId,
    once: Vec<(TaskId, OnceTask)>,
    repeating: Vec<(TaskId, RepeatingTask)>,
    /// Repeating tasks cancelled while they were taken out to run
    cancelled: HashSet<TaskId>,
}

impl FrameQueue {
    fn next_id(&mut self) -> TaskId {
        self.next_id += 1;
        self.next_id
    }
}

/// Cooperative scheduler driven by [`FrameScheduler::run_frame`].
///
/// Tasks scheduled while a frame runs wait for the next frame.
#[derive(Default)]
pub struct FrameScheduler {
    queue: Mutex<FrameQueue>,
}

impl FrameScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tasks waiting to run
    pub fn pending_count(&self) -> usize {
        let queue = lock(&self.queue);
        queue.once.len() + queue.repeating.len()
    }

    /// Runs every repeating task, then every once task scheduled before this frame
    pub fn run_frame(&self) {
        let (once, mut repeating) = {
            let mut queue = lock(&self.queue);
            queue.cancelled.clear();
            (
                std::mem::take(&mut queue.once),
                std::mem::take(&mut queue.repeating),
            )
        };

        for (_, task) in repeating.iter_mut() {
            task();
        }

        let mut queue = lock(&self.queue);
        let cancelled = std::mem::take(&mut queue.cancelled);
        repeating.retain(|(id, _)| !cancelled.contains(id));
        repeating.append(&mut queue.repeating);
        queue.repeating = repeating;
        drop(queue);

        for (id, task) in once {
            if lock(&self.queue).cancelled.remove(&id) {
                continue;
            }
            task();
        }
    }
}

impl Scheduler for FrameScheduler {
    fn schedule_once(&self, task: OnceTask) -> TaskId {
        let mut queue = lock(&self.queue);
        let id = queue.next_id();
        queue.once.push((id, task));
        id
    }

    fn schedule_repeating(&self, task: RepeatingTask) -> TaskId {
        let mut queue = lock(&self.queue);
        let id = queue.next_id();
        queue.repeating.push((id, task));
        id
    }

    fn cancel(&self, id: TaskId) -> bool {
        let mut queue = lock(&self.queue);
        let before = queue.once.len() + queue.repeating.len();
        queue.once.retain(|(i, _)| *i != id);
        queue.repeating.retain(|(i, _)| *i != id);
        if queue.once.len() + queue.repeating.len() != before {
            return true;
        }
        // May be running in the current frame
        id <= queue.next_id && queue.cancelled.insert(id)
    }
}

impl std::fmt::Debug for FrameScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameScheduler")
            .field("pending", &self.pending_count())
            .finish()
    }
}

const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Scheduler running tasks on a tokio runtime, off the caller's thread
pub struct WorkerScheduler {
    handle: Handle,
    /// Interval between runs of repeating tasks and length of a scheduling round
    period: Duration,
    next_id: AtomicU64,
    tasks: Mutex<HashMap<TaskId, JoinHandle<()>>>,
}

impl WorkerScheduler {
    /// Zero periods are raised to one millisecond
    pub fn new(handle: Handle, period: Duration) -> Self {
        Self {
            handle,
            period: period.max(MIN_PERIOD),
            next_id: AtomicU64::new(1),
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Uses the runtime of the calling task
    pub fn current(period: Duration) -> Self {
        Self::new(Handle::current(), period)
    }

    fn track(&self, handle: JoinHandle<()>) -> TaskId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut tasks = lock(&self.tasks);
        tasks.retain(|_, h| !h.is_finished());
        tasks.insert(id, handle);
        id
    }
}

impl Scheduler for WorkerScheduler {
    fn schedule_once(&self, task: OnceTask) -> TaskId {
        let handle = self.handle.spawn_blocking(task);
        self.track(handle)
    }

    fn schedule_next_round(&self, task: OnceTask) -> TaskId {
        let period = self.period;
        let handle = self.handle.spawn(async move {
            tokio::time::sleep(period).await;
            if let Err(e) = tokio::task::spawn_blocking(task).await {
                log::warn!("deferred task failed: {}", e);
            }
        });
        self.track(handle)
    }

    fn schedule_repeating(&self, mut task: RepeatingTask) -> TaskId {
        let period = self.period;
        let handle = self.handle.spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                task();
            }
        });
        self.track(handle)
    }

    fn cancel(&self, id: TaskId) -> bool {
        match lock(&self.tasks).remove(&id) {
            Some(handle) => {
                let pending = !handle.is_finished();
                handle.abort();
                pending
            }
            None => false,
        }
    }
}

impl Drop for WorkerScheduler {
    fn drop(&mut self) {
        for (_, handle) in lock(&self.tasks).drain() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for WorkerScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerScheduler")
            .field("period", &self.period)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn test_once_tasks_run_once() {
        let scheduler = FrameScheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        scheduler.schedule_once(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(scheduler.pending_count(), 1);
        scheduler.run_frame();
        scheduler.run_frame();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[test]
    fn test_repeating_until_cancelled() {
        let scheduler = FrameScheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let id = scheduler.schedule_repeating(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        for _ in 0..3 {
            scheduler.run_frame();
        }
        assert!(scheduler.cancel(id));
        scheduler.run_frame();
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert!(!scheduler.cancel(12345));
    }

    #[test]
    fn test_cancel_before_run() {
        let scheduler = FrameScheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let id = scheduler.schedule_once(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        assert!(scheduler.cancel(id));
        scheduler.run_frame();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_tasks_scheduled_during_frame_wait() {
        let scheduler = Arc::new(FrameScheduler::new());
        let count = Arc::new(AtomicUsize::new(0));
        let (s, c) = (scheduler.clone(), count.clone());
        scheduler.schedule_once(Box::new(move || {
            let c2 = c.clone();
            s.schedule_once(Box::new(move || {
                c2.fetch_add(1, Ordering::SeqCst);
            }));
            c.fetch_add(1, Ordering::SeqCst);
        }));
        scheduler.run_frame();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        scheduler.run_frame();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_worker_runs_tasks() {
        let scheduler = WorkerScheduler::current(Duration::from_millis(5));
        let (tx, rx) = tokio::sync::oneshot::channel();
        scheduler.schedule_once(Box::new(move || {
            let _ = tx.send(42);
        }));
        assert_eq!(rx.await.unwrap(), 42);

        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let id = scheduler.schedule_repeating(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(scheduler.cancel(id));
        let after_cancel = count.load(Ordering::SeqCst);
        assert!(after_cancel >= 2);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(count.load(Ordering::SeqCst), after_cancel);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_worker_next_round_waits_a_period() {
        let scheduler = WorkerScheduler::current(Duration::from_millis(40));
        let (tx, rx) = tokio::sync::oneshot::channel();
        let start = tokio::time::Instant::now();
        scheduler.schedule_next_round(Box::new(move || {
            let _ = tx.send(());
        }));
        rx.await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(40));

        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let id = scheduler.schedule_next_round(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        assert!(scheduler.cancel(id));
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_frame_next_round_is_next_frame() {
        let scheduler = FrameScheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        scheduler.schedule_next_round(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        scheduler.run_frame();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
