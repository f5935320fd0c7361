//! One-shot timer scheduling.
//!
//! [`Scheduler`] is the `setTimeout` of the host: it takes a delay and a
//! zero-argument callback, returns immediately, and fires the callback once.
//! There is no cancel operation.
//!
//! Two implementations are provided:
//! - [`ManualScheduler`] keeps a virtual clock that only moves when the test
//!   advances it, which makes every firing deterministic.
//! - [`TokioScheduler`] spawns a task per timer onto a tokio runtime, so it
//!   follows tokio's clock (including the paused clock used in tests).

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use thiserror::Error;
use tokio::runtime::Handle;

/// Callback run when a timer fires.
pub type TimerTask = Box<dyn FnOnce() + Send + 'static>;

/// Identifier returned by [`Scheduler::schedule_once`].
pub type TimerId = u64;

/// Host timer queue.
pub trait Scheduler: Send + Sync {
    /// Run `task` once after `delay`. Never blocks the caller.
    fn schedule_once(&self, delay: Duration, task: TimerTask) -> TimerId;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("advance_time_to requires target >= now_ms (now {now_ms}, target {target_ms})")]
    TimeTravel { now_ms: u64, target_ms: u64 },
}

/// Snapshot of a timer still waiting in a [`ManualScheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingTimer {
    pub id: TimerId,
    pub due_at: u64,
    pub order: u64,
}

struct QueuedTimer {
    timer: PendingTimer,
    task: TimerTask,
}

#[derive(Default)]
struct ManualState {
    now_ms: u64,
    next_id: TimerId,
    next_order: u64,
    queue: Vec<QueuedTimer>,
}

impl ManualState {
    /// Remove and return the earliest timer due at or before `limit_ms`.
    fn pop_due(&mut self, limit_ms: u64) -> Option<QueuedTimer> {
        let index = self
            .queue
            .iter()
            .enumerate()
            .filter(|(_, queued)| queued.timer.due_at <= limit_ms)
            .min_by_key(|(_, queued)| (queued.timer.due_at, queued.timer.order))
            .map(|(index, _)| index)?;
        Some(self.queue.swap_remove(index))
    }
}

/// Deterministic scheduler driven by an explicit virtual clock.
///
/// Timers run in `(due_at, order)` order, where `order` is the scheduling
/// sequence number. The queue lock is released while a task runs, so tasks may
/// schedule further timers; those run within the same advance if they fall due
/// before its target.
#[derive(Default)]
pub struct ManualScheduler {
    state: Mutex<ManualState>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn now_ms(&self) -> u64 {
        self.state().now_ms
    }

    /// Timers still waiting, ordered by firing order.
    pub fn pending_timers(&self) -> Vec<PendingTimer> {
        let mut timers: Vec<_> = self.state().queue.iter().map(|queued| queued.timer).collect();
        timers.sort_by_key(|timer| (timer.due_at, timer.order));
        timers
    }

    /// Run timers already due at the current time without moving the clock.
    pub fn run_due_timers(&self) -> usize {
        let now = self.now_ms();
        self.run_until(now)
    }

    /// Move the clock forward by `delta_ms`, firing everything due on the way.
    pub fn advance_time(&self, delta_ms: u64) -> usize {
        let target = self.now_ms().saturating_add(delta_ms);
        self.run_until(target)
    }

    /// Move the clock to the absolute time `target_ms`.
    pub fn advance_time_to(&self, target_ms: u64) -> Result<usize, SchedulerError> {
        let now_ms = self.now_ms();
        if target_ms < now_ms {
            return Err(SchedulerError::TimeTravel { now_ms, target_ms });
        }
        Ok(self.run_until(target_ms))
    }

    fn run_until(&self, target_ms: u64) -> usize {
        let mut ran = 0;
        loop {
            let next = {
                let mut state = self.state();
                let next = state.pop_due(target_ms);
                if let Some(queued) = &next {
                    state.now_ms = state.now_ms.max(queued.timer.due_at);
                }
                next
            };
            let Some(queued) = next else { break };
            (queued.task)();
            ran += 1;
        }
        let mut state = self.state();
        state.now_ms = state.now_ms.max(target_ms);
        ran
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_once(&self, delay: Duration, task: TimerTask) -> TimerId {
        let mut state = self.state();
        state.next_id += 1;
        let id = state.next_id;
        let order = state.next_order;
        state.next_order += 1;
        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        let due_at = state.now_ms.saturating_add(delay_ms);
        state.queue.push(QueuedTimer {
            timer: PendingTimer { id, due_at, order },
            task,
        });
        id
    }
}

/// Scheduler backed by tokio timers.
#[derive(Clone)]
pub struct TokioScheduler {
    handle: Handle,
    next_id: Arc<AtomicU64>,
    pending: Arc<AtomicUsize>,
}

impl TokioScheduler {
    /// Bind to the runtime the caller is running on.
    ///
    /// Panics outside a tokio runtime, like [`Handle::current`].
    pub fn current() -> Self {
        Self::with_handle(Handle::current())
    }

    pub fn with_handle(handle: Handle) -> Self {
        Self {
            handle,
            next_id: Arc::new(AtomicU64::new(0)),
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of timers scheduled but not yet fired.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_once(&self, delay: Duration, task: TimerTask) -> TimerId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.pending.fetch_add(1, Ordering::SeqCst);
        let guard = PendingGuard(Arc::clone(&self.pending));
        self.handle.spawn(async move {
            let _guard = guard;
            tokio::time::sleep(delay).await;
            task();
        });
        id
    }
}

/// Decrements the pending count when a timer task ends, even by panic.
struct PendingGuard(Arc<AtomicUsize>);

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Arc<Mutex<Vec<&'static str>>>, impl Fn(&'static str) -> TimerTask) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let make = move |label: &'static str| -> TimerTask {
            let sink = Arc::clone(&sink);
            Box::new(move || sink.lock().unwrap().push(label))
        };
        (log, make)
    }

    #[test]
    fn fires_once_when_delay_elapses() {
        let scheduler = ManualScheduler::new();
        let (log, make) = recorder();
        scheduler.schedule_once(Duration::from_millis(10), make("a"));

        assert_eq!(scheduler.advance_time(9), 0);
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(scheduler.advance_time(1), 1);
        assert_eq!(*log.lock().unwrap(), ["a"]);
        assert_eq!(scheduler.advance_time(100), 0);
        assert_eq!(scheduler.now_ms(), 110);
    }

    #[test]
    fn orders_by_due_time_then_scheduling_order() {
        let scheduler = ManualScheduler::new();
        let (log, make) = recorder();
        scheduler.schedule_once(Duration::from_millis(5), make("late"));
        scheduler.schedule_once(Duration::from_millis(0), make("first"));
        scheduler.schedule_once(Duration::from_millis(0), make("second"));

        scheduler.advance_time(5);
        assert_eq!(*log.lock().unwrap(), ["first", "second", "late"]);
    }

    #[test]
    fn tasks_can_schedule_more_timers() {
        let scheduler = Arc::new(ManualScheduler::new());
        let (log, make) = recorder();
        let inner = make("inner");
        let nested = Arc::clone(&scheduler);
        scheduler.schedule_once(
            Duration::from_millis(2),
            Box::new(move || {
                nested.schedule_once(Duration::from_millis(3), inner);
            }),
        );

        assert_eq!(scheduler.advance_time(4), 1);
        assert_eq!(
            scheduler.pending_timers(),
            vec![PendingTimer {
                id: 2,
                due_at: 5,
                order: 1,
            }]
        );
        assert_eq!(scheduler.advance_time(1), 1);
        assert_eq!(*log.lock().unwrap(), ["inner"]);
    }

    #[test]
    fn run_due_timers_does_not_move_clock() {
        let scheduler = ManualScheduler::new();
        let (log, make) = recorder();
        scheduler.schedule_once(Duration::ZERO, make("now"));
        scheduler.schedule_once(Duration::from_millis(1), make("later"));

        assert_eq!(scheduler.run_due_timers(), 1);
        assert_eq!(scheduler.now_ms(), 0);
        assert_eq!(*log.lock().unwrap(), ["now"]);
        assert_eq!(scheduler.run_due_timers(), 0);
    }

    #[test]
    fn advance_time_to_rejects_past_target() {
        let scheduler = ManualScheduler::new();
        scheduler.advance_time(3);
        assert_eq!(
            scheduler.advance_time_to(2),
            Err(SchedulerError::TimeTravel {
                now_ms: 3,
                target_ms: 2
            })
        );
        assert_eq!(scheduler.advance_time_to(3), Ok(0));
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_scheduler_follows_paused_clock() {
        let scheduler = TokioScheduler::current();
        let (log, make) = recorder();
        scheduler.schedule_once(Duration::from_millis(500), make("fired"));
        assert_eq!(scheduler.pending(), 1);

        tokio::time::sleep(Duration::from_millis(499)).await;
        assert!(log.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(*log.lock().unwrap(), ["fired"]);
        assert_eq!(scheduler.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_tokio_timer_is_no_longer_pending() {
        fn failing_task() {
            panic!("timer failed");
        }

        let scheduler = TokioScheduler::current();
        scheduler.schedule_once(Duration::from_millis(10), Box::new(failing_task));
        assert_eq!(scheduler.pending(), 1);

        tokio::time::sleep(Duration::from_millis(11)).await;
        assert_eq!(scheduler.pending(), 0);
    }
}
