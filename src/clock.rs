//! Time abstraction for the rendezvous store.
//!
//! Store logic never calls `OffsetDateTime::now_utc()` or `tokio::time::sleep`
//! directly so that the eviction scheduling in [`crate::store`] can be driven
//! deterministically in tests.

use std::fmt::Debug;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration as StdDuration;

use time::{Duration, OffsetDateTime};

/// A monotonic time source that can also schedule a one-shot deferred task.
///
/// `schedule` fires `task` no earlier than `delay` from now. The task runs
/// synchronously (it only ever takes the store's mutex), so implementations
/// never need to hand back a future.
pub trait Clock: Debug + Send + Sync {
    fn now(&self) -> OffsetDateTime;
    fn schedule(&self, delay: Duration, task: Box<dyn FnOnce() + Send>);
}

/// Production clock backed by the system wall clock and the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }

    fn schedule(&self, delay: Duration, task: Box<dyn FnOnce() + Send>) {
        let delay = std_duration(delay);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task();
        });
    }
}

fn std_duration(d: Duration) -> StdDuration {
    d.try_into().unwrap_or(StdDuration::ZERO)
}

/// A virtual clock for tests. `advance` moves time forward and runs any
/// tasks that became due, including tasks scheduled by those tasks.
#[derive(Debug, Clone)]
pub struct FakeClock {
    state: Arc<StdMutex<FakeClockState>>,
}

struct FakeClockState {
    now: OffsetDateTime,
    pending: Vec<(OffsetDateTime, Box<dyn FnOnce() + Send>)>,
}

impl Debug for FakeClockState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeClockState")
            .field("now", &self.now)
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl FakeClock {
    pub fn new(start: OffsetDateTime) -> Self {
        Self {
            state: Arc::new(StdMutex::new(FakeClockState {
                now: start,
                pending: Vec::new(),
            })),
        }
    }

    /// Moves virtual time forward by `delta`, running any tasks that are
    /// now due (including ones newly scheduled by those tasks).
    ///
    /// Tasks fire in due-time order, with `now` set to each task's own
    /// scheduled time as it runs — not jumped straight to `target` — so a
    /// task that reschedules itself at `now()+delay` lands inside the same
    /// `advance` window rather than past it.
    pub fn advance(&self, delta: Duration) {
        let target = self.state.lock().unwrap().now + delta;

        loop {
            let due = {
                let mut state = self.state.lock().unwrap();
                let idx = state
                    .pending
                    .iter()
                    .enumerate()
                    .filter(|(_, (at, _))| *at <= target)
                    .min_by_key(|(_, (at, _))| *at)
                    .map(|(i, _)| i);
                idx.map(|i| state.pending.remove(i))
            };

            match due {
                Some((at, task)) => {
                    self.state.lock().unwrap().now = at;
                    task();
                }
                None => break,
            }
        }

        self.state.lock().unwrap().now = target;
    }
}

impl Clock for FakeClock {
    fn now(&self) -> OffsetDateTime {
        self.state.lock().unwrap().now
    }

    fn schedule(&self, delay: Duration, task: Box<dyn FnOnce() + Send>) {
        let mut state = self.state.lock().unwrap();
        let at = state.now + delay;
        state.pending.push((at, task));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn fake_clock_runs_due_tasks_on_advance() {
        let clock = FakeClock::new(OffsetDateTime::UNIX_EPOCH);
        let ran = Arc::new(AtomicUsize::new(0));

        let ran2 = ran.clone();
        clock.schedule(Duration::seconds(1), Box::new(move || {
            ran2.fetch_add(1, Ordering::SeqCst);
        }));

        clock.advance(Duration::milliseconds(500));
        assert_eq!(ran.load(Ordering::SeqCst), 0);

        clock.advance(Duration::milliseconds(500));
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn fake_clock_runs_chained_schedules() {
        let clock = FakeClock::new(OffsetDateTime::UNIX_EPOCH);
        let ran = Arc::new(AtomicUsize::new(0));

        let clock2 = clock.clone();
        let ran2 = ran.clone();
        clock.schedule(
            Duration::seconds(1),
            Box::new(move || {
                ran2.fetch_add(1, Ordering::SeqCst);
                let ran3 = ran2.clone();
                clock2.schedule(Duration::seconds(1), Box::new(move || {
                    ran3.fetch_add(1, Ordering::SeqCst);
                }));
            }),
        );

        clock.advance(Duration::seconds(3));
        assert_eq!(ran.load(Ordering::SeqCst), 2);
    }
}
