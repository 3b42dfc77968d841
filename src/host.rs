//! The host application's cooperative main thread.
//!
//! Everything here is `!Send` on purpose: host state may only be touched from
//! the thread that created the [`HostScheduler`]. Recurring timers are the
//! only way work gets onto that thread, which is how the poller drains the
//! bridge without ever owning a thread of its own.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use tracing::{trace, warn};

/// Handle returned by [`HostScheduler::start_timer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(u64);

type TimerCallback<H> = Box<dyn FnMut(&mut H)>;

struct TimerSlot<H> {
    interval: Duration,
    next_due: Cell<Instant>,
    active: Cell<bool>,
    callback: RefCell<TimerCallback<H>>,
}

struct SchedulerInner<H> {
    next_id: u64,
    timers: BTreeMap<TimerId, Rc<TimerSlot<H>>>,
}

/// Recurring timers bound to the host thread. Cloning shares the same timer set.
pub struct HostScheduler<H> {
    inner: Rc<RefCell<SchedulerInner<H>>>,
    owner: ThreadId,
}

impl<H> Clone for HostScheduler<H> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            owner: self.owner,
        }
    }
}

impl<H> std::fmt::Debug for HostScheduler<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostScheduler")
            .field("owner", &self.owner)
            .field("active_timers", &self.active_timers())
            .finish()
    }
}

impl<H> Default for HostScheduler<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> HostScheduler<H> {
    /// Binds a new scheduler to the calling thread.
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(SchedulerInner {
                next_id: 1,
                timers: BTreeMap::new(),
            })),
            owner: thread::current().id(),
        }
    }

    pub fn owner(&self) -> ThreadId {
        self.owner
    }

    pub fn assert_host_thread(&self) {
        debug_assert_eq!(
            thread::current().id(),
            self.owner,
            "host state touched off the host thread"
        );
    }

    /// Schedule `callback` every `interval`, first firing one interval from now.
    pub fn start_timer<F>(&self, interval: Duration, callback: F) -> TimerId
    where
        F: FnMut(&mut H) + 'static,
    {
        self.assert_host_thread();
        let mut inner = self.inner.borrow_mut();
        let id = TimerId(inner.next_id);
        inner.next_id += 1;
        inner.timers.insert(
            id,
            Rc::new(TimerSlot {
                interval,
                next_due: Cell::new(Instant::now() + interval),
                active: Cell::new(true),
                callback: RefCell::new(Box::new(callback)),
            }),
        );
        trace!(timer = id.0, ?interval, "timer started");
        id
    }

    /// Cancel a timer. Returns `false` if it was not running.
    pub fn stop_timer(&self, id: TimerId) -> bool {
        self.assert_host_thread();
        match self.inner.borrow_mut().timers.remove(&id) {
            Some(slot) => {
                // a callback that is currently running sees this and is not rescheduled
                slot.active.set(false);
                trace!(timer = id.0, "timer stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self, id: TimerId) -> bool {
        self.inner.borrow().timers.contains_key(&id)
    }

    pub fn active_timers(&self) -> usize {
        self.inner.borrow().timers.len()
    }

    /// Earliest instant at which some timer wants to run.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.inner
            .borrow()
            .timers
            .values()
            .map(|slot| slot.next_due.get())
            .min()
    }

    /// Run every timer whose deadline is at or before `now`. Returns how many fired.
    pub fn fire_due(&self, host: &mut H, now: Instant) -> usize {
        self.fire_matching(host, |slot| slot.next_due.get() <= now)
    }

    /// Run every timer once regardless of its deadline.
    pub fn fire_all(&self, host: &mut H) -> usize {
        self.fire_matching(host, |_| true)
    }

    fn fire_matching(&self, host: &mut H, due: impl Fn(&TimerSlot<H>) -> bool) -> usize {
        self.assert_host_thread();
        // snapshot first: callbacks may start or stop timers
        let ready: Vec<Rc<TimerSlot<H>>> = self
            .inner
            .borrow()
            .timers
            .values()
            .filter(|slot| due(slot))
            .cloned()
            .collect();

        let mut fired = 0;
        for slot in ready {
            if !slot.active.get() {
                continue;
            }
            let Ok(mut callback) = slot.callback.try_borrow_mut() else {
                warn!("timer callback re-entered; skipping");
                continue;
            };
            (*callback)(host);
            fired += 1;
            slot.next_due.set(Instant::now() + slot.interval);
        }
        fired
    }
}

/// Owns the host state and turns the scheduler's timers into a run loop.
pub struct HostEventLoop<H> {
    state: H,
    scheduler: HostScheduler<H>,
}

impl<H> HostEventLoop<H> {
    pub fn new(state: H) -> Self {
        Self {
            state,
            scheduler: HostScheduler::new(),
        }
    }

    pub fn scheduler(&self) -> &HostScheduler<H> {
        &self.scheduler
    }

    pub fn state(&self) -> &H {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut H {
        &mut self.state
    }

    pub fn into_state(self) -> H {
        self.state
    }

    /// Fire whatever is due right now without sleeping.
    pub fn turn(&mut self) -> usize {
        self.scheduler.fire_due(&mut self.state, Instant::now())
    }

    /// Loop until `done` says stop or `limit` elapses. Sleeps until the next
    /// timer deadline in between, capped so `done` is re-checked regularly.
    /// Returns `true` if `done` ended the loop.
    pub fn run_until<F>(&mut self, mut done: F, limit: Duration) -> bool
    where
        F: FnMut(&mut H) -> bool,
    {
        const MAX_IDLE: Duration = Duration::from_millis(50);
        let end = Instant::now() + limit;
        loop {
            self.turn();
            if done(&mut self.state) {
                return true;
            }
            let now = Instant::now();
            if now >= end {
                return false;
            }
            let wake = self
                .scheduler
                .next_deadline()
                .unwrap_or(now + MAX_IDLE)
                .min(now + MAX_IDLE)
                .min(end);
            if wake > now {
                thread::sleep(wake - now);
            }
        }
    }

    pub fn run_for(&mut self, duration: Duration) {
        self.run_until(|_| false, duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_fires_repeatedly_until_stopped() {
        let mut event_loop = HostEventLoop::new(0u32);
        let id = event_loop
            .scheduler()
            .start_timer(Duration::from_millis(5), |count: &mut u32| *count += 1);

        assert!(event_loop.run_until(|count| *count >= 3, Duration::from_secs(2)));
        assert!(event_loop.scheduler().stop_timer(id));
        assert!(!event_loop.scheduler().is_active(id));

        let before = *event_loop.state();
        event_loop.run_for(Duration::from_millis(30));
        assert_eq!(*event_loop.state(), before);
    }

    #[test]
    fn timer_does_not_fire_before_its_interval() {
        let mut event_loop = HostEventLoop::new(0u32);
        event_loop
            .scheduler()
            .start_timer(Duration::from_secs(60), |count: &mut u32| *count += 1);
        assert_eq!(event_loop.turn(), 0);
        assert_eq!(*event_loop.state(), 0);
    }

    #[test]
    fn fire_all_ignores_deadlines() {
        let mut event_loop = HostEventLoop::new(Vec::<&'static str>::new());
        let scheduler = event_loop.scheduler().clone();
        scheduler.start_timer(Duration::from_secs(60), |log: &mut Vec<&str>| log.push("a"));
        scheduler.start_timer(Duration::from_secs(60), |log: &mut Vec<&str>| log.push("b"));
        assert_eq!(scheduler.fire_all(event_loop.state_mut()), 2);
        assert_eq!(event_loop.state(), &vec!["a", "b"]);
    }

    #[test]
    fn stopping_unknown_timer_is_harmless() {
        let scheduler: HostScheduler<()> = HostScheduler::new();
        let id = scheduler.start_timer(Duration::from_millis(1), |_| {});
        assert!(scheduler.stop_timer(id));
        assert!(!scheduler.stop_timer(id));
        assert_eq!(scheduler.active_timers(), 0);
    }

    #[test]
    fn callback_can_stop_its_own_timer() {
        let scheduler: HostScheduler<u32> = HostScheduler::new();
        let id_cell: Rc<Cell<Option<TimerId>>> = Rc::new(Cell::new(None));
        let handle = scheduler.clone();
        let own_id = id_cell.clone();
        let id = scheduler.start_timer(Duration::from_millis(1), move |n: &mut u32| {
            *n += 1;
            if let Some(id) = own_id.get() {
                handle.stop_timer(id);
            }
        });
        id_cell.set(Some(id));

        let mut n = 0;
        scheduler.fire_all(&mut n);
        scheduler.fire_all(&mut n);
        assert_eq!(n, 1);
        assert_eq!(scheduler.active_timers(), 0);
    }
}
