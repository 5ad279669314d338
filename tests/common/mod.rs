//! A platform backed by OS threads, for tests that really block.
#![allow(dead_code)]

use std::{
    cell::Cell,
    collections::HashMap,
    ops::Deref,
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering},
        Arc, Condvar, Mutex, MutexGuard,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use sleepq::{
    param::NTHREAD, DispatchGuard, Epoch, Interrupt, Priority, Scheduler, Signals, SleepQueues,
    Tid, TimerService,
};

/// Kernel thread of OS threads that never called `set_current`, such as the test's main
/// thread.
pub const OUTSIDER: Tid = Tid::new(NTHREAD - 1);

/// Kernel thread of the `Ticker`.
pub const TICKER: Tid = Tid::new(NTHREAD - 2);

thread_local! {
    static CURRENT: Cell<Option<Tid>> = const { Cell::new(None) };
}

/// Makes the calling OS thread run as kernel thread `td`.
pub fn set_current(td: Tid) {
    CURRENT.with(|cur| cur.set(Some(td)));
}

#[derive(Default)]
struct DispatchState {
    blocked: bool,
    blocks: usize,
    wakeups: usize,
}

#[derive(Default)]
struct ThreadState {
    state: Mutex<DispatchState>,
    cond: Condvar,
}

#[derive(Clone, Copy)]
enum CalloutState {
    Pending(Instant),
    Running,
}

struct Callout {
    gen: u64,
    epoch: Epoch,
    state: CalloutState,
}

pub struct TestPlatform {
    threads: Vec<ThreadState>,
    priorities: Vec<AtomicU8>,
    callouts: Mutex<HashMap<Tid, Callout>>,
    next_gen: AtomicU64,
    interrupts: Mutex<HashMap<Tid, Interrupt>>,
    woken: Mutex<Vec<Tid>>,
}

impl TestPlatform {
    pub fn new() -> Self {
        Self {
            threads: (0..NTHREAD).map(|_| ThreadState::default()).collect(),
            priorities: (0..NTHREAD).map(|_| AtomicU8::new(100)).collect(),
            callouts: Mutex::new(HashMap::new()),
            next_gen: AtomicU64::new(0),
            interrupts: Mutex::new(HashMap::new()),
            woken: Mutex::new(Vec::new()),
        }
    }

    fn dispatch_state(&self, td: Tid) -> MutexGuard<'_, DispatchState> {
        self.threads[td.index()].state.lock().unwrap()
    }

    pub fn set_priority(&self, td: Tid, pri: Priority) {
        self.priorities[td.index()].store(pri, Ordering::Relaxed);
    }

    /// Threads made runnable so far, in order.
    pub fn woken(&self) -> Vec<Tid> {
        self.woken.lock().unwrap().clone()
    }

    pub fn wakeups(&self, td: Tid) -> usize {
        self.dispatch_state(td).wakeups
    }

    pub fn blocks(&self, td: Tid) -> usize {
        self.dispatch_state(td).blocks
    }

    pub fn is_blocked(&self, td: Tid) -> bool {
        self.dispatch_state(td).blocked
    }

    /// Number of armed timers that have not fired.
    pub fn pending_timers(&self) -> usize {
        self.callouts
            .lock()
            .unwrap()
            .values()
            .filter(|c| matches!(c.state, CalloutState::Pending(_)))
            .count()
    }

    pub fn post_interrupt(&self, td: Tid, intr: Interrupt) {
        self.interrupts.lock().unwrap().insert(td, intr);
    }

    /// Starts the timer callback of `td` early. Finish it with `finish_fire`.
    pub fn begin_fire(&self, td: Tid) -> Option<Fire> {
        let mut callouts = self.callouts.lock().unwrap();
        let callout = callouts.get_mut(&td)?;
        match callout.state {
            CalloutState::Pending(_) => {
                callout.state = CalloutState::Running;
                Some(Fire {
                    td,
                    gen: callout.gen,
                    epoch: callout.epoch,
                })
            }
            CalloutState::Running => None,
        }
    }
}

/// A timer callback that has started.
#[derive(Clone, Copy, Debug)]
pub struct Fire {
    td: Tid,
    gen: u64,
    epoch: Epoch,
}

pub struct TestDispatch<'s> {
    td: Tid,
    platform: &'s TestPlatform,
    thread: &'s ThreadState,
    state: Option<MutexGuard<'s, DispatchState>>,
}

impl Scheduler for TestPlatform {
    type Dispatch<'s> = TestDispatch<'s>;

    fn current(&self) -> Tid {
        CURRENT.with(|cur| cur.get()).unwrap_or(OUTSIDER)
    }

    fn priority(&self, td: Tid) -> Priority {
        self.priorities[td.index()].load(Ordering::Relaxed)
    }

    fn lock_dispatch(&self, td: Tid) -> TestDispatch<'_> {
        let thread = &self.threads[td.index()];
        TestDispatch {
            td,
            platform: self,
            thread,
            state: Some(thread.state.lock().unwrap()),
        }
    }
}

impl DispatchGuard for TestDispatch<'_> {
    fn block(&mut self) {
        let mut state = self.state.take().unwrap();
        state.blocked = true;
        state.blocks += 1;
        let state = self
            .thread
            .cond
            .wait_while(state, |state| state.blocked)
            .unwrap();
        self.state = Some(state);
    }

    fn set_runnable(&mut self) {
        let state = self.state.as_mut().unwrap();
        assert!(state.blocked, "{:?} made runnable while running", self.td);
        state.blocked = false;
        state.wakeups += 1;
        self.platform.woken.lock().unwrap().push(self.td);
        self.thread.cond.notify_all();
    }

    fn lend_priority(&mut self, pri: Priority) {
        self.platform.set_priority(self.td, pri);
    }
}

impl TimerService for TestPlatform {
    fn arm_timeout(&self, td: Tid, epoch: Epoch, after: Duration) {
        let callout = Callout {
            gen: self.next_gen.fetch_add(1, Ordering::Relaxed),
            epoch,
            state: CalloutState::Pending(Instant::now() + after),
        };
        self.callouts.lock().unwrap().insert(td, callout);
    }

    fn cancel_timeout(&self, td: Tid) -> bool {
        let mut callouts = self.callouts.lock().unwrap();
        match callouts.get(&td) {
            Some(Callout {
                state: CalloutState::Pending(_),
                ..
            }) => {
                callouts.remove(&td);
                true
            }
            _ => false,
        }
    }
}

impl Signals for TestPlatform {
    fn pending_interrupt(&self, td: Tid) -> Option<Interrupt> {
        self.interrupts.lock().unwrap().get(&td).copied()
    }
}

/// Runs the timer callback started by `begin_fire`.
pub fn finish_fire(queues: &SleepQueues<TestPlatform>, fire: Fire) {
    queues.timeout(fire.td, fire.epoch);
    let mut callouts = queues.platform().callouts.lock().unwrap();
    if callouts.get(&fire.td).map_or(false, |c| c.gen == fire.gen) {
        callouts.remove(&fire.td);
    }
}

/// Runs the callbacks of all expired timers.
pub fn fire_expired(queues: &SleepQueues<TestPlatform>) {
    let now = Instant::now();
    let due: Vec<Fire> = {
        let mut callouts = queues.platform().callouts.lock().unwrap();
        callouts
            .iter_mut()
            .filter_map(|(&td, callout)| match callout.state {
                CalloutState::Pending(deadline) if deadline <= now => {
                    callout.state = CalloutState::Running;
                    Some(Fire {
                        td,
                        gen: callout.gen,
                        epoch: callout.epoch,
                    })
                }
                _ => None,
            })
            .collect()
    };
    for fire in due {
        finish_fire(queues, fire);
    }
}

/// Fires expired timers in the background until dropped.
pub struct Ticker {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Ticker {
    pub fn start<Q>(queues: &Q) -> Self
    where
        Q: Deref<Target = SleepQueues<TestPlatform>> + Clone + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let handle = {
            let stop = stop.clone();
            let queues = queues.clone();
            thread::spawn(move || {
                set_current(TICKER);
                while !stop.load(Ordering::Relaxed) {
                    fire_expired(&queues);
                    thread::sleep(Duration::from_micros(200));
                }
            })
        };
        Self {
            stop,
            handle: Some(handle),
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            handle.join().unwrap();
        }
    }
}

pub fn new_queues() -> Arc<SleepQueues<TestPlatform>> {
    Arc::new(SleepQueues::new(TestPlatform::new()))
}

/// Runs `f` on a new OS thread acting as kernel thread `td`.
pub fn spawn<Q, F, T>(queues: &Q, td: Tid, f: F) -> JoinHandle<T>
where
    Q: Deref<Target = SleepQueues<TestPlatform>> + Clone + Send + 'static,
    F: FnOnce(&SleepQueues<TestPlatform>) -> T + Send + 'static,
    T: Send + 'static,
{
    let queues = queues.clone();
    thread::spawn(move || {
        set_current(td);
        f(&queues)
    })
}

/// Waits until `td` has blocked `blocks` times in total and is blocked now.
pub fn wait_until_blocked(platform: &TestPlatform, td: Tid, blocks: usize) {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        {
            let state = platform.dispatch_state(td);
            if state.blocked && state.blocks >= blocks {
                return;
            }
        }
        assert!(Instant::now() < deadline, "{:?} never blocked", td);
        thread::sleep(Duration::from_millis(1));
    }
}
