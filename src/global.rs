use spin::Once;

use crate::{platform::Platform, sleepq::SleepQueues};

/// A process-wide sleep queue table, initialized once at startup.
///
/// # Examples
///
/// ```rust,ignore
/// static SLEEPQ: GlobalSleepQueues<KernelPlatform> = GlobalSleepQueues::new();
///
/// fn kernel_main() {
///     SLEEPQ.init(KernelPlatform::new());
///     // ...
/// }
/// ```
pub struct GlobalSleepQueues<P> {
    inner: Once<SleepQueues<P>>,
}

impl<P: Platform> GlobalSleepQueues<P> {
    pub const fn new() -> Self {
        Self { inner: Once::new() }
    }

    /// Creates the table. Must be called exactly once, before any thread sleeps.
    pub fn init(&self, platform: P) -> &SleepQueues<P> {
        let mut fresh = false;
        let queues = self.inner.call_once(|| {
            fresh = true;
            SleepQueues::new(platform)
        });
        assert!(fresh, "sleepq: initialized twice");
        queues
    }

    /// Returns the table. Panics if it was not initialized yet.
    pub fn get(&self) -> &SleepQueues<P> {
        match self.inner.get() {
            Some(queues) => queues,
            None => panic!("sleepq: used before initialization"),
        }
    }

    /// Returns the table, or `None` if it was not initialized yet.
    pub fn try_get(&self) -> Option<&SleepQueues<P>> {
        self.inner.get()
    }
}
