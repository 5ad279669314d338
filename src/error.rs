use thiserror::Error;

/// How an interrupted sleep should be treated by the operation that slept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Interrupt {
    /// The interrupted operation should be restarted once the interruption has been handled.
    Restart = 1,
    /// The interrupted operation should be abandoned.
    Abort = 2,
}

impl Interrupt {
    pub(crate) const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(Self::Restart),
            2 => Some(Self::Abort),
            _ => None,
        }
    }
}

/// Why a sleep ended without a wakeup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WaitError {
    /// The timeout registered with `set_timeout` expired first.
    #[error("sleep timed out")]
    TimedOut,
    /// An asynchronous interruption aborted the sleep.
    #[error("sleep interrupted ({0:?})")]
    Interrupted(Interrupt),
}
