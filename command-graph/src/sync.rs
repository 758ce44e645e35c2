//! Synchronization primitives: sync points inside a command buffer, and completion signals
//! between submissions and the host.
//!
//! A [`SyncPoint`] orders commands *within* one command buffer. It is only meaningful to the
//! command buffer that issued it.
//!
//! A [`CompletionSignal`] orders work *across* submissions. Every enqueue of a command buffer
//! returns one, and signals can be passed in the wait list of later enqueues. The host can block on
//! a signal with [`CompletionSignal::wait`]; nothing inside this crate ever blocks on one
//! implicitly.

use parking_lot::{Condvar, Mutex};
use std::{
    borrow::Cow,
    error::Error,
    fmt,
    num::NonZeroU64,
    sync::Arc,
    time::{Duration, Instant},
};

/// Marks the point after which the effects of a recorded command are visible to the commands that
/// wait on it.
///
/// Sync points are issued in strictly increasing order by a command buffer and are never reused.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SyncPoint {
    buffer: NonZeroU64,
    value: u32,
}

impl SyncPoint {
    pub(crate) const fn new(buffer: NonZeroU64, index: usize) -> Self {
        SyncPoint {
            buffer,
            value: index as u32 + 1,
        }
    }

    /// Returns the numeric value of the sync point. The first command recorded into a buffer
    /// produces the value `1`.
    #[inline]
    pub fn value(self) -> u32 {
        self.value
    }

    pub(crate) fn buffer(self) -> NonZeroU64 {
        self.buffer
    }

    /// Returns the index of the command that produced this sync point.
    pub(crate) fn index(self) -> usize {
        self.value as usize - 1
    }
}

impl fmt::Debug for SyncPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncPoint")
            .field("buffer", &self.buffer)
            .field("value", &self.value)
            .finish()
    }
}

/// Resolves once the work it was issued for has finished executing, successfully or not.
///
/// Cloning a signal produces another handle to the same underlying state.
#[derive(Clone)]
pub struct CompletionSignal {
    inner: Arc<SignalInner>,
}

struct SignalInner {
    state: Mutex<SignalStatus>,
    condvar: Condvar,
}

/// The state of a [`CompletionSignal`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SignalStatus {
    /// The work has not finished yet.
    Pending,

    /// The work finished successfully.
    Complete,

    /// The work finished with an error.
    Failed(ExecutionError),
}

impl CompletionSignal {
    pub(crate) fn pending() -> Self {
        CompletionSignal {
            inner: Arc::new(SignalInner {
                state: Mutex::new(SignalStatus::Pending),
                condvar: Condvar::new(),
            }),
        }
    }

    /// Returns a signal that has already completed successfully.
    #[must_use]
    pub fn signaled() -> Self {
        let signal = Self::pending();
        signal.resolve(Ok(()));

        signal
    }

    /// Returns the current status of the signal without blocking.
    #[inline]
    pub fn status(&self) -> SignalStatus {
        self.inner.state.lock().clone()
    }

    /// Returns `true` if the signal has resolved, successfully or not.
    #[inline]
    pub fn is_resolved(&self) -> bool {
        !matches!(*self.inner.state.lock(), SignalStatus::Pending)
    }

    /// Returns whether `self` and `other` are handles to the same signal.
    #[inline]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Resolves the signal. Returns `false` if it was already resolved, in which case the previous
    /// result is kept.
    pub(crate) fn resolve(&self, result: Result<(), ExecutionError>) -> bool {
        let mut state = self.inner.state.lock();

        if !matches!(*state, SignalStatus::Pending) {
            return false;
        }

        *state = match result {
            Ok(()) => SignalStatus::Complete,
            Err(err) => SignalStatus::Failed(err),
        };
        drop(state);
        self.inner.condvar.notify_all();

        true
    }

    /// Blocks until the signal resolves, or at least until `timeout` has elapsed.
    ///
    /// A timeout of `None` waits indefinitely. A timeout of zero only polls.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<(), WaitError> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut state = self.inner.state.lock();

        loop {
            match &*state {
                SignalStatus::Complete => return Ok(()),
                SignalStatus::Failed(err) => return Err(WaitError::Failed(err.clone())),
                SignalStatus::Pending => {}
            }

            match deadline {
                Some(deadline) => {
                    if self
                        .inner
                        .condvar
                        .wait_until(&mut state, deadline)
                        .timed_out()
                        && matches!(*state, SignalStatus::Pending)
                    {
                        return Err(WaitError::Timeout);
                    }
                }
                None => self.inner.condvar.wait(&mut state),
            }
        }
    }

    /// Blocks until every signal in `signals` resolves, or at least until `timeout` has elapsed.
    ///
    /// Returns the first failure encountered, in iteration order.
    pub fn wait_all<'a>(
        signals: impl IntoIterator<Item = &'a CompletionSignal>,
        timeout: Option<Duration>,
    ) -> Result<(), WaitError> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);

        for signal in signals {
            let remaining =
                deadline.map(|deadline| deadline.saturating_duration_since(Instant::now()));
            signal.wait(remaining)?;
        }

        Ok(())
    }
}

impl fmt::Debug for CompletionSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionSignal")
            .field("status", &*self.inner.state.lock())
            .finish()
    }
}

/// A [`CompletionSignal`] that is resolved by the host rather than by an executor.
///
/// Putting a user signal in the wait list of an enqueue holds that submission back until the host
/// decides to release it.
#[derive(Debug)]
pub struct UserSignal {
    signal: CompletionSignal,
}

impl UserSignal {
    /// Creates a new pending `UserSignal`.
    #[must_use]
    pub fn new() -> Self {
        UserSignal {
            signal: CompletionSignal::pending(),
        }
    }

    /// Returns a handle to the signal, for use in wait lists.
    #[inline]
    pub fn signal(&self) -> CompletionSignal {
        self.signal.clone()
    }

    /// Resolves the signal successfully. Returns `false` if it was already resolved.
    #[inline]
    pub fn set_complete(&self) -> bool {
        self.signal.resolve(Ok(()))
    }

    /// Resolves the signal with `error`. Returns `false` if it was already resolved.
    #[inline]
    pub fn set_failed(&self, error: ExecutionError) -> bool {
        self.signal.resolve(Err(error))
    }
}

impl Default for UserSignal {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

/// Error that an executor can report for a submission.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExecutionError {
    /// The executor dropped the submission without reporting a result.
    Abandoned,

    /// A signal in the wait list of the submission failed, so the submission was not executed.
    DependencyFailed,

    /// The device failed while executing the submission.
    Device(Cow<'static, str>),
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Abandoned => f.write_str("the submission was dropped without being executed"),
            Self::DependencyFailed => {
                f.write_str("a signal the submission was waiting on resolved with an error")
            }
            Self::Device(message) => write!(f, "the device failed: {message}"),
        }
    }
}

impl Error for ExecutionError {}

/// Error that can happen when waiting on a [`CompletionSignal`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WaitError {
    /// The timeout elapsed before the signal resolved.
    Timeout,

    /// The signal resolved with an error.
    Failed(ExecutionError),
}

impl fmt::Display for WaitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => f.write_str("the timeout elapsed before the signal resolved"),
            Self::Failed(_) => f.write_str("the signal resolved with an error"),
        }
    }
}

impl Error for WaitError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Failed(err) => Some(err),
            Self::Timeout => None,
        }
    }
}
