use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::error;

/// A deferred unit of work. Errors surface wherever the scheduler runs it.
pub type Callback = Box<dyn FnOnce() -> anyhow::Result<()> + Send + 'static>;

/// Single-shot timer primitive: schedule a callback after a delay and get back
/// a handle that can revoke it.
pub trait Scheduler: Send + Sync + 'static {
    type Handle: Send + 'static;

    fn now(&self) -> Instant;
    fn schedule(&self, delay: Duration, callback: Callback) -> Self::Handle;
    fn cancel(&self, handle: Self::Handle);
}

/// Runs callbacks on the ambient tokio runtime.
///
/// `schedule` must be called from within a runtime context.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    type Handle = JoinHandle<()>;

    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    fn schedule(&self, delay: Duration, callback: Callback) -> Self::Handle {
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(err) = callback() {
                error!(%err, "deferred callback failed");
            }
        })
    }

    fn cancel(&self, handle: Self::Handle) {
        handle.abort();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManualHandle {
    due: Instant,
    seq: u64,
}

struct ManualState {
    origin: Instant,
    now: Instant,
    next_seq: u64,
    queue: BTreeMap<(Instant, u64), Callback>,
}

/// Virtual clock. Time only moves when [`ManualScheduler::advance`] is called,
/// and due callbacks run on the caller's thread in due-time order.
#[derive(Clone)]
pub struct ManualScheduler {
    state: Arc<Mutex<ManualState>>,
}

impl Default for ManualScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualScheduler {
    pub fn new() -> Self {
        let origin = Instant::now();
        Self {
            state: Arc::new(Mutex::new(ManualState {
                origin,
                now: origin,
                next_seq: 0,
                queue: BTreeMap::new(),
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Virtual time since the scheduler was created.
    pub fn elapsed(&self) -> Duration {
        let state = self.lock();
        state.now - state.origin
    }

    pub fn pending(&self) -> usize {
        self.lock().queue.len()
    }

    /// Moves the clock forward by `by`, running every callback that comes due.
    ///
    /// The clock sits at each callback's due time while it runs. If a callback
    /// fails, the clock stays at that due time and the error is returned; the
    /// remaining callbacks run on the next advance.
    pub fn advance(&self, by: Duration) -> anyhow::Result<()> {
        let target = self.lock().now + by;
        loop {
            let callback = {
                let mut state = self.lock();
                let due = match state.queue.first_key_value() {
                    Some((&(due, _), _)) if due <= target => due,
                    _ => {
                        state.now = target;
                        return Ok(());
                    }
                };
                state.now = due;
                match state.queue.pop_first() {
                    Some((_, callback)) => callback,
                    None => continue,
                }
            };
            callback()?;
        }
    }

    /// Advances to an absolute offset from the scheduler's origin. Offsets in
    /// the past leave the clock where it is.
    pub fn advance_to(&self, offset: Duration) -> anyhow::Result<()> {
        let by = offset.saturating_sub(self.elapsed());
        self.advance(by)
    }
}

impl Scheduler for ManualScheduler {
    type Handle = ManualHandle;

    fn now(&self) -> Instant {
        self.lock().now
    }

    fn schedule(&self, delay: Duration, callback: Callback) -> Self::Handle {
        let mut state = self.lock();
        let seq = state.next_seq;
        state.next_seq += 1;
        let due = state.now + delay;
        state.queue.insert((due, seq), callback);
        ManualHandle { due, seq }
    }

    fn cancel(&self, handle: Self::Handle) {
        self.lock().queue.remove(&(handle.due, handle.seq));
    }
}
