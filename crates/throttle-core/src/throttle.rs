use crate::scheduler::{Callback, Scheduler, TokioScheduler};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

type Action<A> = Box<dyn FnMut(A) -> anyhow::Result<()> + Send>;

/// Which trigger's arguments the trailing call receives when several triggers
/// land while it is pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrailingArgs {
    #[default]
    Latest,
    First,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleOptions {
    pub wait: Duration,
    pub leading: bool,
    pub trailing: bool,
    pub trailing_args: TrailingArgs,
}

impl ThrottleOptions {
    pub fn new(wait: Duration) -> Self {
        Self {
            wait,
            leading: true,
            trailing: true,
            trailing_args: TrailingArgs::Latest,
        }
    }

    pub fn leading(mut self, leading: bool) -> Self {
        self.leading = leading;
        self
    }

    pub fn trailing(mut self, trailing: bool) -> Self {
        self.trailing = trailing;
        self
    }

    pub fn trailing_args(mut self, policy: TrailingArgs) -> Self {
        self.trailing_args = policy;
        self
    }
}

/// What a single [`Throttle::invoke`] call decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invocation {
    /// The action ran synchronously inside `invoke`.
    Immediate,
    /// A trailing call was armed to run after `delay`.
    Scheduled { delay: Duration },
    /// A trailing call was already pending; this trigger rides on it.
    Coalesced,
    /// Inside the window with trailing calls disabled.
    Suppressed,
}

struct Pending<A, H> {
    id: u64,
    handle: H,
    args: A,
}

struct State<A, H> {
    last_fire: Option<Instant>,
    pending: Option<Pending<A, H>>,
    next_id: u64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn run<A>(action: &Mutex<Action<A>>, args: A) -> anyhow::Result<()> {
    let mut action = lock(action);
    (*action)(args)
}

/// Rate-limits calls to an action so it runs at most once per `wait` window.
///
/// Clones share the same window and pending call. Any state the action needs
/// (the "context" of a call) is captured by the closure itself.
///
/// A failing action surfaces differently depending on the edge it ran on: on
/// the immediate path the error is returned from [`Throttle::invoke`]; on the
/// trailing path it is handed to the scheduler running the callback.
///
/// The action may call back into its own throttle: the window is already open
/// while it runs, so the nested trigger is scheduled or dropped. With a zero
/// `wait` the nested trigger fires immediately and blocks on the running action.
pub struct Throttle<A, S: Scheduler = TokioScheduler> {
    options: ThrottleOptions,
    scheduler: Arc<S>,
    state: Arc<Mutex<State<A, S::Handle>>>,
    action: Arc<Mutex<Action<A>>>,
}

impl<A, S: Scheduler> Clone for Throttle<A, S> {
    fn clone(&self) -> Self {
        Self {
            options: self.options,
            scheduler: self.scheduler.clone(),
            state: self.state.clone(),
            action: self.action.clone(),
        }
    }
}

impl<A: Send + 'static> Throttle<A, TokioScheduler> {
    /// Builds a throttle whose trailing calls run on the ambient tokio runtime.
    ///
    /// # Panics
    ///
    /// [`Throttle::invoke`] panics if it has to schedule a trailing call while
    /// no tokio runtime is running on the current thread. Use
    /// [`Throttle::with_scheduler`] with another [`Scheduler`] outside a runtime.
    pub fn new<F>(action: F, options: ThrottleOptions) -> Self
    where
        F: FnMut(A) -> anyhow::Result<()> + Send + 'static,
    {
        Self::with_scheduler(action, options, TokioScheduler)
    }
}

impl<A: Send + 'static, S: Scheduler> Throttle<A, S> {
    pub fn with_scheduler<F>(action: F, options: ThrottleOptions, scheduler: S) -> Self
    where
        F: FnMut(A) -> anyhow::Result<()> + Send + 'static,
    {
        Self {
            options,
            scheduler: Arc::new(scheduler),
            state: Arc::new(Mutex::new(State {
                last_fire: None,
                pending: None,
                next_id: 0,
            })),
            action: Arc::new(Mutex::new(Box::new(action))),
        }
    }

    pub fn options(&self) -> &ThrottleOptions {
        &self.options
    }

    pub fn is_pending(&self) -> bool {
        lock(&self.state).pending.is_some()
    }

    /// Handles one trigger.
    pub fn invoke(&self, args: A) -> anyhow::Result<Invocation> {
        let mut state = lock(&self.state);
        let now = self.scheduler.now();

        // Trailing-only mode: the first trigger opens the window instead of firing.
        if state.last_fire.is_none() && !self.options.leading {
            state.last_fire = Some(now);
        }

        let remaining = match state.last_fire {
            Some(last) => self
                .options
                .wait
                .saturating_sub(now.saturating_duration_since(last)),
            None => Duration::ZERO,
        };

        if remaining.is_zero() {
            if let Some(pending) = state.pending.take() {
                self.scheduler.cancel(pending.handle);
            }
            // The window opens before the action runs; racing and nested
            // triggers must already see it.
            let previous = state.last_fire.replace(now);
            drop(state);
            debug!("throttle firing on leading edge");
            if let Err(err) = run(&self.action, args) {
                // Only a successful call opens a new window.
                let mut state = lock(&self.state);
                if state.last_fire == Some(now) {
                    state.last_fire = previous;
                }
                return Err(err);
            }
            return Ok(Invocation::Immediate);
        }

        if let Some(pending) = state.pending.as_mut() {
            if self.options.trailing_args == TrailingArgs::Latest {
                pending.args = args;
            }
            trace!("trigger coalesced into pending call");
            return Ok(Invocation::Coalesced);
        }

        if !self.options.trailing {
            trace!(remaining_ms = remaining.as_millis() as u64, "trigger suppressed");
            return Ok(Invocation::Suppressed);
        }

        let id = state.next_id;
        state.next_id += 1;
        let handle = self.scheduler.schedule(remaining, self.deferred(id));
        state.pending = Some(Pending { id, handle, args });
        debug!(delay_ms = remaining.as_millis() as u64, "trailing call scheduled");
        Ok(Invocation::Scheduled { delay: remaining })
    }

    /// Drops any pending trailing call and forgets the last fire time.
    pub fn cancel(&self) {
        let mut state = lock(&self.state);
        if let Some(pending) = state.pending.take() {
            self.scheduler.cancel(pending.handle);
            debug!("pending trailing call cancelled");
        }
        state.last_fire = None;
    }

    fn deferred(&self, id: u64) -> Callback {
        let state = self.state.clone();
        let action = self.action.clone();
        let scheduler = self.scheduler.clone();
        Box::new(move || {
            let args = {
                let mut state = lock(&state);
                // A timer that was already dispatched when it got cancelled or
                // replaced must not fire.
                let pending = match state.pending.take() {
                    Some(pending) if pending.id == id => pending,
                    other => {
                        state.pending = other;
                        return Ok(());
                    }
                };
                state.last_fire = Some(scheduler.now());
                pending.args
            };
            debug!("throttle firing on trailing edge");
            run(&action, args)
        })
    }
}
