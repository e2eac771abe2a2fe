pub mod config;
pub mod scheduler;
pub mod throttle;
pub mod util;

pub use config::{ThrottleFile, DEFAULT_WAIT_MS};
pub use scheduler::{Callback, ManualHandle, ManualScheduler, Scheduler, TokioScheduler};
pub use throttle::{Invocation, Throttle, ThrottleOptions, TrailingArgs};
