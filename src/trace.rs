//! Diagnostics for the blocking primitives.
//!
//! Enable with `--features tracing`. Without the feature every macro below
//! expands to nothing.

/// Install a fmt subscriber filtered by `RUST_LOG`
/// (default `mpmc_queues=trace`).
///
/// Safe to call more than once; later calls are ignored.
#[cfg(feature = "tracing")]
pub fn init_tracing() {
   use tracing_subscriber::{fmt, prelude::*, EnvFilter};

   let filter =
      EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mpmc_queues=trace"));

   let _ = tracing_subscriber::registry()
      .with(
         fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_timer(fmt::time::uptime()),
      )
      .with(filter)
      .try_init();
}

#[cfg(not(feature = "tracing"))]
pub const fn init_tracing() {}

#[cfg(feature = "tracing")]
pub(crate) use tracing::{debug, trace, warn};

#[cfg(not(feature = "tracing"))]
macro_rules! trace_noop {
   ($($arg:tt)*) => {};
}

#[cfg(not(feature = "tracing"))]
macro_rules! debug_noop {
   ($($arg:tt)*) => {};
}

#[cfg(not(feature = "tracing"))]
macro_rules! warn_noop {
   ($($arg:tt)*) => {};
}

#[cfg(not(feature = "tracing"))]
pub(crate) use debug_noop as debug;
#[cfg(not(feature = "tracing"))]
pub(crate) use trace_noop as trace;
#[cfg(not(feature = "tracing"))]
pub(crate) use warn_noop as warn;
