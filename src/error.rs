// Error taxonomy shared by every queue in the crate.
//
// Impossible states (ring size outside [0, C], permit over-release) are not
// represented here: they are bugs and panic at the point of detection.

use std::fmt;
use std::io;
use thiserror::Error;

/// Why a blocking operation gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum Cancellation {
   /// The token was cancelled through its [`CancelHandle`](crate::CancelHandle).
   #[error("context canceled")]
   Canceled,
   /// The token's deadline passed.
   #[error("context deadline exceeded")]
   DeadlineExceeded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
   /// No element is available (unbounded dequeue, or a non-blocking dequeue).
   #[error("queue is empty")]
   Empty,
   /// No slot is available; only raised by non-blocking enqueues.
   #[error("queue is full")]
   Full,
   /// The supplied [`Context`](crate::Context) fired before the operation
   /// could complete. Nothing was mutated.
   #[error("operation cancelled: {0}")]
   Cancelled(#[from] Cancellation),
   /// A cancellable wait could not start its waiter thread.
   #[error("failed to spawn waiter thread: {0}")]
   SpawnFailed(io::ErrorKind),
}

impl Error {
   /// True for [`Error::Cancelled`], so callers can tell a timeout apart
   /// from steady-state backpressure.
   pub fn is_cancellation(&self) -> bool {
      matches!(self, Error::Cancelled(_))
   }
}

/// Rejected non-blocking enqueue. The value is handed back to the caller.
#[derive(PartialEq, Eq)]
pub struct TryEnqueueError<T>(pub T);

impl<T> TryEnqueueError<T> {
   pub fn into_inner(self) -> T {
      self.0
   }
}

impl<T> fmt::Debug for TryEnqueueError<T> {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.write_str("TryEnqueueError(..)")
   }
}

impl<T> fmt::Display for TryEnqueueError<T> {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      fmt::Display::fmt(&Error::Full, f)
   }
}

impl<T> std::error::Error for TryEnqueueError<T> {}

impl<T> From<TryEnqueueError<T>> for Error {
   fn from(_: TryEnqueueError<T>) -> Self {
      Error::Full
   }
}
