pub mod mpmc;
pub mod sync;

mod context;
mod error;
mod trace;

pub use context::{CancelHandle, Context};
pub use error::{Cancellation, Error, TryEnqueueError};
pub use mpmc::{BoundedQueue, CondBoundedQueue, LockFreeQueue};
pub use sync::{CancellableCond, Semaphore, DEFAULT_ORPHAN_GRACE};
pub use trace::init_tracing;

/// Common interface for all queues.
///
/// Blocking queues honour `ctx` in `enqueue`/`dequeue`; the lock-free queue
/// never blocks and ignores it.
pub trait Queue<T: Send>: Send + Sync {
   /// Fails with [`Error::Cancelled`] if `ctx` fires before a slot frees up.
   fn enqueue(&self, ctx: &Context, item: T) -> Result<(), Error>;
   /// Fails with [`Error::Empty`] (non-blocking queues) or
   /// [`Error::Cancelled`] (blocking queues).
   fn dequeue(&self, ctx: &Context) -> Result<T, Error>;

   /// Snapshot; may be stale under concurrent mutation.
   fn is_empty(&self) -> bool;
   /// Drop the queued items, returning how many were dropped.
   fn clear(&self) -> Result<usize, Error>;
   /// Snapshot; may be stale under concurrent mutation.
   fn size(&self) -> usize;
}
