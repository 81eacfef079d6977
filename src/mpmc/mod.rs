mod bounded;
mod cond_bounded;
mod lock_free;
mod ring;

pub use bounded::BoundedQueue;
pub use cond_bounded::CondBoundedQueue;
pub use lock_free::LockFreeQueue;
