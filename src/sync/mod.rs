mod cond;
mod semaphore;

pub use cond::{CancellableCond, DEFAULT_ORPHAN_GRACE};
pub use semaphore::Semaphore;
