// Bounded MPMC queue built on two cancellable conditions instead of
// semaphores. Same contract as `BoundedQueue`.

use crate::context::Context;
use crate::error::{Error, TryEnqueueError};
use crate::mpmc::ring::Ring;
use crate::sync::CancellableCond;
use crate::Queue;
use std::{
   fmt,
   sync::{Mutex, MutexGuard, PoisonError},
   time::Duration,
};

pub struct CondBoundedQueue<T> {
   ring: Mutex<Ring<T>>,
   not_full: CancellableCond,
   not_empty: CancellableCond,
}

impl<T> CondBoundedQueue<T> {
   pub fn new(capacity: usize) -> Self {
      Self::with_parts(capacity, CancellableCond::new(), CancellableCond::new())
   }

   /// See [`CancellableCond::with_orphan_grace`].
   pub fn with_orphan_grace(capacity: usize, grace: Duration) -> Self {
      Self::with_parts(
         capacity,
         CancellableCond::with_orphan_grace(grace),
         CancellableCond::with_orphan_grace(grace),
      )
   }

   fn with_parts(capacity: usize, not_full: CancellableCond, not_empty: CancellableCond) -> Self {
      assert!(capacity > 0, "capacity must be at least 1");
      Self {
         ring: Mutex::new(Ring::with_capacity(capacity)),
         not_full,
         not_empty,
      }
   }

   #[inline]
   fn lock(&self) -> MutexGuard<'_, Ring<T>> {
      self.ring.lock().unwrap_or_else(PoisonError::into_inner)
   }

   pub fn enqueue(&self, ctx: &Context, value: T) -> Result<(), Error> {
      let mut woken = false;
      loop {
         let mut ring = self.lock();
         if let Err(err) = ctx.check() {
            drop(ring);
            // a wakeup we consumed but cannot use belongs to another producer
            if woken {
               self.not_full.notify_one();
            }
            return Err(err);
         }
         if !ring.is_full() {
            ring.push(value);
            drop(ring);
            self.not_empty.notify_one();
            return Ok(());
         }
         self.not_full.wait(ring, ctx)?;
         woken = true;
      }
   }

   pub fn dequeue(&self, ctx: &Context) -> Result<T, Error> {
      let mut woken = false;
      loop {
         let mut ring = self.lock();
         if let Err(err) = ctx.check() {
            drop(ring);
            if woken {
               self.not_empty.notify_one();
            }
            return Err(err);
         }
         if !ring.is_empty() {
            let value = ring.pop();
            drop(ring);
            self.not_full.notify_one();
            return Ok(value);
         }
         self.not_empty.wait(ring, ctx)?;
         woken = true;
      }
   }

   pub fn try_enqueue(&self, value: T) -> Result<(), TryEnqueueError<T>> {
      let mut ring = self.lock();
      if ring.is_full() {
         return Err(TryEnqueueError(value));
      }
      ring.push(value);
      drop(ring);
      self.not_empty.notify_one();
      Ok(())
   }

   pub fn try_dequeue(&self) -> Result<T, Error> {
      let mut ring = self.lock();
      if ring.is_empty() {
         return Err(Error::Empty);
      }
      let value = ring.pop();
      drop(ring);
      self.not_full.notify_one();
      Ok(value)
   }

   /// Drop every queued item and wake all blocked producers.
   pub fn clear(&self) -> usize {
      let mut ring = self.lock();
      let mut dropped = 0;
      while !ring.is_empty() {
         drop(ring.pop());
         dropped += 1;
      }
      drop(ring);
      if dropped > 0 {
         self.not_full.notify_all();
      }
      dropped
   }

   pub fn is_empty(&self) -> bool {
      self.lock().is_empty()
   }

   pub fn len(&self) -> usize {
      self.lock().len()
   }

   pub fn capacity(&self) -> usize {
      self.lock().capacity()
   }
}

impl<T: Send> Queue<T> for CondBoundedQueue<T> {
   fn enqueue(&self, ctx: &Context, item: T) -> Result<(), Error> {
      CondBoundedQueue::enqueue(self, ctx, item)
   }

   fn dequeue(&self, ctx: &Context) -> Result<T, Error> {
      CondBoundedQueue::dequeue(self, ctx)
   }

   fn is_empty(&self) -> bool {
      CondBoundedQueue::is_empty(self)
   }

   fn clear(&self) -> Result<usize, Error> {
      Ok(CondBoundedQueue::clear(self))
   }

   fn size(&self) -> usize {
      self.len()
   }
}

impl<T> fmt::Debug for CondBoundedQueue<T> {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_struct("CondBoundedQueue")
         .field("ring", &*self.lock())
         .field("not_full", &self.not_full)
         .field("not_empty", &self.not_empty)
         .finish()
   }
}

#[cfg(test)]
mod tests {
   use super::*;
   use std::sync::Arc;
   use std::thread::{self, JoinHandle};
   use std::time::Instant;

   const ROUNDS: usize = 12;

   fn wait_for_waiters(cond: &CancellableCond, n: usize) {
      let start = Instant::now();
      while cond.waiters() != n {
         assert!(start.elapsed() < Duration::from_secs(5), "expected {n} waiters");
         thread::sleep(Duration::from_millis(1));
      }
   }

   fn queue(capacity: usize) -> Arc<CondBoundedQueue<u32>> {
      Arc::new(CondBoundedQueue::with_orphan_grace(capacity, Duration::from_millis(100)))
   }

   // Two producers park on a full queue. One slot is freed with a single
   // notify while the ring is held, so whichever producer took the wakeup is
   // stuck on the lock when `a` is cancelled. If that was `a`, it must pass
   // the wakeup on or `b` sleeps until its deadline.
   #[test]
   fn test_woken_then_cancelled_producer_passes_wakeup_on() {
      for round in 0..ROUNDS {
         let q = queue(1);
         q.try_enqueue(0).unwrap();

         let (ctx_a, cancel_a) = Context::with_cancel(&Context::background());
         let ctx_b = Context::with_timeout(&Context::background(), Duration::from_secs(2));

         let a: JoinHandle<Result<(), Error>> = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.enqueue(&ctx_a, 1))
         };
         let b: JoinHandle<Result<(), Error>> = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.enqueue(&ctx_b, 2))
         };
         wait_for_waiters(&q.not_full, 2);

         let mut ring = q.lock();
         assert_eq!(ring.pop(), 0);
         assert!(q.not_full.notify_one());
         thread::sleep(Duration::from_millis(50));
         cancel_a.cancel();
         drop(ring);

         assert_eq!(b.join().unwrap(), Ok(()), "round {round}: producer b never woke");
         assert!(a.join().unwrap().is_err());
         assert_eq!(q.try_dequeue(), Ok(2));
      }
   }

   #[test]
   fn test_woken_then_cancelled_consumer_passes_wakeup_on() {
      for round in 0..ROUNDS {
         let q = queue(1);

         let (ctx_a, cancel_a) = Context::with_cancel(&Context::background());
         let ctx_b = Context::with_timeout(&Context::background(), Duration::from_secs(2));

         let a: JoinHandle<Result<u32, Error>> = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.dequeue(&ctx_a))
         };
         let b: JoinHandle<Result<u32, Error>> = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.dequeue(&ctx_b))
         };
         wait_for_waiters(&q.not_empty, 2);

         let mut ring = q.lock();
         ring.push(9);
         assert!(q.not_empty.notify_one());
         thread::sleep(Duration::from_millis(50));
         cancel_a.cancel();
         drop(ring);

         assert_eq!(b.join().unwrap(), Ok(9), "round {round}: consumer b never woke");
         assert!(a.join().unwrap().is_err());
         assert!(q.is_empty());
      }
   }
}
