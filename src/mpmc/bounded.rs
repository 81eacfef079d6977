// Blocking bounded MPMC queue: a ring buffer behind one reader-writer lock,
// with two counting semaphores doing admission control.
//
//   admission    : free slots      (starts at C)
//   availability : committed items (starts at 0)
//
// A caller first takes a permit (this is where it blocks), then takes the
// write lock for the ring mutation. Permits are only ever moved between the
// two semaphores by enqueue, dequeue and clear.

use crate::context::Context;
use crate::error::{Error, TryEnqueueError};
use crate::mpmc::ring::Ring;
use crate::sync::Semaphore;
use crate::trace::debug;
use crate::Queue;
use std::{
   fmt,
   sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

pub struct BoundedQueue<T> {
   ring: RwLock<Ring<T>>,
   admission: Semaphore,
   availability: Semaphore,
}

// Readers only look at the ring's counters, never at a stored `T`, so the
// read lock does not require `T: Sync`.
unsafe impl<T: Send> Sync for BoundedQueue<T> {}

impl<T> BoundedQueue<T> {
   /// # Panics
   ///
   /// If `capacity` is zero.
   pub fn new(capacity: usize) -> Self {
      assert!(capacity > 0, "capacity must be at least 1");
      Self {
         ring: RwLock::new(Ring::with_capacity(capacity)),
         admission: Semaphore::new(capacity, capacity),
         availability: Semaphore::new(capacity, 0),
      }
   }

   #[inline]
   fn write(&self) -> RwLockWriteGuard<'_, Ring<T>> {
      self.ring.write().unwrap_or_else(PoisonError::into_inner)
   }

   #[inline]
   fn read(&self) -> RwLockReadGuard<'_, Ring<T>> {
      self.ring.read().unwrap_or_else(PoisonError::into_inner)
   }

   /// Append `value`, blocking while the queue is full.
   ///
   /// Fails with [`Error::Cancelled`] if `ctx` fires first; the queue is
   /// left untouched in that case.
   pub fn enqueue(&self, ctx: &Context, value: T) -> Result<(), Error> {
      self.admission.acquire(ctx)?;

      let mut ring = self.write();
      // the token may have fired while we queued for the lock
      if let Some(cause) = ctx.err() {
         self.admission.release();
         debug!(%cause, "enqueue cancelled after admission, permit returned");
         return Err(cause.into());
      }
      ring.push(value);
      self.availability.release();
      Ok(())
   }

   /// Remove the oldest value, blocking while the queue is empty.
   pub fn dequeue(&self, ctx: &Context) -> Result<T, Error> {
      self.availability.acquire(ctx)?;

      let mut ring = self.write();
      if let Some(cause) = ctx.err() {
         self.availability.release();
         debug!(%cause, "dequeue cancelled after claiming an item, permit returned");
         return Err(cause.into());
      }
      let value = ring.pop();
      self.admission.release();
      Ok(value)
   }

   /// Non-blocking enqueue. A full queue hands `value` back.
   pub fn try_enqueue(&self, value: T) -> Result<(), TryEnqueueError<T>> {
      if !self.admission.try_acquire() {
         return Err(TryEnqueueError(value));
      }
      let mut ring = self.write();
      ring.push(value);
      self.availability.release();
      Ok(())
   }

   /// Non-blocking dequeue; [`Error::Empty`] when nothing is available.
   pub fn try_dequeue(&self) -> Result<T, Error> {
      if !self.availability.try_acquire() {
         return Err(Error::Empty);
      }
      let mut ring = self.write();
      let value = ring.pop();
      self.admission.release();
      Ok(value)
   }

   /// Drop every item that no in-flight dequeue has claimed yet and return
   /// how many were dropped.
   ///
   /// Items whose availability permit is already held by a blocked
   /// `dequeue` stay in the ring for that caller.
   pub fn clear(&self) -> usize {
      let mut ring = self.write();
      let mut dropped = 0;
      while self.availability.try_acquire() {
         drop(ring.pop());
         self.admission.release();
         dropped += 1;
      }
      dropped
   }

   /// Snapshot; stale as soon as it returns.
   pub fn is_empty(&self) -> bool {
      self.read().is_empty()
   }

   /// Snapshot; stale as soon as it returns.
   pub fn len(&self) -> usize {
      self.read().len()
   }

   pub fn capacity(&self) -> usize {
      self.admission.max()
   }
}

impl<T: Send> Queue<T> for BoundedQueue<T> {
   fn enqueue(&self, ctx: &Context, item: T) -> Result<(), Error> {
      BoundedQueue::enqueue(self, ctx, item)
   }

   fn dequeue(&self, ctx: &Context) -> Result<T, Error> {
      BoundedQueue::dequeue(self, ctx)
   }

   fn is_empty(&self) -> bool {
      BoundedQueue::is_empty(self)
   }

   fn clear(&self) -> Result<usize, Error> {
      Ok(BoundedQueue::clear(self))
   }

   fn size(&self) -> usize {
      self.len()
   }
}

impl<T> fmt::Debug for BoundedQueue<T> {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_struct("BoundedQueue")
         .field("ring", &*self.read())
         .field("admission", &self.admission)
         .field("availability", &self.availability)
         .finish()
   }
}
