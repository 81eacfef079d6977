// Unbounded lock-free MPMC queue (Michael & Scott, PODC 1996).
//
// Linked list with a permanent sentinel at `head`. Producers CAS a new node
// onto `tail.next`, consumers CAS `head` forward and move the value out of
// the node that becomes the new sentinel. Both sides help a lagging `tail`
// along. Retired sentinels are freed through crossbeam's epoch GC, so a
// node is never reclaimed while a pinned thread can still reach it.
//
// Lock-free, not wait-free: a single thread may retry indefinitely, but
// every failed CAS means some other thread made progress.

use crate::context::Context;
use crate::error::Error;
use crate::Queue;
use crossbeam::{
   epoch::{self, Atomic, Guard, Owned, Shared},
   utils::{Backoff, CachePadded},
};
use std::{
   fmt,
   mem::MaybeUninit,
   sync::atomic::{AtomicUsize, Ordering},
};

struct Node<T> {
   // Uninitialised in the sentinel, and again once the value is moved out.
   value: MaybeUninit<T>,
   next: Atomic<Node<T>>,
}

pub struct LockFreeQueue<T> {
   head: CachePadded<Atomic<Node<T>>>,
   tail: CachePadded<Atomic<Node<T>>>,
   // Bumped before a node is published and dropped after it is unlinked,
   // so it can over-count in flight but never underflows.
   len: CachePadded<AtomicUsize>,
}

unsafe impl<T: Send> Send for LockFreeQueue<T> {}
unsafe impl<T: Send> Sync for LockFreeQueue<T> {}

impl<T> Default for LockFreeQueue<T> {
   fn default() -> Self {
      Self::new()
   }
}

impl<T> LockFreeQueue<T> {
   pub fn new() -> Self {
      let queue = Self {
         head: CachePadded::new(Atomic::null()),
         tail: CachePadded::new(Atomic::null()),
         len: CachePadded::new(AtomicUsize::new(0)),
      };
      let sentinel = Owned::new(Node {
         value: MaybeUninit::uninit(),
         next: Atomic::null(),
      });
      // SAFETY: nobody else can see the queue yet.
      unsafe {
         let guard = epoch::unprotected();
         let sentinel = sentinel.into_shared(guard);
         queue.head.store(sentinel, Ordering::Relaxed);
         queue.tail.store(sentinel, Ordering::Relaxed);
      }
      queue
   }

   /// Append `value`. Never blocks and never fails.
   pub fn push(&self, value: T) {
      let guard = &epoch::pin();
      let node = Owned::new(Node {
         value: MaybeUninit::new(value),
         next: Atomic::null(),
      })
      .into_shared(guard);
      self.len.fetch_add(1, Ordering::Relaxed);

      let backoff = Backoff::new();
      loop {
         let tail = self.tail.load(Ordering::Acquire, guard);
         // SAFETY: `tail` is never null and the guard keeps it alive.
         let tail_ref = unsafe { tail.deref() };
         let next = tail_ref.next.load(Ordering::Acquire, guard);

         if !next.is_null() {
            // another producer linked a node but has not swung `tail` yet
            let _ = self
               .tail
               .compare_exchange(tail, next, Ordering::Release, Ordering::Relaxed, guard);
            backoff.spin();
            continue;
         }

         if tail_ref
            .next
            .compare_exchange(Shared::null(), node, Ordering::Release, Ordering::Relaxed, guard)
            .is_ok()
         {
            // best effort; a failure means somebody already helped
            let _ = self
               .tail
               .compare_exchange(tail, node, Ordering::Release, Ordering::Relaxed, guard);
            return;
         }
         backoff.spin();
      }
   }

   /// Remove the oldest value, or fail with [`Error::Empty`].
   pub fn pop(&self) -> Result<T, Error> {
      let guard = &epoch::pin();
      self.pop_with(guard).ok_or(Error::Empty)
   }

   fn pop_with(&self, guard: &Guard) -> Option<T> {
      let backoff = Backoff::new();
      loop {
         let head = self.head.load(Ordering::Acquire, guard);
         let tail = self.tail.load(Ordering::Acquire, guard);
         // SAFETY: `head` is never null and the guard keeps it alive.
         let next = unsafe { head.deref() }.next.load(Ordering::Acquire, guard);

         if head == tail {
            if next.is_null() {
               return None;
            }
            // `tail` lags behind a linked node; move it before `head` can pass it
            let _ = self
               .tail
               .compare_exchange(tail, next, Ordering::Release, Ordering::Relaxed, guard);
            backoff.spin();
            continue;
         }

         // SAFETY: `head != tail` so `head` has a successor, kept alive by the guard.
         let next_ref = match unsafe { next.as_ref() } {
            Some(node) => node,
            None => {
               backoff.spin();
               continue;
            }
         };

         if self
            .head
            .compare_exchange(head, next, Ordering::Release, Ordering::Relaxed, guard)
            .is_ok()
         {
            self.len.fetch_sub(1, Ordering::Relaxed);
            // SAFETY: winning the CAS gives us sole ownership of `next.value`
            // (it is the new sentinel and nobody reads a sentinel's value),
            // and the old sentinel is unreachable for threads pinned later.
            unsafe {
               guard.defer_destroy(head);
               return Some(next_ref.value.as_ptr().read());
            }
         }
         backoff.spin();
      }
   }

   /// True when no linked value is waiting. Snapshot only.
   pub fn is_empty(&self) -> bool {
      let guard = &epoch::pin();
      let head = self.head.load(Ordering::Acquire, guard);
      // SAFETY: `head` is never null and the guard keeps it alive.
      unsafe { head.deref() }.next.load(Ordering::Acquire, guard).is_null()
   }

   /// Approximate element count; exact once concurrent pushes have returned.
   pub fn len(&self) -> usize {
      self.len.load(Ordering::Relaxed)
   }

   /// Pop until empty and return the number of values dropped.
   pub fn clear(&self) -> usize {
      let guard = &epoch::pin();
      let mut dropped = 0;
      while let Some(value) = self.pop_with(guard) {
         drop(value);
         dropped += 1;
      }
      dropped
   }
}

impl<T> Drop for LockFreeQueue<T> {
   fn drop(&mut self) {
      // SAFETY: `&mut self` means no other thread holds a reference into the list.
      unsafe {
         let guard = epoch::unprotected();
         while let Some(value) = self.pop_with(guard) {
            drop(value);
         }
         let sentinel = self.head.load(Ordering::Relaxed, guard);
         drop(sentinel.into_owned());
      }
   }
}

impl<T: Send> Queue<T> for LockFreeQueue<T> {
   /// Never blocks, so `ctx` is not consulted.
   fn enqueue(&self, _ctx: &Context, item: T) -> Result<(), Error> {
      self.push(item);
      Ok(())
   }

   fn dequeue(&self, _ctx: &Context) -> Result<T, Error> {
      self.pop()
   }

   fn is_empty(&self) -> bool {
      LockFreeQueue::is_empty(self)
   }

   fn clear(&self) -> Result<usize, Error> {
      Ok(LockFreeQueue::clear(self))
   }

   fn size(&self) -> usize {
      self.len()
   }
}

impl<T> fmt::Debug for LockFreeQueue<T> {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_struct("LockFreeQueue")
         .field("len", &self.len())
         .finish()
   }
}
