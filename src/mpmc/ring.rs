// Fixed-capacity circular buffer shared by the bounded queues.
//
// Not synchronised: callers keep it behind their own lock. `end` is the next
// write slot, `front` the next read slot, and a vacated slot holds `None`.

use std::fmt;

pub(crate) struct Ring<T> {
   slots: Box<[Option<T>]>,
   front: usize,
   end: usize,
   size: usize,
}

impl<T> Ring<T> {
   pub(crate) fn with_capacity(capacity: usize) -> Self {
      assert!(capacity > 0, "capacity must be at least 1");
      Self {
         slots: (0..capacity).map(|_| None).collect(),
         front: 0,
         end: 0,
         size: 0,
      }
   }

   #[inline]
   pub(crate) fn capacity(&self) -> usize {
      self.slots.len()
   }

   #[inline]
   pub(crate) fn len(&self) -> usize {
      self.size
   }

   #[inline]
   pub(crate) fn is_empty(&self) -> bool {
      self.size == 0
   }

   #[inline]
   pub(crate) fn is_full(&self) -> bool {
      self.size == self.capacity()
   }

   /// # Panics
   ///
   /// When the ring is already full; the caller's admission control is broken.
   pub(crate) fn push(&mut self, value: T) {
      assert!(
         self.size < self.capacity(),
         "ring overflow: size {} at capacity {}",
         self.size,
         self.capacity()
      );
      let slot = &mut self.slots[self.end];
      debug_assert!(slot.is_none(), "write slot {} still occupied", self.end);
      *slot = Some(value);
      self.end = (self.end + 1) % self.capacity();
      self.size += 1;
   }

   /// # Panics
   ///
   /// When the ring is empty; the caller's availability accounting is broken.
   pub(crate) fn pop(&mut self) -> T {
      assert!(self.size > 0, "ring underflow: read from an empty ring");
      let front = self.front;
      let value = match self.slots[front].take() {
         Some(value) => value,
         None => panic!("read slot {front} empty with size {}", self.size),
      };
      self.front = (front + 1) % self.capacity();
      self.size -= 1;
      value
   }
}

impl<T> fmt::Debug for Ring<T> {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_struct("Ring")
         .field("capacity", &self.capacity())
         .field("front", &self.front)
         .field("end", &self.end)
         .field("size", &self.size)
         .finish()
   }
}
