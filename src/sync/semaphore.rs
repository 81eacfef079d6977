// Counting semaphore whose acquire honours a Context.
//
// Every available permit is one `()` token sitting in a bounded channel of
// capacity `max`. Acquire receives a token, release sends one back. The
// channel decides which blocked acquirer is woken; arrival order is not
// guaranteed.

use crate::context::Context;
use crate::error::Cancellation;
use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use std::fmt;

pub struct Semaphore {
   tx: Sender<()>,
   rx: Receiver<()>,
   max: usize,
}

impl Semaphore {
   /// `max` permits in total, `initial` of them available right away.
   pub fn new(max: usize, initial: usize) -> Self {
      assert!(max > 0, "semaphore needs at least one permit");
      assert!(initial <= max, "initial permits ({initial}) exceed maximum ({max})");

      let (tx, rx) = channel::bounded(max);
      for _ in 0..initial {
         // cannot fail: the channel holds `max` tokens
         let _ = tx.try_send(());
      }
      Self { tx, rx, max }
   }

   /// Take one permit, blocking until one is released or `ctx` fires.
   ///
   /// On `Err` no permit was taken.
   pub fn acquire(&self, ctx: &Context) -> Result<(), Cancellation> {
      match ctx.recv(&self.rx)? {
         Some(()) => Ok(()),
         None => unreachable!("semaphore channel disconnected while its sender is alive"),
      }
   }

   pub fn try_acquire(&self) -> bool {
      self.rx.try_recv().is_ok()
   }

   /// Return one permit.
   ///
   /// # Panics
   ///
   /// If every permit is already available: somebody released a permit
   /// they never acquired.
   pub fn release(&self) {
      if let Err(TrySendError::Full(())) = self.tx.try_send(()) {
         panic!("semaphore released beyond its {} permits", self.max);
      }
   }

   /// Point-in-time count of available permits.
   pub fn available(&self) -> usize {
      self.rx.len()
   }

   pub fn max(&self) -> usize {
      self.max
   }
}

impl fmt::Debug for Semaphore {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_struct("Semaphore")
         .field("available", &self.available())
         .field("max", &self.max)
         .finish()
   }
}
