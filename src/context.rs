// Cancellation / deadline token accepted by every blocking operation.
//
// A token is a deadline plus one "done" channel per cancellable ancestor.
// Nothing is ever sent on a done channel: cancelling drops its sender, and
// the disconnect is what blocked selects observe.

use crate::error::{Cancellation, Error};
use crossbeam::channel::{self, Receiver, Select, Sender, TryRecvError};
use std::time::{Duration, Instant};

/// A cheaply clonable cancellation token with an optional deadline.
///
/// ```
/// use mpmc_queues::{Cancellation, Context};
/// use std::time::Duration;
///
/// let root = Context::background();
/// let (ctx, handle) = Context::with_cancel(&root);
/// assert!(ctx.err().is_none());
/// handle.cancel();
/// assert_eq!(ctx.err(), Some(Cancellation::Canceled));
///
/// let expired = Context::with_timeout(&root, Duration::ZERO);
/// assert_eq!(expired.err(), Some(Cancellation::DeadlineExceeded));
/// ```
#[derive(Debug, Clone)]
pub struct Context {
   deadline: Option<Instant>,
   done: Vec<Receiver<()>>,
}

/// Cancels the [`Context`] returned alongside it by [`Context::with_cancel`].
///
/// Dropping the handle cancels as well, so keep it alive for as long as the
/// context should stay live.
#[derive(Debug)]
pub struct CancelHandle {
   _tx: Sender<()>,
}

impl CancelHandle {
   /// Cancel the context and every token derived from it.
   ///
   /// Consuming the handle drops the sender, which disconnects the done
   /// channel every blocked `recv` selects on.
   pub fn cancel(self) {
      drop(self);
   }
}

impl Default for Context {
   fn default() -> Self {
      Self::background()
   }
}

impl Context {
   /// Never cancelled, no deadline.
   pub fn background() -> Self {
      Self { deadline: None, done: Vec::new() }
   }

   /// Child of `parent` that expires at `deadline`, or earlier if the parent does.
   pub fn with_deadline(parent: &Context, deadline: Instant) -> Self {
      let deadline = match parent.deadline {
         Some(inherited) if inherited < deadline => inherited,
         _ => deadline,
      };
      Self { deadline: Some(deadline), done: parent.done.clone() }
   }

   /// Child of `parent` that expires `timeout` from now.
   ///
   /// A timeout too large to represent as an [`Instant`] leaves the parent's
   /// deadline unchanged.
   pub fn with_timeout(parent: &Context, timeout: Duration) -> Self {
      match Instant::now().checked_add(timeout) {
         Some(deadline) => Self::with_deadline(parent, deadline),
         None => parent.clone(),
      }
   }

   /// Child of `parent` that is also cancelled through the returned handle.
   pub fn with_cancel(parent: &Context) -> (Self, CancelHandle) {
      let (tx, rx) = channel::bounded(0);
      let mut done = parent.done.clone();
      done.push(rx);
      (Self { deadline: parent.deadline, done }, CancelHandle { _tx: tx })
   }

   pub fn deadline(&self) -> Option<Instant> {
      self.deadline
   }

   /// `None` while the token is live. Explicit cancellation is reported
   /// before an expired deadline.
   pub fn err(&self) -> Option<Cancellation> {
      let cancelled = self
         .done
         .iter()
         .any(|rx| matches!(rx.try_recv(), Err(TryRecvError::Disconnected)));
      if cancelled {
         return Some(Cancellation::Canceled);
      }
      match self.deadline {
         Some(deadline) if Instant::now() >= deadline => Some(Cancellation::DeadlineExceeded),
         _ => None,
      }
   }

   pub fn is_done(&self) -> bool {
      self.err().is_some()
   }

   pub(crate) fn check(&self) -> Result<(), Error> {
      match self.err() {
         Some(cause) => Err(cause.into()),
         None => Ok(()),
      }
   }

   /// Block on `rx` until it yields a value or the token fires.
   ///
   /// A token that is already done wins over a ready channel. `Ok(None)`
   /// means `rx` was disconnected.
   pub fn recv<T>(&self, rx: &Receiver<T>) -> Result<Option<T>, Cancellation> {
      if let Some(cause) = self.err() {
         return Err(cause);
      }

      let timer = match self.deadline {
         Some(deadline) => channel::at(deadline),
         None => channel::never(),
      };

      let mut sel = Select::new();
      let op_rx = sel.recv(rx);
      let op_timer = sel.recv(&timer);
      for done in &self.done {
         sel.recv(done);
      }

      let oper = sel.select();
      let index = oper.index();
      if index == op_rx {
         Ok(oper.recv(rx).ok())
      } else if index == op_timer {
         let _ = oper.recv(&timer);
         Err(Cancellation::DeadlineExceeded)
      } else {
         let _ = oper.recv(&self.done[index - op_timer - 1]);
         Err(Cancellation::Canceled)
      }
   }
}
