// Monitor-style condition wait that can be abandoned through a Context
// without swallowing a wakeup.
//
// Each `wait` registers with the condition while the caller still holds its
// monitor lock, then hands the blocking part to a dedicated waiter thread.
// Signals are counted as wakeup tokens, so a notify that lands between the
// caller releasing the monitor and the waiter thread parking is not lost.
//
// The waiter hands its token to the caller through a one-shot rendezvous.
// Whichever side moves the hand-off state first wins: the waiter
// (PENDING -> DELIVERED) or a cancelled caller (PENDING -> ABANDONED). A
// waiter that loses passes its token on with a fresh notify.

use crate::context::Context;
use crate::error::Error;
use crate::trace::{debug, trace, warn};
use crossbeam::channel::{self, Sender};
use std::{
   fmt,
   sync::{
      atomic::{AtomicU8, Ordering},
      Arc, Condvar, Mutex, MutexGuard, PoisonError,
   },
   thread,
   time::{Duration, Instant},
};

/// How long a waiter thread stays parked after its caller gave up.
pub const DEFAULT_ORPHAN_GRACE: Duration = Duration::from_secs(5);

const PENDING: u8 = 0;
const DELIVERED: u8 = 1;
const ABANDONED: u8 = 2;

/*──────────────────────────────────────────────────────────────────────────*/
/*  Shared bookkeeping                                                      */
/*──────────────────────────────────────────────────────────────────────────*/

#[derive(Debug, Default)]
struct Tally {
   waiters: usize, // registered and not yet woken (orphans included)
   wakeups: usize, // tokens issued but not yet claimed; never exceeds `waiters`
}

impl Tally {
   fn unclaimed(&self) -> usize {
      self.waiters - self.wakeups
   }

   fn deregister(&mut self) {
      self.waiters -= 1;
      self.wakeups = self.wakeups.min(self.waiters);
   }
}

struct Shared {
   tally: Mutex<Tally>,
   cvar: Condvar,
   orphan_grace: Duration,
}

impl Shared {
   fn tally(&self) -> MutexGuard<'_, Tally> {
      self.tally.lock().unwrap_or_else(PoisonError::into_inner)
   }

   fn signal(&self, max: usize) -> usize {
      let mut tally = self.tally();
      let issued = tally.unclaimed().min(max);
      if issued > 0 {
         tally.wakeups += issued;
         if issued == 1 {
            self.cvar.notify_one();
         } else {
            self.cvar.notify_all();
         }
      }
      issued
   }

   // Runs on the waiter thread.
   fn park(&self, state: &AtomicU8, tx: Sender<()>) {
      let mut tally = self.tally();
      let mut abandoned_at: Option<Instant> = None;
      loop {
         if tally.wakeups > 0 {
            tally.wakeups -= 1;
            tally.waiters -= 1;
            break;
         }

         // The caller flips the state and then notifies under this lock, so
         // a live waiter can sleep untimed without missing the abandonment.
         if state.load(Ordering::Acquire) != ABANDONED {
            tally = self.cvar.wait(tally).unwrap_or_else(PoisonError::into_inner);
            continue;
         }

         let since = *abandoned_at.get_or_insert_with(Instant::now);
         let parked = since.elapsed();
         if parked >= self.orphan_grace {
            tally.deregister();
            debug!(grace = ?self.orphan_grace, "orphaned waiter expired");
            return;
         }
         tally = match self.cvar.wait_timeout(tally, self.orphan_grace - parked) {
            Ok((guard, _)) => guard,
            Err(poisoned) => poisoned.into_inner().0,
         };
      }
      drop(tally);

      match state.compare_exchange(PENDING, DELIVERED, Ordering::AcqRel, Ordering::Acquire) {
         Ok(_) => {
            trace!("wakeup handed to caller");
            let _ = tx.send(());
         }
         Err(_) => {
            debug!("caller abandoned its wait, passing the wakeup on");
            self.signal(1);
         }
      }
   }
}

/*──────────────────────────────────────────────────────────────────────────*/
/*  Public handle                                                           */
/*──────────────────────────────────────────────────────────────────────────*/

/// A condition variable whose [`wait`](Self::wait) can be cut short by a
/// [`Context`].
///
/// The condition is not tied to a particular lock: callers pair it with the
/// monitor lock that protects their predicate and pass that lock's guard
/// into `wait`.
///
/// ```
/// use mpmc_queues::{CancellableCond, Context};
/// use std::sync::{Arc, Mutex};
/// use std::thread;
///
/// let ready = Arc::new(Mutex::new(false));
/// let cond = CancellableCond::new();
///
/// let waiter = {
///    let (ready, cond) = (Arc::clone(&ready), cond.clone());
///    thread::spawn(move || loop {
///       let guard = ready.lock().unwrap();
///       if *guard {
///          return;
///       }
///       cond.wait(guard, &Context::background()).unwrap();
///    })
/// };
///
/// *ready.lock().unwrap() = true;
/// cond.notify_all();
/// waiter.join().unwrap();
/// ```
#[derive(Clone)]
pub struct CancellableCond {
   shared: Arc<Shared>,
}

impl Default for CancellableCond {
   fn default() -> Self {
      Self::new()
   }
}

impl CancellableCond {
   pub fn new() -> Self {
      Self::with_orphan_grace(DEFAULT_ORPHAN_GRACE)
   }

   /// `grace` bounds how long a waiter thread whose caller gave up keeps
   /// waiting for a wakeup to pass on.
   pub fn with_orphan_grace(grace: Duration) -> Self {
      Self {
         shared: Arc::new(Shared {
            tally: Mutex::new(Tally::default()),
            cvar: Condvar::new(),
            orphan_grace: grace,
         }),
      }
   }

   /// Release the monitor lock held through `guard` and sleep until notified
   /// or until `ctx` fires.
   ///
   /// The lock is *not* reacquired before returning. `Ok(())` means a
   /// notification was received; on `Err` any notification that raced with
   /// the cancellation is passed on to another waiter.
   pub fn wait<G>(&self, guard: G, ctx: &Context) -> Result<(), Error> {
      if let Some(cause) = ctx.err() {
         drop(guard);
         return Err(cause.into());
      }

      // Registered before the monitor is released, so a notifier that takes
      // the monitor after us is guaranteed to see this waiter.
      self.shared.tally().waiters += 1;

      let (tx, rx) = channel::bounded(1);
      let state = Arc::new(AtomicU8::new(PENDING));
      let spawned = thread::Builder::new().name("cond-waiter".into()).spawn({
         let shared = Arc::clone(&self.shared);
         let state = Arc::clone(&state);
         move || shared.park(&state, tx)
      });
      if let Err(err) = spawned {
         self.shared.tally().deregister();
         drop(guard);
         warn!(%err, "failed to spawn condition waiter");
         return Err(Error::SpawnFailed(err.kind()));
      }

      drop(guard);
      trace!("waiting on condition");

      match ctx.recv(&rx) {
         Ok(Some(())) => Ok(()),
         Ok(None) => unreachable!("condition waiter exited without handing off"),
         Err(cause) => {
            match state.compare_exchange(PENDING, ABANDONED, Ordering::AcqRel, Ordering::Acquire) {
               Ok(_) => {
                  // start the orphan's grace period now
                  let _tally = self.shared.tally();
                  self.shared.cvar.notify_all();
                  Err(cause.into())
               }
               // The waiter delivered first; the wakeup is ours.
               Err(_) => Ok(()),
            }
         }
      }
   }

   /// Wake one registered waiter. Returns whether a wakeup was issued.
   pub fn notify_one(&self) -> bool {
      self.shared.signal(1) == 1
   }

   /// Wake every registered waiter. Returns the number of wakeups issued.
   pub fn notify_all(&self) -> usize {
      self.shared.signal(usize::MAX)
   }

   /// Registered waiters that have not been woken yet, including waiter
   /// threads whose callers already gave up.
   pub fn waiters(&self) -> usize {
      self.shared.tally().unclaimed()
   }

   pub fn orphan_grace(&self) -> Duration {
      self.shared.orphan_grace
   }
}

impl fmt::Debug for CancellableCond {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      let tally = self.shared.tally();
      f.debug_struct("CancellableCond")
         .field("waiters", &tally.waiters)
         .field("wakeups", &tally.wakeups)
         .field("orphan_grace", &self.shared.orphan_grace)
         .finish()
   }
}
