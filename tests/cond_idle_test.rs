// mpmc_queues/tests/cond_idle_test.rs
//
// Runs in its own binary so the only "cond-waiter" threads alive are the
// ones started here.

#![cfg(target_os = "linux")]

use mpmc_queues::{CancellableCond, Cancellation, Context, Error};

use std::fs;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// utime + stime, in clock ticks, of every live thread named `name`.
fn cpu_ticks_of(name: &str) -> Option<u64> {
   let mut found = false;
   let mut total = 0;
   for task in fs::read_dir("/proc/self/task").ok()?.flatten() {
      let comm = fs::read_to_string(task.path().join("comm")).unwrap_or_default();
      if comm.trim_end() != name {
         continue;
      }
      let stat = fs::read_to_string(task.path().join("stat")).ok()?;
      // fields after the parenthesised comm start at `state` (field 3)
      let rest = &stat[stat.rfind(')')? + 2..];
      let fields: Vec<&str> = rest.split_whitespace().collect();
      let utime: u64 = fields.get(11)?.parse().ok()?;
      let stime: u64 = fields.get(12)?.parse().ok()?;
      total += utime + stime;
      found = true;
   }
   found.then_some(total)
}

#[test]
fn test_parked_waiter_with_zero_grace_does_not_spin() {
   let lock = Arc::new(Mutex::new(()));
   let cond = CancellableCond::with_orphan_grace(Duration::ZERO);
   let (ctx, cancel) = Context::with_cancel(&Context::background());

   let caller = {
      let (lock, cond) = (Arc::clone(&lock), cond.clone());
      thread::spawn(move || {
         let guard = lock.lock().unwrap();
         cond.wait(guard, &ctx)
      })
   };

   let start = Instant::now();
   let before = loop {
      if let Some(ticks) = cpu_ticks_of("cond-waiter") {
         break ticks;
      }
      assert!(start.elapsed() < Duration::from_secs(5), "waiter thread never started");
      thread::sleep(Duration::from_millis(1));
   };

   thread::sleep(Duration::from_millis(500));
   let after = cpu_ticks_of("cond-waiter").expect("waiter thread exited while its caller waits");
   assert!(after - before <= 2, "parked waiter burned {} ticks in 500ms", after - before);

   cancel.cancel();
   assert_eq!(caller.join().unwrap(), Err(Error::Cancelled(Cancellation::Canceled)));

   // zero grace: the orphan leaves as soon as it sees the abandonment
   let start = Instant::now();
   while cond.waiters() != 0 {
      assert!(start.elapsed() < Duration::from_secs(1), "orphan outlived a zero grace period");
      thread::sleep(Duration::from_millis(1));
   }
}
