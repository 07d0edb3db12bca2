//! Shutdown barrier between request threads and the administrative thread.
//!
//! Every session handle holds a read lease for as long as it is bound to a
//! request. Stopping takes the write side, which waits for outstanding leases
//! to drain and then refuses new ones until the barrier is started again.
//!
//! Lease acquisition never queues: a request arriving while a stop is pending
//! fails immediately with [`Error::ManagerStopped`]. Queuing behind the writer
//! would let request threads and the stopping thread wait on each other.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{Mutex, RawRwLock, RwLock};
use tracing::{debug, info};

use crate::error::{Error, Result};

type ReadStamp = ArcRwLockReadGuard<RawRwLock, ()>;
type WriteStamp = ArcRwLockWriteGuard<RawRwLock, ()>;

#[derive(Default)]
pub struct ShutdownBarrier {
	lock: Arc<RwLock<()>>,
	admin: Mutex<Option<WriteStamp>>,
	stopped: AtomicBool,
}

impl fmt::Debug for ShutdownBarrier {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ShutdownBarrier").field("stopped", &self.is_stopped()).finish_non_exhaustive()
	}
}

impl ShutdownBarrier {
	/// Creates an open barrier.
	pub fn new() -> Self {
		Self::default()
	}

	/// Takes a read lease without blocking.
	pub fn acquire(&self) -> Result<Lease> {
		match self.lock.try_read_arc() {
			Some(stamp) => Ok(Lease::new(stamp)),
			None => {
				debug!(target = "cs.barrier", "lease refused; barrier stopped or stopping");
				Err(Error::ManagerStopped)
			}
		}
	}

	/// Blocks until every outstanding lease is released, then refuses new
	/// leases until [`ShutdownBarrier::start`]. Calling it while already
	/// stopped is a no-op.
	///
	/// Must not be called from a thread that holds a lease.
	pub fn stop(&self) {
		let mut admin = self.admin.lock();
		if admin.is_some() {
			return;
		}
		debug!(target = "cs.barrier", "waiting for outstanding leases");
		*admin = Some(self.lock.write_arc());
		self.stopped.store(true, Ordering::Release);
		info!(target = "cs.barrier", "barrier stopped");
	}

	/// Re-opens the barrier. No-op when already open.
	pub fn start(&self) {
		let stamp = self.admin.lock().take();
		if stamp.is_some() {
			self.stopped.store(false, Ordering::Release);
			drop(stamp);
			info!(target = "cs.barrier", "barrier started");
		}
	}

	/// `true` once [`ShutdownBarrier::stop`] has returned and until the next start.
	pub fn is_stopped(&self) -> bool {
		self.stopped.load(Ordering::Acquire)
	}
}

/// Read lease on a [`ShutdownBarrier`].
///
/// The first call to [`Lease::release`] unlocks; later calls, and the drop at
/// the end of the lease's life, find the stamp already taken and do nothing.
pub struct Lease {
	stamp: Mutex<Option<ReadStamp>>,
}

impl fmt::Debug for Lease {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Lease").field("released", &self.is_released()).finish()
	}
}

impl Lease {
	fn new(stamp: ReadStamp) -> Self {
		Self {
			stamp: Mutex::new(Some(stamp)),
		}
	}

	fn take(&self) -> Option<ReadStamp> {
		self.stamp.lock().take()
	}

	/// Returns `true` if this call released the lease.
	pub fn release(&self) -> bool {
		match self.take() {
			Some(stamp) => {
				drop(stamp);
				true
			}
			None => false,
		}
	}

	pub fn is_released(&self) -> bool {
		self.stamp.lock().is_none()
	}
}
