//! Scoped resumption of suspended batches.

use clustered_session_spi::{Batch, BatchState, SessionStore, StoreResult, SuspendedBatch};
use tracing::warn;

/// Suspended form of a store's batches.
pub(crate) type SuspendedOf<S> = <<S as SessionStore>::Batch as Batch>::Suspended;

/// A batch attached to the current thread for the lifetime of the scope.
///
/// Dropping the scope suspends the batch again, so the stored
/// [`SuspendedBatch`] token stays usable by the next callback of the request.
/// [`BatchScope::close`] and [`BatchScope::rollback`] end the batch instead.
pub(crate) struct BatchScope<B: Batch> {
	batch: Option<B>,
}

impl<B: Batch> BatchScope<B> {
	pub(crate) fn new(batch: B) -> Self {
		Self { batch: Some(batch) }
	}

	pub(crate) fn state(&self) -> Option<BatchState> {
		self.batch.as_ref().map(Batch::state)
	}

	/// Commits (or rolls back, if discarded) and ends the batch.
	pub(crate) fn close(mut self) -> StoreResult<()> {
		match self.batch.take() {
			Some(batch) => batch.close(),
			None => Ok(()),
		}
	}

	/// Discards and ends the batch.
	pub(crate) fn rollback(mut self) -> StoreResult<()> {
		match self.batch.take() {
			Some(mut batch) => {
				batch.discard();
				batch.close()
			}
			None => Ok(()),
		}
	}

	/// Like [`BatchScope::rollback`], logging instead of returning failures.
	pub(crate) fn rollback_quietly(self) {
		if let Err(err) = self.rollback() {
			warn!(target = "cs.session", error = %err, "failed to roll back batch");
		}
	}
}

impl<B: Batch> Drop for BatchScope<B> {
	fn drop(&mut self) {
		if let Some(batch) = self.batch.take() {
			let _ = batch.suspend();
		}
	}
}

/// Re-attaches `suspended` to the calling thread for the returned scope.
pub(crate) fn resume<T: SuspendedBatch>(suspended: &T) -> StoreResult<BatchScope<T::Batch>> {
	suspended.resume().map(BatchScope::new)
}
