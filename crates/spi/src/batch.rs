//! Transactional batches and their thread-detached form.

use serde::{Deserialize, Serialize};

use crate::error::StoreResult;

/// Lifecycle state of a batch as reported by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchState {
	/// Open and accepting work.
	Started,
	/// Marked for rollback; closing it discards all work.
	Discarded,
	/// Committed or rolled back; no further work is possible.
	Closed,
}

/// A batch attached to the calling thread.
///
/// Store operations issued on this thread run inside the batch until it is
/// either detached with [`Batch::suspend`] or ended with [`Batch::close`].
pub trait Batch: Send + Sized {
	/// Detached form produced by [`Batch::suspend`].
	type Suspended: SuspendedBatch;

	/// Current lifecycle state.
	fn state(&self) -> BatchState;

	/// Marks the batch for rollback. Work is discarded when the batch closes.
	fn discard(&mut self);

	/// Ends the batch, committing unless it was discarded.
	fn close(self) -> StoreResult<()>;

	/// Detaches the batch from the calling thread without ending it.
	fn suspend(self) -> Self::Suspended;
}

/// A batch detached from any thread.
///
/// Cloning yields another token for the same underlying batch. The store may
/// refuse to resume a batch that is already attached to a different thread.
pub trait SuspendedBatch: Clone + Send + Sync + 'static {
	/// Attached form produced by [`SuspendedBatch::resume`].
	type Batch: Batch;

	/// Re-attaches the batch to the calling thread.
	fn resume(&self) -> StoreResult<Self::Batch>;
}
