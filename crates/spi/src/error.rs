//! Store-level failure conditions.

use thiserror::Error;

/// Result alias for store calls.
pub type StoreResult<T> = Result<T, StoreError>;

/// Failure raised by a [`SessionStore`](crate::SessionStore) or one of its batches.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
	/// The session or batch was invalidated by a concurrent request.
	#[error("invalid state: {0}")]
	InvalidState(String),

	/// Any other store failure.
	#[error("store failure: {0}")]
	Failure(String),
}

impl StoreError {
	/// Builds an [`StoreError::InvalidState`] for the given session id.
	pub fn invalidated(id: &str) -> Self {
		Self::InvalidState(format!("session {id} is no longer valid"))
	}

	/// Returns `true` for the concurrent-invalidation condition.
	pub fn is_invalid_state(&self) -> bool {
		matches!(self, Self::InvalidState(_))
	}
}
