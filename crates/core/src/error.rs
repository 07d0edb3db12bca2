//! Error types surfaced to the container.

use clustered_session_spi::StoreError;
use thiserror::Error;

/// Result alias for facade operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
	/// The manager is stopped or stopping; no new session work may begin.
	#[error("session manager is stopped")]
	ManagerStopped,

	/// The session was invalidated by a concurrent request. The stale handle
	/// has already been closed and its lease released.
	///
	/// `id` is the routed id seen by the container, as for [`Error::Detached`].
	#[error("session {id} was invalidated")]
	Invalidated { id: String },

	/// The handle no longer holds a live batch (its request ended).
	#[error("session {id} is detached from its request")]
	Detached { id: String },

	/// Any other store failure.
	#[error(transparent)]
	Store(StoreError),

	#[error("invalid configuration: {0}")]
	Config(String),

	#[error(transparent)]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	Json(#[from] serde_json::Error),
}

impl Error {
	/// Maps a store failure for the session routed as `id`, keeping the invalid-state
	/// condition distinguishable.
	pub fn from_store(id: &str, err: StoreError) -> Self {
		match err {
			StoreError::InvalidState(_) => Self::Invalidated { id: id.to_string() },
			other => Self::Store(other),
		}
	}

	/// Returns `true` when the session was invalidated concurrently.
	pub fn is_invalidated(&self) -> bool {
		matches!(self, Self::Invalidated { .. })
	}
}
