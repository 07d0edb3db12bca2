//! Per-handle cell holding the current store session.
//!
//! Readers and the single writer of a registry are always sequential within
//! one request, but adapters created later in the request must observe the
//! latest publication, so the cell is an [`ArcSwap`] rather than a lock.

use std::sync::Arc;

use arc_swap::ArcSwap;
use clustered_session_spi::{LocalContext, StoreSession};

/// Degraded reference kept after the owning request ends.
///
/// Resolves the session id and its local context, never the store.
#[derive(Debug, Clone)]
pub(crate) struct OobSession {
	id: String,
	context: Arc<LocalContext>,
}

impl OobSession {
	pub fn id(&self) -> &str {
		&self.id
	}

	pub fn context(&self) -> &Arc<LocalContext> {
		&self.context
	}
}

pub(crate) enum SessionRef<T> {
	Live(T),
	Detached(OobSession),
}

pub(crate) struct HandleState<T> {
	pub(crate) session: SessionRef<T>,
	/// Routed identifier seen by the container.
	pub(crate) internal_id: String,
}

impl<T: StoreSession> HandleState<T> {
	fn live(session: T, internal_id: String) -> Self {
		Self {
			session: SessionRef::Live(session),
			internal_id,
		}
	}

	/// Store-level id.
	pub(crate) fn id(&self) -> &str {
		match &self.session {
			SessionRef::Live(session) => session.id(),
			SessionRef::Detached(oob) => oob.id(),
		}
	}

	pub(crate) fn context(&self) -> &Arc<LocalContext> {
		match &self.session {
			SessionRef::Live(session) => session.context(),
			SessionRef::Detached(oob) => oob.context(),
		}
	}

	pub(crate) fn live_session(&self) -> Option<&T> {
		match &self.session {
			SessionRef::Live(session) => Some(session),
			SessionRef::Detached(_) => None,
		}
	}

	fn degraded(&self) -> Self {
		Self {
			session: SessionRef::Detached(OobSession {
				id: self.id().to_string(),
				context: Arc::clone(self.context()),
			}),
			internal_id: self.internal_id.clone(),
		}
	}
}

pub(crate) struct HandleRegistry<T> {
	cell: ArcSwap<HandleState<T>>,
}

impl<T: StoreSession> HandleRegistry<T> {
	pub(crate) fn new(session: T, internal_id: String) -> Self {
		Self {
			cell: ArcSwap::from_pointee(HandleState::live(session, internal_id)),
		}
	}

	pub(crate) fn load(&self) -> Arc<HandleState<T>> {
		self.cell.load_full()
	}

	/// Publishes `session` and returns the state it replaced.
	pub(crate) fn set(&self, session: T, internal_id: String) -> Arc<HandleState<T>> {
		self.cell.swap(Arc::new(HandleState::live(session, internal_id)))
	}

	/// Puts back a previously loaded state, returning the one it replaced.
	pub(crate) fn restore(&self, state: Arc<HandleState<T>>) -> Arc<HandleState<T>> {
		self.cell.swap(state)
	}

	/// Replaces a live reference with its out-of-band form. The live session
	/// must already be closed. No-op once detached.
	pub(crate) fn degrade(&self) {
		let current = self.cell.load();
		if current.live_session().is_none() {
			return;
		}
		let degraded = Arc::new(current.degraded());
		drop(current);
		self.cell.store(degraded);
	}

	pub(crate) fn is_detached(&self) -> bool {
		self.cell.load().live_session().is_none()
	}
}
