//! Request-scoped session handle.
//!
//! A [`SessionFacade`] is bound to one suspended batch and one barrier lease
//! from the moment the manager returns it until a terminal operation runs:
//! [`SessionFacade::end_access`], [`SessionFacade::invalidate`], the
//! invalid-state recovery path, or drop. Each store-touching call resumes the
//! batch on the calling thread for the duration of that call only.
//!
//! After the terminal operation the handle is out-of-band: it still resolves
//! its id and local context, while store operations fail with
//! [`Error::Detached`].

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use clustered_session_spi::{BatchState, LocalContext, Principal, SessionStore, StoreResult, StoreSession, SuspendedBatch};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::barrier::Lease;
use crate::batch::{self, BatchScope, SuspendedOf};
use crate::config::RenameRecovery;
use crate::error::{Error, Result};
use crate::event::{AttributeEvent, ContainerEvent, SessionSnapshot};
use crate::listener;
use crate::manager::Shared;
use crate::registry::{HandleRegistry, HandleState};

/// Which listeners a session-id change notifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdChangeNotification {
	pub session_listeners: bool,
	pub container_listeners: bool,
}

impl IdChangeNotification {
	pub const ALL: Self = Self {
		session_listeners: true,
		container_listeners: true,
	};
	pub const NONE: Self = Self {
		session_listeners: false,
		container_listeners: false,
	};
}

pub struct SessionFacade<S: SessionStore> {
	shared: Arc<Shared<S>>,
	registry: HandleRegistry<S::Session>,
	batch: Mutex<Option<SuspendedOf<S>>>,
	lease: Lease,
	start_time: SystemTime,
}

impl<S: SessionStore> fmt::Debug for SessionFacade<S> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let state = self.registry.load();
		f.debug_struct("SessionFacade")
			.field("id", &state.internal_id)
			.field("detached", &self.is_detached())
			.field("lease", &self.lease)
			.finish_non_exhaustive()
	}
}

impl<S: SessionStore> SessionFacade<S> {
	pub(crate) fn new(
		shared: Arc<Shared<S>>,
		session: S::Session,
		internal_id: String,
		batch: SuspendedOf<S>,
		lease: Lease,
		start_time: SystemTime,
	) -> Self {
		Self {
			shared,
			registry: HandleRegistry::new(session, internal_id),
			batch: Mutex::new(Some(batch)),
			lease,
			start_time,
		}
	}

	/// Routed id seen by the container.
	pub fn id(&self) -> String {
		self.registry.load().internal_id.clone()
	}

	/// Store-level id.
	pub fn base_id(&self) -> String {
		self.registry.load().id().to_string()
	}

	/// First touch of the session by the current request.
	pub fn start_time(&self) -> SystemTime {
		self.start_time
	}

	/// `true` once the handle no longer holds a batch.
	pub fn is_detached(&self) -> bool {
		self.registry.is_detached()
	}

	/// `false` once the session was invalidated or the handle is detached.
	pub fn is_valid(&self) -> bool {
		self.registry.load().live_session().is_some_and(StoreSession::is_valid)
	}

	pub fn is_new(&self) -> Result<bool> {
		self.with_live(|s| s.is_new())
	}

	pub fn creation_time(&self) -> Result<SystemTime> {
		self.with_live(|s| s.creation_time())
	}

	/// Start of the most recent completed access.
	pub fn last_accessed_time(&self) -> Result<SystemTime> {
		self.with_live(|s| s.last_access_start_time())
	}

	/// Inactivity timeout, `None` when the session never expires.
	pub fn timeout(&self) -> Result<Option<Duration>> {
		self.with_live(|s| s.timeout()).map(|t| (!t.is_zero()).then_some(t))
	}

	/// Sets the inactivity timeout. `None` and a zero duration both mean the
	/// session never expires.
	pub fn set_timeout(&self, timeout: Option<Duration>) -> Result<()> {
		let timeout = timeout.unwrap_or(Duration::ZERO);
		self.with_live(|s| s.set_timeout(timeout))
	}

	pub fn attribute(&self, name: &str) -> Result<Option<Value>> {
		self.with_live(|s| s.attribute(name))
	}

	pub fn attribute_names(&self) -> Result<Vec<String>> {
		self.with_live(|s| s.attribute_names())
	}

	/// Stores an attribute and returns the previous value. A `null` value
	/// removes the attribute.
	pub fn set_attribute(&self, name: &str, value: Value) -> Result<Option<Value>> {
		if value.is_null() {
			return self.remove_attribute(name);
		}
		let previous = self.with_live(|s| s.set_attribute(name, value.clone()))?;
		let notify_replaced = match &previous {
			None => false,
			Some(old) => old != &value || self.shared.config.notify_attribute_listener_on_unchanged_value,
		};
		let added = previous.is_none();
		let event = self.attribute_event(name, Some(value), previous.clone());
		if added {
			self.shared.listeners.attribute_added(&event);
		} else if notify_replaced {
			self.shared.listeners.attribute_replaced(&event);
		}
		Ok(previous)
	}

	pub fn remove_attribute(&self, name: &str) -> Result<Option<Value>> {
		let previous = self.with_live(|s| s.remove_attribute(name))?;
		if previous.is_some() {
			let event = self.attribute_event(name, None, previous.clone());
			self.shared.listeners.attribute_removed(&event);
		}
		Ok(previous)
	}

	/// Non-replicated context. Available on detached handles too.
	pub fn local_context(&self) -> Arc<LocalContext> {
		Arc::clone(self.registry.load().context())
	}

	pub fn auth_type(&self) -> Option<String> {
		self.registry.load().context().auth_type()
	}

	pub fn set_auth_type(&self, auth_type: Option<String>) {
		self.registry.load().context().set_auth_type(auth_type);
	}

	pub fn principal(&self) -> Option<Principal> {
		self.registry.load().context().principal()
	}

	pub fn set_principal(&self, principal: Option<Principal>) {
		self.registry.load().context().set_principal(principal);
	}

	pub fn note(&self, name: &str) -> Option<Value> {
		self.registry.load().context().note(name)
	}

	pub fn set_note(&self, name: &str, value: Value) -> Option<Value> {
		self.registry.load().context().set_note(name, value)
	}

	pub fn remove_note(&self, name: &str) -> Option<Value> {
		self.registry.load().context().remove_note(name)
	}

	pub fn note_names(&self) -> Vec<String> {
		self.registry.load().context().note_names()
	}

	/// Ends the request's use of the session: records the access window,
	/// closes the session and batch, detaches the handle and releases the
	/// lease. Failures are logged, never returned. Idempotent.
	pub fn end_access(&self) {
		self.release_binding(true);
	}

	/// Like [`SessionFacade::end_access`] without touching access times.
	pub fn close(&self) {
		self.release_binding(false);
	}

	/// Fires session-destroyed, then invalidates and closes the session and
	/// detaches the handle. Listeners kept in the local context are notified
	/// last, after the batch has closed.
	pub fn invalidate(&self) -> Result<()> {
		let state = self.registry.load();
		let internal_id = state.internal_id.clone();
		let snapshot = self.with_live(|s| SessionSnapshot::capture(s, &internal_id))?;
		self.shared.listeners.session_destroyed(&snapshot);

		let Some(session) = state.live_session() else {
			return Err(self.detached());
		};
		let Some(suspended) = self.batch.lock().take() else {
			return Err(self.detached());
		};
		let result = close_within(&suspended, session, |_, session| session.invalidate());
		self.registry.degrade();
		self.lease.release();
		debug!(target = "cs.session", id = %internal_id, "session invalidated");
		listener::context_destroyed(state.context(), &internal_id);
		result.map_err(|err| Error::from_store(&internal_id, err))
	}

	/// Moves the session to `new_id`: creates the new store session, copies
	/// attributes, timeout, access window, auth type, principal and context
	/// listeners, publishes it to the handle and invalidates the old one.
	///
	/// On failure the handle keeps the old session or, when the old session
	/// was invalidated concurrently and [`RenameRecovery::CloseInvalidated`]
	/// applies, becomes detached. It never holds a partially copied session.
	pub fn tell_changed_session_id(&self, new_id: &str, notify: IdChangeNotification) -> Result<()> {
		let new_id = self.shared.codec.strip(new_id);
		let previous = self.registry.load();
		let Some(old) = previous.live_session() else {
			return Err(self.detached());
		};
		let Some(suspended) = self.batch.lock().clone() else {
			return Err(self.detached());
		};

		let renamed = self.rename_within(&suspended, &previous, old, new_id);
		let snapshot = match renamed {
			Ok(snapshot) => snapshot,
			Err(err) => {
				if err.is_invalid_state() {
					match self.shared.config.rename_recovery {
						RenameRecovery::CloseInvalidated => self.close_if_invalid(old),
						RenameRecovery::RetainInvalidated => {
							debug!(target = "cs.session", id = %previous.internal_id, "rename failed; keeping invalidated session bound");
						}
					}
				}
				return Err(Error::from_store(&previous.internal_id, err));
			}
		};

		debug!(target = "cs.session", old = %previous.internal_id, new = %snapshot.internal_id, "session id changed");
		if notify.session_listeners {
			self.shared.listeners.session_id_changed(&snapshot, &previous.internal_id);
		}
		if notify.container_listeners {
			self.shared.listeners.container_event(&ContainerEvent::SessionIdChanged {
				old_id: previous.internal_id.clone(),
				new_id: snapshot.internal_id.clone(),
			});
		}
		Ok(())
	}

	fn rename_within(
		&self,
		suspended: &SuspendedOf<S>,
		previous: &Arc<HandleState<S::Session>>,
		old: &S::Session,
		new_id: &str,
	) -> StoreResult<SessionSnapshot> {
		let _scope = batch::resume(suspended)?;
		let created = self.shared.store.create_session(new_id)?;
		let internal_id = self.shared.internal_id(new_id);
		// Only the old session's invalidation may fail after publication.
		let snapshot = match copy_state(old, &created).and_then(|()| SessionSnapshot::capture(&created, &internal_id)) {
			Ok(snapshot) => snapshot,
			Err(err) => {
				discard(&created);
				return Err(err);
			}
		};

		self.registry.set(created, internal_id);
		if let Err(err) = old.invalidate() {
			let rejected = self.registry.restore(Arc::clone(previous));
			if let Some(created) = rejected.live_session() {
				discard(created);
			}
			return Err(err);
		}
		old.close();
		Ok(snapshot)
	}

	/// Runs `op` against the live session under the resumed batch.
	///
	/// An invalid-state failure closes the session and releases the lease
	/// when the session is confirmed invalid, then surfaces as
	/// [`Error::Invalidated`].
	fn with_live<T>(&self, op: impl FnOnce(&S::Session) -> StoreResult<T>) -> Result<T> {
		let state = self.registry.load();
		let Some(session) = state.live_session() else {
			return Err(self.detached());
		};
		let Some(suspended) = self.batch.lock().clone() else {
			return Err(self.detached());
		};
		let result = batch::resume(&suspended).and_then(|_scope| op(session));
		result.map_err(|err| {
			if err.is_invalid_state() {
				self.close_if_invalid(session);
			}
			Error::from_store(&state.internal_id, err)
		})
	}

	fn close_if_invalid(&self, session: &S::Session) {
		if !session.is_valid() {
			debug!(target = "cs.session", id = %session.id(), "closing session invalidated elsewhere");
			self.release_binding(false);
		}
	}

	/// Closes the session and batch, detaches the handle and releases the
	/// lease. Runs at most once per handle.
	fn release_binding(&self, record_access: bool) {
		let Some(suspended) = self.batch.lock().take() else {
			return;
		};
		let state = self.registry.load();
		if let Some(session) = state.live_session() {
			let start = self.start_time;
			let result = close_within(&suspended, session, |scope, session| {
				if record_access && scope.state() != Some(BatchState::Discarded) && session.is_valid() {
					session.set_last_access(start, SystemTime::now())?;
				}
				Ok(())
			});
			if let Err(err) = result {
				warn!(target = "cs.session", id = %state.internal_id, error = %err, "failed to end session access");
			}
		}
		self.registry.degrade();
		self.lease.release();
		debug!(target = "cs.session", id = %state.internal_id, "session released");
	}

	fn attribute_event(&self, name: &str, value: Option<Value>, previous: Option<Value>) -> AttributeEvent {
		let state = self.registry.load();
		AttributeEvent {
			session_id: state.id().to_string(),
			internal_id: state.internal_id.clone(),
			name: name.to_string(),
			value,
			previous,
		}
	}

	fn detached(&self) -> Error {
		Error::Detached {
			id: self.registry.load().internal_id.clone(),
		}
	}
}

impl<S: SessionStore> Drop for SessionFacade<S> {
	fn drop(&mut self) {
		if self.batch.get_mut().is_some() {
			warn!(target = "cs.session", id = %self.registry.load().internal_id, "handle dropped while bound to a request");
			self.release_binding(false);
		}
	}
}

/// Resumes `suspended`, runs `work`, then closes the session and the batch.
/// The session is closed even when the batch cannot be resumed.
fn close_within<B, T, R>(suspended: &B, session: &T, work: impl FnOnce(&BatchScope<B::Batch>, &T) -> StoreResult<R>) -> StoreResult<R>
where
	B: SuspendedBatch,
	T: StoreSession,
{
	let scope = match batch::resume(suspended) {
		Ok(scope) => scope,
		Err(err) => {
			session.close();
			return Err(err);
		}
	};
	let result = work(&scope, session);
	session.close();
	let closed = scope.close();
	let value = result?;
	closed.map(|()| value)
}

fn copy_state<T: StoreSession>(from: &T, to: &T) -> StoreResult<()> {
	for name in from.attribute_names()? {
		if let Some(value) = from.attribute(&name)? {
			to.set_attribute(&name, value)?;
		}
	}
	to.set_timeout(from.timeout()?)?;
	to.set_last_access(from.last_access_start_time()?, from.last_access_end_time()?)?;
	to.context().set_auth_type(from.context().auth_type());
	to.context().set_principal(from.context().principal());
	for listener in from.context().listeners() {
		to.context().add_listener(listener);
	}
	Ok(())
}

/// Drops a session that must never become visible.
fn discard<T: StoreSession>(session: &T) {
	if let Err(err) = session.invalidate() {
		warn!(target = "cs.session", id = %session.id(), error = %err, "failed to discard session");
	}
	session.close();
}
