//! Container entry point: find or create a session for the current request.

use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use clustered_session_spi::{Batch, SessionStore, StoreError, StoreSession, SuspendedBatch};
use tracing::{debug, info, warn};

use crate::barrier::ShutdownBarrier;
use crate::batch::{self, SuspendedOf};
use crate::config::FacadeConfig;
use crate::error::{Error, Result};
use crate::event::SessionSnapshot;
use crate::facade::{IdChangeNotification, SessionFacade};
use crate::listener::{ContainerListener, Listeners, SessionListener};
use crate::route::{Affinity, RouteCodec};

/// State shared by a manager and every handle it has opened.
pub(crate) struct Shared<S: SessionStore> {
	pub(crate) store: S,
	pub(crate) barrier: ShutdownBarrier,
	pub(crate) codec: RouteCodec,
	pub(crate) affinity: Arc<dyn Affinity>,
	pub(crate) listeners: Arc<Listeners>,
	pub(crate) config: FacadeConfig,
}

impl<S: SessionStore> Shared<S> {
	/// Routed id for a store-level id.
	pub(crate) fn internal_id(&self, id: &str) -> String {
		self.codec.format(id, &self.affinity.route(id))
	}
}

pub struct FacadeManager<S: SessionStore> {
	shared: Arc<Shared<S>>,
}

impl<S: SessionStore> fmt::Debug for FacadeManager<S> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("FacadeManager")
			.field("barrier", &self.shared.barrier)
			.field("config", &self.shared.config)
			.finish_non_exhaustive()
	}
}

impl<S: SessionStore> FacadeManager<S> {
	/// Creates a started manager.
	pub fn new(store: S, affinity: impl Affinity + 'static, config: FacadeConfig) -> Result<Self> {
		config.validate()?;
		Ok(Self {
			shared: Arc::new(Shared {
				store,
				barrier: ShutdownBarrier::new(),
				codec: RouteCodec::new(config.route_delimiter),
				affinity: Arc::new(affinity),
				listeners: Arc::new(Listeners::default()),
				config,
			}),
		})
	}

	pub fn store(&self) -> &S {
		&self.shared.store
	}

	pub fn config(&self) -> &FacadeConfig {
		&self.shared.config
	}

	pub fn codec(&self) -> RouteCodec {
		self.shared.codec
	}

	pub fn add_listener(&self, listener: Arc<dyn SessionListener>) {
		self.shared.listeners.add_session(listener);
	}

	pub fn add_container_listener(&self, listener: Arc<dyn ContainerListener>) {
		self.shared.listeners.add_container(listener);
	}

	/// Starts the store, then admits new requests.
	pub fn start(&self) {
		self.shared.store.start();
		self.shared.barrier.start();
		info!(target = "cs.manager", "manager started");
	}

	/// Refuses new requests, waits for in-flight handles to finish, then
	/// stops the store.
	///
	/// Must not be called from a thread that holds an open handle.
	pub fn stop(&self) {
		self.shared.barrier.stop();
		self.shared.store.stop();
		info!(target = "cs.manager", "manager stopped");
	}

	pub fn is_stopped(&self) -> bool {
		self.shared.barrier.is_stopped()
	}

	/// Creates a session under `id`, or under a fresh identifier when `id` is
	/// `None`. Any routing suffix on `id` is ignored.
	///
	/// Returns `Ok(None)` when the store produced an unusable session.
	pub fn create_session(&self, id: Option<&str>) -> Result<Option<SessionFacade<S>>> {
		let id = match id {
			Some(id) => self.shared.codec.strip(id).to_string(),
			None => self.shared.store.create_identifier(),
		};
		self.open(&id, Lookup::Create)
	}

	/// Looks up a live, unexpired session. Any routing suffix on `id` is
	/// ignored.
	pub fn find_session(&self, id: &str) -> Result<Option<SessionFacade<S>>> {
		let id = self.shared.codec.strip(id);
		self.open(id, Lookup::Find)
	}

	/// Renames `facade` to `new_id` (or a fresh identifier) and notifies
	/// every listener. Returns the new routed id.
	pub fn change_session_id(&self, facade: &SessionFacade<S>, new_id: Option<&str>) -> Result<String> {
		let new_id = match new_id {
			Some(id) => self.shared.codec.strip(id).to_string(),
			None => self.shared.store.create_identifier(),
		};
		facade.tell_changed_session_id(&new_id, IdChangeNotification::ALL)?;
		Ok(facade.id())
	}

	/// Out-of-band access to `id` from outside any request.
	pub fn accessor(&self, id: &str) -> SessionAccessor<'_, S> {
		SessionAccessor {
			manager: self,
			id: self.shared.codec.strip(id).to_string(),
		}
	}

	/// Callback for the store to report expired sessions.
	pub fn expiration_listener(&self) -> ExpirationListener {
		ExpirationListener {
			listeners: Arc::clone(&self.shared.listeners),
			codec: self.shared.codec,
			affinity: Arc::clone(&self.shared.affinity),
		}
	}

	fn open(&self, id: &str, lookup: Lookup) -> Result<Option<SessionFacade<S>>> {
		let lease = self.shared.barrier.acquire()?;
		let suspended = self.shared.store.create_batch().map_err(Error::Store)?.suspend();
		let rollback = Rollback::new(suspended.clone(), id);

		let Some(opened) = self.lookup(&suspended, id, lookup)? else {
			return Ok(None);
		};
		rollback.disarm();

		let internal_id = self.shared.internal_id(id);
		let created = opened.created.map(|mut snapshot| {
			snapshot.internal_id.clone_from(&internal_id);
			snapshot
		});
		debug!(target = "cs.manager", %id, %internal_id, ?lookup, "session bound to request");
		let facade = SessionFacade::new(Arc::clone(&self.shared), opened.session, internal_id, suspended, lease, opened.start_time);

		if let Some(snapshot) = created {
			self.shared.listeners.session_created(&snapshot);
		}
		Ok(Some(facade))
	}

	fn lookup(&self, suspended: &SuspendedOf<S>, id: &str, lookup: Lookup) -> Result<Option<Opened<S::Session>>> {
		let _scope = batch::resume(suspended).map_err(Error::Store)?;
		let store = &self.shared.store;
		let found = match lookup {
			Lookup::Create => store.create_session(id).map(Some),
			Lookup::Find => store.find_session(id),
		};
		let Some(session) = found.map_err(|err| Error::from_store(&self.shared.internal_id(id), err))? else {
			debug!(target = "cs.manager", %id, "session not found");
			return Ok(None);
		};

		let admitted = (|| -> std::result::Result<Option<(SystemTime, Option<SessionSnapshot>)>, StoreError> {
			if !session.is_valid() || session.is_expired()? {
				return Ok(None);
			}
			let is_new = session.is_new()?;
			let start_time = if is_new { session.creation_time()? } else { SystemTime::now() };
			let created = match (lookup, is_new) {
				(Lookup::Create, true) => Some(SessionSnapshot::capture(&session, id)?),
				_ => None,
			};
			Ok(Some((start_time, created)))
		})();

		match admitted {
			Ok(Some((start_time, created))) => Ok(Some(Opened {
				session,
				start_time,
				created,
			})),
			Ok(None) => {
				debug!(target = "cs.manager", %id, "session invalid or expired");
				session.close();
				Ok(None)
			}
			Err(err) if err.is_invalid_state() => {
				debug!(target = "cs.manager", %id, "session invalidated during lookup");
				session.close();
				Ok(None)
			}
			Err(err) => {
				session.close();
				Err(Error::Store(err))
			}
		}
	}
}

#[derive(Debug, Clone, Copy)]
enum Lookup {
	Create,
	Find,
}

struct Opened<T> {
	session: T,
	start_time: SystemTime,
	created: Option<SessionSnapshot>,
}

/// Discards the lookup batch unless disarmed.
struct Rollback<'a, B: SuspendedBatch> {
	suspended: Option<B>,
	id: &'a str,
}

impl<'a, B: SuspendedBatch> Rollback<'a, B> {
	fn new(suspended: B, id: &'a str) -> Self {
		Self {
			suspended: Some(suspended),
			id,
		}
	}

	fn disarm(mut self) {
		self.suspended = None;
	}
}

impl<B: SuspendedBatch> Drop for Rollback<'_, B> {
	fn drop(&mut self) {
		let Some(suspended) = self.suspended.take() else {
			return;
		};
		match batch::resume(&suspended) {
			Ok(scope) => scope.rollback_quietly(),
			Err(err) => warn!(target = "cs.manager", id = %self.id, error = %err, "failed to resume batch for rollback"),
		}
		debug!(target = "cs.manager", id = %self.id, "lookup rolled back");
	}
}

/// Short-lived handle on one session outside any request.
pub struct SessionAccessor<'a, S: SessionStore> {
	manager: &'a FacadeManager<S>,
	id: String,
}

impl<S: SessionStore> SessionAccessor<'_, S> {
	pub fn id(&self) -> &str {
		&self.id
	}

	/// Runs `f` against the session under a lease and batch of its own,
	/// committing afterwards. Access times are left untouched. Returns
	/// `Ok(None)` when the session does not exist.
	pub fn access<R>(&self, f: impl FnOnce(&SessionFacade<S>) -> R) -> Result<Option<R>> {
		let Some(facade) = self.manager.find_session(&self.id)? else {
			return Ok(None);
		};
		let result = f(&facade);
		facade.close();
		Ok(Some(result))
	}
}

/// Fires session-destroyed listeners for sessions the store expired.
///
/// Holds only the listener set, never the store, so a store may keep it.
#[derive(Clone)]
pub struct ExpirationListener {
	listeners: Arc<Listeners>,
	codec: RouteCodec,
	affinity: Arc<dyn Affinity>,
}

impl fmt::Debug for ExpirationListener {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ExpirationListener").field("codec", &self.codec).finish_non_exhaustive()
	}
}

impl ExpirationListener {
	/// `snapshot.internal_id` is recomputed from `snapshot.id`.
	pub fn session_expired(&self, mut snapshot: SessionSnapshot) {
		snapshot.internal_id = self.codec.format(&snapshot.id, &self.affinity.route(&snapshot.id));
		debug!(target = "cs.manager", id = %snapshot.id, "session expired");
		self.listeners.session_destroyed(&snapshot);
	}
}
