// Shared fixtures for the integration suites.

#![allow(dead_code)]

use std::sync::{Arc, Mutex, Once};
use std::time::{Duration, SystemTime};

use clustered_session::memory::{MemoryBatch, MemorySession};
use clustered_session::spi::{LocalContext, SessionStore, StoreError, StoreResult, StoreSession};
use clustered_session::{
	AttributeEvent, ContainerEvent, ContainerListener, FacadeConfig, FacadeManager, FixedRoute, MemoryStore, SessionListener, SessionSnapshot,
};

pub const ROUTE: &str = "node1";

pub fn init_tracing() {
	static INIT: Once = Once::new();
	INIT.call_once(|| {
		let _ = tracing_subscriber::fmt()
			.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
			.with_test_writer()
			.try_init();
	});
}

pub fn manager(store: &MemoryStore) -> FacadeManager<MemoryStore> {
	manager_with(store, FacadeConfig::default())
}

pub fn manager_with(store: &MemoryStore, config: FacadeConfig) -> FacadeManager<MemoryStore> {
	init_tracing();
	FacadeManager::new(store.clone(), FixedRoute(ROUTE.to_string()), config).expect("valid config")
}

/// Asserts the store has no batch or session view left open.
pub fn assert_no_leaks(store: &MemoryStore) {
	assert_eq!(store.open_batches(), 0, "leaked batch");
	assert_eq!(store.open_sessions(), 0, "leaked session view");
}

/// Records every notification as a short string, together with whether a
/// batch was still attached to the notifying thread.
pub struct Recorder {
	store: MemoryStore,
	events: Mutex<Vec<String>>,
	inside_batch: Mutex<Vec<String>>,
}

impl Recorder {
	pub fn new(store: &MemoryStore) -> Arc<Self> {
		Arc::new(Self {
			store: store.clone(),
			events: Mutex::new(Vec::new()),
			inside_batch: Mutex::new(Vec::new()),
		})
	}

	pub fn events(&self) -> Vec<String> {
		self.events.lock().expect("recorder lock").clone()
	}

	/// Notifications delivered while a batch was attached.
	pub fn inside_batch(&self) -> Vec<String> {
		self.inside_batch.lock().expect("recorder lock").clone()
	}

	fn record(&self, event: String) -> anyhow::Result<()> {
		// Store calls only succeed while a batch is attached to this thread.
		if self.store.find_session("no-such-session").is_ok() {
			self.inside_batch.lock().expect("recorder lock").push(event.clone());
		}
		self.events.lock().expect("recorder lock").push(event);
		Ok(())
	}
}

impl SessionListener for Recorder {
	fn session_created(&self, session: &SessionSnapshot) -> anyhow::Result<()> {
		self.record(format!("created {}", session.internal_id))
	}

	fn session_destroyed(&self, session: &SessionSnapshot) -> anyhow::Result<()> {
		self.record(format!("destroyed {}", session.internal_id))
	}

	fn session_id_changed(&self, session: &SessionSnapshot, old_id: &str) -> anyhow::Result<()> {
		self.record(format!("id_changed {old_id} -> {}", session.internal_id))
	}

	fn attribute_added(&self, event: &AttributeEvent) -> anyhow::Result<()> {
		self.record(format!("added {}={}", event.name, fmt_value(&event.value)))
	}

	fn attribute_removed(&self, event: &AttributeEvent) -> anyhow::Result<()> {
		self.record(format!("removed {}", event.name))
	}

	fn attribute_replaced(&self, event: &AttributeEvent) -> anyhow::Result<()> {
		self.record(format!("replaced {}={}", event.name, fmt_value(&event.value)))
	}
}

impl ContainerListener for Recorder {
	fn container_event(&self, event: &ContainerEvent) -> anyhow::Result<()> {
		match event {
			ContainerEvent::SessionIdChanged { old_id, new_id } => self.record(format!("container {old_id} -> {new_id}")),
		}
	}
}

fn fmt_value(value: &Option<serde_json::Value>) -> String {
	value.as_ref().map(ToString::to_string).unwrap_or_default()
}

/// Store operation that [`FaultyStore`] can make fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
	Invalidate,
	IsExpired,
	CreationTime,
}

/// [`MemoryStore`] whose sessions fail armed operations with a chosen error.
#[derive(Clone, Default)]
pub struct FaultyStore {
	memory: MemoryStore,
	faults: Arc<Mutex<Vec<(String, Op, StoreError)>>>,
}

impl FaultyStore {
	pub fn memory(&self) -> &MemoryStore {
		&self.memory
	}

	/// Makes `op` on session `id` fail with `err` from now on.
	pub fn arm(&self, id: &str, op: Op, err: StoreError) {
		self.faults.lock().expect("faults lock").push((id.to_string(), op, err));
	}

	fn wrap(&self, inner: MemorySession) -> FaultySession {
		FaultySession {
			inner,
			faults: Arc::clone(&self.faults),
		}
	}
}

pub fn faulty_manager(store: &FaultyStore) -> FacadeManager<FaultyStore> {
	init_tracing();
	FacadeManager::new(store.clone(), FixedRoute(ROUTE.to_string()), FacadeConfig::default()).expect("valid config")
}

impl SessionStore for FaultyStore {
	type Session = FaultySession;
	type Batch = MemoryBatch;

	fn create_identifier(&self) -> String {
		self.memory.create_identifier()
	}

	fn create_batch(&self) -> StoreResult<MemoryBatch> {
		self.memory.create_batch()
	}

	fn create_session(&self, id: &str) -> StoreResult<FaultySession> {
		self.memory.create_session(id).map(|s| self.wrap(s))
	}

	fn find_session(&self, id: &str) -> StoreResult<Option<FaultySession>> {
		Ok(self.memory.find_session(id)?.map(|s| self.wrap(s)))
	}
}

pub struct FaultySession {
	inner: MemorySession,
	faults: Arc<Mutex<Vec<(String, Op, StoreError)>>>,
}

impl FaultySession {
	fn check(&self, op: Op) -> StoreResult<()> {
		let faults = self.faults.lock().expect("faults lock");
		match faults.iter().find(|(id, armed, _)| id == self.inner.id() && *armed == op) {
			Some((_, _, err)) => Err(err.clone()),
			None => Ok(()),
		}
	}
}

impl StoreSession for FaultySession {
	fn id(&self) -> &str {
		self.inner.id()
	}

	fn context(&self) -> &Arc<LocalContext> {
		self.inner.context()
	}

	fn is_valid(&self) -> bool {
		self.inner.is_valid()
	}

	fn is_new(&self) -> StoreResult<bool> {
		self.inner.is_new()
	}

	fn is_expired(&self) -> StoreResult<bool> {
		self.check(Op::IsExpired)?;
		self.inner.is_expired()
	}

	fn creation_time(&self) -> StoreResult<SystemTime> {
		self.check(Op::CreationTime)?;
		self.inner.creation_time()
	}

	fn last_access_start_time(&self) -> StoreResult<SystemTime> {
		self.inner.last_access_start_time()
	}

	fn last_access_end_time(&self) -> StoreResult<SystemTime> {
		self.inner.last_access_end_time()
	}

	fn set_last_access(&self, start: SystemTime, end: SystemTime) -> StoreResult<()> {
		self.inner.set_last_access(start, end)
	}

	fn timeout(&self) -> StoreResult<Duration> {
		self.inner.timeout()
	}

	fn set_timeout(&self, timeout: Duration) -> StoreResult<()> {
		self.inner.set_timeout(timeout)
	}

	fn attribute_names(&self) -> StoreResult<Vec<String>> {
		self.inner.attribute_names()
	}

	fn attribute(&self, name: &str) -> StoreResult<Option<serde_json::Value>> {
		self.inner.attribute(name)
	}

	fn set_attribute(&self, name: &str, value: serde_json::Value) -> StoreResult<Option<serde_json::Value>> {
		self.inner.set_attribute(name, value)
	}

	fn remove_attribute(&self, name: &str) -> StoreResult<Option<serde_json::Value>> {
		self.inner.remove_attribute(name)
	}

	fn invalidate(&self) -> StoreResult<()> {
		self.check(Op::Invalidate)?;
		self.inner.invalidate()
	}

	fn close(&self) {
		self.inner.close();
	}
}
