//! In-memory session store.
//!
//! Backs tests and single-node embedding. Batches bind to the thread that
//! resumed them, and every session operation except local-context access
//! requires a batch of this store to be active on the calling thread, so
//! misuse of the batch lifecycle surfaces as a [`StoreError`] instead of
//! passing silently.
//!
//! Writes apply immediately. Discarding a batch rolls back only the sessions
//! it created.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread::{self, ThreadId};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clustered_session_spi::{Batch, BatchState, LocalContext, SessionStore, StoreError, StoreResult, StoreSession, SuspendedBatch};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use crate::event::SessionSnapshot;
use crate::manager::ExpirationListener;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

thread_local! {
	static ACTIVE: RefCell<Option<Arc<BatchInner>>> = const { RefCell::new(None) };
}

#[derive(Clone)]
pub struct MemoryStore {
	inner: Arc<StoreInner>,
}

struct StoreInner {
	sessions: Mutex<HashMap<String, Arc<Entry>>>,
	default_timeout: Duration,
	next_id: AtomicU64,
	next_batch: AtomicU64,
	batches: Mutex<HashMap<u64, Weak<BatchInner>>>,
	open_batches: AtomicUsize,
	open_sessions: AtomicUsize,
}

struct Entry {
	id: String,
	context: Arc<LocalContext>,
	created_by: u64,
	record: Mutex<Record>,
}

struct Record {
	valid: bool,
	accessed: bool,
	creation_time: SystemTime,
	last_access_start: SystemTime,
	last_access_end: SystemTime,
	timeout: Duration,
	attributes: HashMap<String, Value>,
}

impl Record {
	fn is_expired(&self, now: SystemTime) -> bool {
		if self.timeout.is_zero() {
			return false;
		}
		now.duration_since(self.last_access_end).is_ok_and(|idle| idle > self.timeout)
	}
}

impl std::fmt::Debug for MemoryStore {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("MemoryStore")
			.field("sessions", &self.session_count())
			.field("open_batches", &self.open_batches())
			.field("open_sessions", &self.open_sessions())
			.finish()
	}
}

impl Default for MemoryStore {
	fn default() -> Self {
		Self::new()
	}
}

impl MemoryStore {
	pub fn new() -> Self {
		Self::with_timeout(DEFAULT_TIMEOUT)
	}

	/// Store whose new sessions expire after `timeout` of inactivity.
	pub fn with_timeout(timeout: Duration) -> Self {
		Self {
			inner: Arc::new(StoreInner {
				sessions: Mutex::new(HashMap::new()),
				default_timeout: timeout,
				next_id: AtomicU64::new(1),
				next_batch: AtomicU64::new(1),
				batches: Mutex::new(HashMap::new()),
				open_batches: AtomicUsize::new(0),
				open_sessions: AtomicUsize::new(0),
			}),
		}
	}

	/// Invalidates `id` as if another node had done so. Returns `false` when
	/// no valid session has that id.
	pub fn invalidate(&self, id: &str) -> bool {
		let Some(entry) = self.inner.sessions.lock().remove(id) else {
			return false;
		};
		entry.record.lock().valid = false;
		debug!(target = "cs.memory", %id, "session invalidated externally");
		true
	}

	pub fn contains(&self, id: &str) -> bool {
		self.inner.sessions.lock().contains_key(id)
	}

	pub fn session_count(&self) -> usize {
		self.inner.sessions.lock().len()
	}

	/// Marks every open batch as discarded, as when the store aborts the
	/// transactions of a failing member. Returns the number of batches marked.
	pub fn discard_open_batches(&self) -> usize {
		let open: Vec<Arc<BatchInner>> = self.inner.batches.lock().values().filter_map(Weak::upgrade).collect();
		let discarded = open.iter().filter(|batch| batch.discard()).count();
		debug!(target = "cs.memory", discarded, "open batches discarded");
		discarded
	}

	/// Batches created and not yet closed.
	pub fn open_batches(&self) -> usize {
		self.inner.open_batches.load(Ordering::SeqCst)
	}

	/// Session views handed out and not yet closed.
	pub fn open_sessions(&self) -> usize {
		self.inner.open_sessions.load(Ordering::SeqCst)
	}

	/// Removes every expired session and reports it to `listener`. Returns
	/// the number of sessions removed.
	pub fn purge_expired(&self, listener: &ExpirationListener) -> usize {
		let now = SystemTime::now();
		let expired: Vec<Arc<Entry>> = {
			let mut sessions = self.inner.sessions.lock();
			let ids: Vec<String> = sessions
				.iter()
				.filter(|(_, entry)| entry.record.lock().is_expired(now))
				.map(|(id, _)| id.clone())
				.collect();
			ids.iter().filter_map(|id| sessions.remove(id)).collect()
		};
		for entry in &expired {
			let snapshot = {
				let mut record = entry.record.lock();
				record.valid = false;
				SessionSnapshot {
					id: entry.id.clone(),
					internal_id: entry.id.clone(),
					is_new: !record.accessed,
					creation_time: record.creation_time,
					last_accessed_time: record.last_access_start,
					timeout: record.timeout,
					attributes: record.attributes.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
				}
			};
			debug!(target = "cs.memory", id = %entry.id, "session expired");
			listener.session_expired(snapshot);
		}
		expired.len()
	}

	fn check_active(&self) -> StoreResult<Arc<BatchInner>> {
		let active = ACTIVE.with(|slot| slot.borrow().clone());
		match active {
			Some(batch) if Arc::ptr_eq(&batch.store, &self.inner) => Ok(batch),
			_ => Err(StoreError::Failure("no batch of this store is active on the calling thread".to_string())),
		}
	}

	fn open(&self, entry: Arc<Entry>) -> MemorySession {
		self.inner.open_sessions.fetch_add(1, Ordering::SeqCst);
		MemorySession {
			entry,
			store: self.clone(),
			closed: AtomicBool::new(false),
		}
	}
}

impl SessionStore for MemoryStore {
	type Session = MemorySession;
	type Batch = MemoryBatch;

	fn create_identifier(&self) -> String {
		let seq = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
		let millis = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis()).unwrap_or_default();
		format!("{millis:012X}{seq:06X}")
	}

	fn create_batch(&self) -> StoreResult<MemoryBatch> {
		let inner = Arc::new(BatchInner {
			id: self.inner.next_batch.fetch_add(1, Ordering::SeqCst),
			store: Arc::clone(&self.inner),
			state: Mutex::new(BatchState::Started),
			owner: Mutex::new(None),
		});
		inner.attach()?;
		self.inner.batches.lock().insert(inner.id, Arc::downgrade(&inner));
		self.inner.open_batches.fetch_add(1, Ordering::SeqCst);
		Ok(MemoryBatch { inner })
	}

	fn create_session(&self, id: &str) -> StoreResult<MemorySession> {
		let batch = self.check_active()?;
		let now = SystemTime::now();
		let entry = Arc::new(Entry {
			id: id.to_string(),
			context: Arc::new(LocalContext::new()),
			created_by: batch.id,
			record: Mutex::new(Record {
				valid: true,
				accessed: false,
				creation_time: now,
				last_access_start: now,
				last_access_end: now,
				timeout: self.inner.default_timeout,
				attributes: HashMap::new(),
			}),
		});
		{
			let mut sessions = self.inner.sessions.lock();
			if sessions.contains_key(id) {
				return Err(StoreError::Failure(format!("session {id} already exists")));
			}
			sessions.insert(id.to_string(), Arc::clone(&entry));
		}
		debug!(target = "cs.memory", %id, batch = batch.id, "session created");
		Ok(self.open(entry))
	}

	fn find_session(&self, id: &str) -> StoreResult<Option<MemorySession>> {
		self.check_active()?;
		let entry = self.inner.sessions.lock().get(id).cloned();
		Ok(entry.map(|entry| self.open(entry)))
	}
}

/// View of one stored session.
pub struct MemorySession {
	entry: Arc<Entry>,
	store: MemoryStore,
	closed: AtomicBool,
}

impl MemorySession {
	fn read<R>(&self, f: impl FnOnce(&Record) -> R) -> StoreResult<R> {
		self.store.check_active()?;
		let record = self.entry.record.lock();
		if !record.valid {
			return Err(StoreError::invalidated(&self.entry.id));
		}
		Ok(f(&record))
	}

	fn write<R>(&self, f: impl FnOnce(&mut Record) -> R) -> StoreResult<R> {
		self.store.check_active()?;
		let mut record = self.entry.record.lock();
		if !record.valid {
			return Err(StoreError::invalidated(&self.entry.id));
		}
		Ok(f(&mut record))
	}
}

impl StoreSession for MemorySession {
	fn id(&self) -> &str {
		&self.entry.id
	}

	fn context(&self) -> &Arc<LocalContext> {
		&self.entry.context
	}

	fn is_valid(&self) -> bool {
		self.entry.record.lock().valid
	}

	fn is_new(&self) -> StoreResult<bool> {
		self.read(|r| !r.accessed)
	}

	fn is_expired(&self) -> StoreResult<bool> {
		self.read(|r| r.is_expired(SystemTime::now()))
	}

	fn creation_time(&self) -> StoreResult<SystemTime> {
		self.read(|r| r.creation_time)
	}

	fn last_access_start_time(&self) -> StoreResult<SystemTime> {
		self.read(|r| r.last_access_start)
	}

	fn last_access_end_time(&self) -> StoreResult<SystemTime> {
		self.read(|r| r.last_access_end)
	}

	fn set_last_access(&self, start: SystemTime, end: SystemTime) -> StoreResult<()> {
		self.write(|r| {
			r.accessed = true;
			r.last_access_start = start;
			r.last_access_end = end;
		})
	}

	fn timeout(&self) -> StoreResult<Duration> {
		self.read(|r| r.timeout)
	}

	fn set_timeout(&self, timeout: Duration) -> StoreResult<()> {
		self.write(|r| r.timeout = timeout)
	}

	fn attribute_names(&self) -> StoreResult<Vec<String>> {
		self.read(|r| r.attributes.keys().cloned().collect())
	}

	fn attribute(&self, name: &str) -> StoreResult<Option<Value>> {
		self.read(|r| r.attributes.get(name).cloned())
	}

	fn set_attribute(&self, name: &str, value: Value) -> StoreResult<Option<Value>> {
		self.write(|r| r.attributes.insert(name.to_string(), value))
	}

	fn remove_attribute(&self, name: &str) -> StoreResult<Option<Value>> {
		self.write(|r| r.attributes.remove(name))
	}

	fn invalidate(&self) -> StoreResult<()> {
		self.write(|r| r.valid = false)?;
		let mut sessions = self.store.inner.sessions.lock();
		if sessions.get(&self.entry.id).is_some_and(|e| Arc::ptr_eq(e, &self.entry)) {
			sessions.remove(&self.entry.id);
		}
		Ok(())
	}

	fn close(&self) {
		if !self.closed.swap(true, Ordering::AcqRel) {
			self.store.inner.open_sessions.fetch_sub(1, Ordering::SeqCst);
		}
	}
}

struct BatchInner {
	id: u64,
	store: Arc<StoreInner>,
	state: Mutex<BatchState>,
	owner: Mutex<Option<ThreadId>>,
}

impl BatchInner {
	fn attach(self: &Arc<Self>) -> StoreResult<()> {
		if *self.state.lock() == BatchState::Closed {
			return Err(StoreError::Failure(format!("batch {} is closed", self.id)));
		}
		let current = thread::current().id();
		let mut owner = self.owner.lock();
		if owner.is_some_and(|t| t != current) {
			return Err(StoreError::Failure(format!("batch {} is active on another thread", self.id)));
		}
		ACTIVE.with(|slot| {
			let mut slot = slot.borrow_mut();
			match slot.as_ref() {
				Some(active) if !Arc::ptr_eq(active, self) => {
					Err(StoreError::Failure(format!("batch {} is already active on this thread", active.id)))
				}
				_ => {
					*slot = Some(Arc::clone(self));
					*owner = Some(current);
					Ok(())
				}
			}
		})
	}

	/// Moves a started batch to [`BatchState::Discarded`].
	fn discard(&self) -> bool {
		let mut state = self.state.lock();
		if *state != BatchState::Started {
			return false;
		}
		*state = BatchState::Discarded;
		true
	}

	fn detach(self: &Arc<Self>) {
		ACTIVE.with(|slot| {
			let mut slot = slot.borrow_mut();
			if slot.as_ref().is_some_and(|active| Arc::ptr_eq(active, self)) {
				*slot = None;
			}
		});
		*self.owner.lock() = None;
	}
}

/// Batch attached to the current thread. Dropping it detaches it without
/// closing.
pub struct MemoryBatch {
	inner: Arc<BatchInner>,
}

impl Batch for MemoryBatch {
	type Suspended = SuspendedMemoryBatch;

	fn state(&self) -> BatchState {
		*self.inner.state.lock()
	}

	fn discard(&mut self) {
		self.inner.discard();
	}

	fn close(self) -> StoreResult<()> {
		let previous = std::mem::replace(&mut *self.inner.state.lock(), BatchState::Closed);
		match previous {
			BatchState::Closed => return Ok(()),
			BatchState::Discarded => {
				let mut sessions = self.inner.store.sessions.lock();
				sessions.retain(|_, entry| {
					if entry.created_by != self.inner.id {
						return true;
					}
					entry.record.lock().valid = false;
					false
				});
				debug!(target = "cs.memory", batch = self.inner.id, "batch rolled back");
			}
			BatchState::Started => {}
		}
		self.inner.store.batches.lock().remove(&self.inner.id);
		self.inner.store.open_batches.fetch_sub(1, Ordering::SeqCst);
		Ok(())
	}

	fn suspend(self) -> SuspendedMemoryBatch {
		SuspendedMemoryBatch {
			inner: Arc::clone(&self.inner),
		}
	}
}

impl Drop for MemoryBatch {
	fn drop(&mut self) {
		self.inner.detach();
	}
}

#[derive(Clone)]
pub struct SuspendedMemoryBatch {
	inner: Arc<BatchInner>,
}

impl SuspendedBatch for SuspendedMemoryBatch {
	type Batch = MemoryBatch;

	fn resume(&self) -> StoreResult<MemoryBatch> {
		self.inner.attach()?;
		Ok(MemoryBatch {
			inner: Arc::clone(&self.inner),
		})
	}
}
