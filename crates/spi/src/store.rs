//! Session store and the sessions it hands out.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde_json::Value;

use crate::batch::Batch;
use crate::context::LocalContext;
use crate::error::StoreResult;

/// External transactional session store.
///
/// `create_session` and `find_session` must be called while a batch obtained
/// from [`SessionStore::create_batch`] is attached to the calling thread.
pub trait SessionStore: Send + Sync + 'static {
	type Session: StoreSession;
	type Batch: Batch;

	/// Called when the owning manager starts.
	fn start(&self) {}

	/// Called once the owning manager has drained all in-flight requests.
	fn stop(&self) {}

	/// Mints a new session identifier. Never contains the routing delimiter.
	fn create_identifier(&self) -> String;

	/// Opens a new batch attached to the calling thread.
	fn create_batch(&self) -> StoreResult<Self::Batch>;

	/// Creates a session with the given id.
	fn create_session(&self, id: &str) -> StoreResult<Self::Session>;

	/// Looks up an existing session.
	fn find_session(&self, id: &str) -> StoreResult<Option<Self::Session>>;
}

/// One session as seen through the batch that looked it up.
///
/// All methods returning [`StoreResult`] may fail with
/// [`StoreError::InvalidState`](crate::StoreError::InvalidState) when the
/// session was invalidated elsewhere.
pub trait StoreSession: Send + Sync + 'static {
	fn id(&self) -> &str;

	/// Non-replicated context. Usable without an active batch.
	fn context(&self) -> &Arc<LocalContext>;

	/// `false` once invalidated, locally or by another request.
	fn is_valid(&self) -> bool;

	fn is_new(&self) -> StoreResult<bool>;
	fn is_expired(&self) -> StoreResult<bool>;

	fn creation_time(&self) -> StoreResult<SystemTime>;
	fn last_access_start_time(&self) -> StoreResult<SystemTime>;
	fn last_access_end_time(&self) -> StoreResult<SystemTime>;
	fn set_last_access(&self, start: SystemTime, end: SystemTime) -> StoreResult<()>;

	/// Inactivity timeout. [`Duration::ZERO`] means the session never expires.
	fn timeout(&self) -> StoreResult<Duration>;
	fn set_timeout(&self, timeout: Duration) -> StoreResult<()>;

	fn attribute_names(&self) -> StoreResult<Vec<String>>;
	fn attribute(&self, name: &str) -> StoreResult<Option<Value>>;

	/// Stores an attribute, returning the previous value.
	fn set_attribute(&self, name: &str, value: Value) -> StoreResult<Option<Value>>;

	/// Removes an attribute, returning the previous value.
	fn remove_attribute(&self, name: &str) -> StoreResult<Option<Value>>;

	fn invalidate(&self) -> StoreResult<()>;

	/// Releases this view of the session. Idempotent.
	fn close(&self);
}
