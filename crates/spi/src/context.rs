//! Per-node session state that is never replicated.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Authenticated user attached to a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
	pub name: String,
	#[serde(default)]
	pub roles: Vec<String>,
}

impl Principal {
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			roles: Vec::new(),
		}
	}

	pub fn with_roles(mut self, roles: impl IntoIterator<Item = impl Into<String>>) -> Self {
		self.roles = roles.into_iter().map(Into::into).collect();
		self
	}
}

/// Node-local callback registered on one session.
pub trait ContextListener: Send + Sync {
	/// The session was invalidated through a handle on this node. `id` is
	/// the routed id seen by the container.
	fn session_destroyed(&self, id: &str);
}

/// Local context of a session.
///
/// Readable and writable without an active batch, and kept by out-of-band
/// handles after the owning request ends.
#[derive(Default)]
pub struct LocalContext {
	auth_type: RwLock<Option<String>>,
	principal: RwLock<Option<Principal>>,
	notes: RwLock<HashMap<String, Value>>,
	listeners: RwLock<Vec<Arc<dyn ContextListener>>>,
}

impl fmt::Debug for LocalContext {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("LocalContext")
			.field("auth_type", &*self.auth_type.read())
			.field("principal", &*self.principal.read())
			.field("notes", &*self.notes.read())
			.field("listeners", &self.listeners.read().len())
			.finish()
	}
}

impl LocalContext {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn auth_type(&self) -> Option<String> {
		self.auth_type.read().clone()
	}

	pub fn set_auth_type(&self, auth_type: Option<String>) {
		*self.auth_type.write() = auth_type;
	}

	pub fn principal(&self) -> Option<Principal> {
		self.principal.read().clone()
	}

	pub fn set_principal(&self, principal: Option<Principal>) {
		*self.principal.write() = principal;
	}

	pub fn note(&self, name: &str) -> Option<Value> {
		self.notes.read().get(name).cloned()
	}

	/// Stores a note, returning the previous value.
	pub fn set_note(&self, name: impl Into<String>, value: Value) -> Option<Value> {
		self.notes.write().insert(name.into(), value)
	}

	pub fn remove_note(&self, name: &str) -> Option<Value> {
		self.notes.write().remove(name)
	}

	/// Note names in no particular order.
	pub fn note_names(&self) -> Vec<String> {
		self.notes.read().keys().cloned().collect()
	}

	pub fn add_listener(&self, listener: Arc<dyn ContextListener>) {
		self.listeners.write().push(listener);
	}

	/// Removes `listener`, compared by pointer. Returns `false` when it was
	/// not registered.
	pub fn remove_listener(&self, listener: &Arc<dyn ContextListener>) -> bool {
		let mut listeners = self.listeners.write();
		let before = listeners.len();
		listeners.retain(|l| !Arc::ptr_eq(l, listener));
		listeners.len() != before
	}

	/// Registered listeners in registration order.
	pub fn listeners(&self) -> Vec<Arc<dyn ContextListener>> {
		self.listeners.read().clone()
	}
}
