//! Session views handed to listeners.
//!
//! Snapshots are captured while a batch is resumed and delivered after it has
//! been suspended or closed, so listeners never touch the store.

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime};

use clustered_session_spi::{StoreResult, StoreSession};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
	/// Store-level id.
	pub id: String,
	/// Routed id seen by the container.
	pub internal_id: String,
	pub is_new: bool,
	pub creation_time: SystemTime,
	pub last_accessed_time: SystemTime,
	/// [`Duration::ZERO`] when the session never expires.
	pub timeout: Duration,
	pub attributes: BTreeMap<String, Value>,
}

impl SessionSnapshot {
	/// Reads every field of `session`. Requires an active batch.
	pub fn capture<T: StoreSession>(session: &T, internal_id: &str) -> StoreResult<Self> {
		let mut attributes = BTreeMap::new();
		for name in session.attribute_names()? {
			if let Some(value) = session.attribute(&name)? {
				attributes.insert(name, value);
			}
		}
		Ok(Self {
			id: session.id().to_string(),
			internal_id: internal_id.to_string(),
			is_new: session.is_new()?,
			creation_time: session.creation_time()?,
			last_accessed_time: session.last_access_start_time()?,
			timeout: session.timeout()?,
			attributes,
		})
	}
}

/// Attribute change on one session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeEvent {
	pub session_id: String,
	pub internal_id: String,
	pub name: String,
	/// New value; `None` for removals.
	pub value: Option<Value>,
	/// Value before the change; `None` for additions.
	pub previous: Option<Value>,
}

/// Notification for container-wide listeners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ContainerEvent {
	#[serde(rename_all = "camelCase")]
	SessionIdChanged { old_id: String, new_id: String },
}
