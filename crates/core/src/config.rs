//! Facade configuration loaded from JSON.
//!
//! Every key is optional; a missing file section falls back to the defaults
//! below.
//!
//! ```json
//! {
//!   "routeDelimiter": ".",
//!   "renameRecovery": "closeInvalidated",
//!   "notifyAttributeListenerOnUnchangedValue": false
//! }
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

pub const DEFAULT_ROUTE_DELIMITER: char = '.';

/// What a failed session-id change does with the old session when the store
/// reports it was invalidated concurrently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RenameRecovery {
	/// Close the old session if it is confirmed invalid and release the
	/// request's lease. The handle becomes out-of-band.
	#[default]
	CloseInvalidated,
	/// Leave the old session bound to the handle. The container is expected
	/// to end access normally, which closes it then.
	RetainInvalidated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FacadeConfig {
	/// Separates the base session id from the routing suffix.
	pub route_delimiter: char,
	pub rename_recovery: RenameRecovery,
	/// Fire attribute-replaced even when the new value equals the old one.
	pub notify_attribute_listener_on_unchanged_value: bool,
}

impl Default for FacadeConfig {
	fn default() -> Self {
		Self {
			route_delimiter: DEFAULT_ROUTE_DELIMITER,
			rename_recovery: RenameRecovery::default(),
			notify_attribute_listener_on_unchanged_value: false,
		}
	}
}

impl FacadeConfig {
	/// Parses and validates a JSON document.
	pub fn from_json(json: &str) -> Result<Self> {
		let config: Self = serde_json::from_str(json)?;
		config.validate()?;
		Ok(config)
	}

	/// Reads, parses, and validates a JSON file.
	pub fn load(path: &Path) -> Result<Self> {
		let content = fs::read_to_string(path)?;
		let config = Self::from_json(&content)?;
		debug!(target = "cs.config", path = %path.display(), ?config, "loaded facade config");
		Ok(config)
	}

	pub fn validate(&self) -> Result<()> {
		let d = self.route_delimiter;
		if d.is_alphanumeric() || d.is_whitespace() || d == '-' || d == '_' {
			return Err(Error::Config(format!("route delimiter {d:?} may appear in session ids")));
		}
		Ok(())
	}
}
