//! Listener registration and failure-isolated dispatch.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use clustered_session_spi::LocalContext;
use parking_lot::RwLock;
use tracing::warn;

use crate::event::{AttributeEvent, ContainerEvent, SessionSnapshot};

/// Per-session lifecycle and attribute callbacks.
///
/// Every method defaults to a no-op. Errors and panics are logged and never
/// reach the operation that triggered the notification.
pub trait SessionListener: Send + Sync {
	fn session_created(&self, _session: &SessionSnapshot) -> anyhow::Result<()> {
		Ok(())
	}

	fn session_destroyed(&self, _session: &SessionSnapshot) -> anyhow::Result<()> {
		Ok(())
	}

	fn session_id_changed(&self, _session: &SessionSnapshot, _old_id: &str) -> anyhow::Result<()> {
		Ok(())
	}

	fn attribute_added(&self, _event: &AttributeEvent) -> anyhow::Result<()> {
		Ok(())
	}

	fn attribute_removed(&self, _event: &AttributeEvent) -> anyhow::Result<()> {
		Ok(())
	}

	fn attribute_replaced(&self, _event: &AttributeEvent) -> anyhow::Result<()> {
		Ok(())
	}
}

pub trait ContainerListener: Send + Sync {
	fn container_event(&self, event: &ContainerEvent) -> anyhow::Result<()>;
}

#[derive(Default)]
pub(crate) struct Listeners {
	session: RwLock<Vec<Arc<dyn SessionListener>>>,
	container: RwLock<Vec<Arc<dyn ContainerListener>>>,
}

impl Listeners {
	pub(crate) fn add_session(&self, listener: Arc<dyn SessionListener>) {
		self.session.write().push(listener);
	}

	pub(crate) fn add_container(&self, listener: Arc<dyn ContainerListener>) {
		self.container.write().push(listener);
	}

	pub(crate) fn session_created(&self, session: &SessionSnapshot) {
		self.each_session("session_created", |l| l.session_created(session));
	}

	pub(crate) fn session_destroyed(&self, session: &SessionSnapshot) {
		self.each_session("session_destroyed", |l| l.session_destroyed(session));
	}

	pub(crate) fn session_id_changed(&self, session: &SessionSnapshot, old_id: &str) {
		self.each_session("session_id_changed", |l| l.session_id_changed(session, old_id));
	}

	pub(crate) fn attribute_added(&self, event: &AttributeEvent) {
		self.each_session("attribute_added", |l| l.attribute_added(event));
	}

	pub(crate) fn attribute_removed(&self, event: &AttributeEvent) {
		self.each_session("attribute_removed", |l| l.attribute_removed(event));
	}

	pub(crate) fn attribute_replaced(&self, event: &AttributeEvent) {
		self.each_session("attribute_replaced", |l| l.attribute_replaced(event));
	}

	pub(crate) fn container_event(&self, event: &ContainerEvent) {
		let listeners = self.container.read().clone();
		for listener in listeners {
			isolate("container_event", || listener.container_event(event));
		}
	}

	fn each_session(&self, kind: &'static str, notify: impl Fn(&dyn SessionListener) -> anyhow::Result<()>) {
		// Snapshot so a listener may register further listeners.
		let listeners = self.session.read().clone();
		for listener in listeners {
			isolate(kind, || notify(listener.as_ref()));
		}
	}
}

/// Notifies the listeners kept in `context` that the session is gone.
pub(crate) fn context_destroyed(context: &LocalContext, id: &str) {
	for listener in context.listeners() {
		isolate("context_destroyed", || {
			listener.session_destroyed(id);
			Ok(())
		});
	}
}

fn isolate(kind: &'static str, call: impl FnOnce() -> anyhow::Result<()>) {
	match panic::catch_unwind(AssertUnwindSafe(call)) {
		Ok(Ok(())) => {}
		Ok(Err(err)) => warn!(target = "cs.listener", kind, error = %err, "listener failed"),
		Err(_) => warn!(target = "cs.listener", kind, "listener panicked"),
	}
}
