// Handle lifecycle: find/create, request-scoped operations, terminal
// operations and lease accounting.

mod support;

use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

use clustered_session::spi::ContextListener;
use clustered_session::{Error, FacadeConfig, FacadeManager, IdChangeNotification, MemoryStore, NoAffinity};
use serde_json::json;
use support::{Recorder, assert_no_leaks, manager};

/// Stops `manager` on another thread and reports whether it returned in time.
fn stops_promptly(manager: &FacadeManager<MemoryStore>) -> bool {
	thread::scope(|scope| {
		let (tx, rx) = mpsc::channel();
		scope.spawn(move || {
			manager.stop();
			let _ = tx.send(());
		});
		rx.recv_timeout(Duration::from_secs(5)).is_ok()
	})
}

#[test]
fn rename_scenario_copies_state_and_retires_old_id() {
	let store = MemoryStore::new();
	let manager = manager(&store);

	let first = manager.create_session(Some("A")).expect("create").expect("session A");
	assert_eq!(first.id(), "A.node1");
	first.set_attribute("x", json!(1)).expect("set x");
	first.end_access();

	let second = manager.find_session("A").expect("find").expect("session A");
	assert_eq!(second.attribute("x").expect("get x"), Some(json!(1)));
	second.tell_changed_session_id("B", clustered_session::IdChangeNotification::ALL).expect("rename");
	assert_eq!(second.id(), "B.node1");
	assert_eq!(second.base_id(), "B");
	assert_eq!(second.attribute("x").expect("get x"), Some(json!(1)));
	second.end_access();

	assert!(manager.find_session("A").expect("find").is_none());
	let renamed = manager.find_session("B.node1").expect("find").expect("session B");
	assert_eq!(renamed.attribute("x").expect("get x"), Some(json!(1)));
	renamed.end_access();

	assert_no_leaks(&store);
}

#[test]
fn terminal_operations_release_the_lease_once() {
	let store = MemoryStore::new();
	let manager = manager(&store);

	let ended = manager.create_session(None).expect("create").expect("session");
	ended.end_access();
	ended.end_access();
	ended.close();
	assert!(ended.is_detached());
	assert!(matches!(ended.invalidate(), Err(Error::Detached { .. })));

	let invalidated = manager.create_session(None).expect("create").expect("session");
	invalidated.invalidate().expect("invalidate");
	invalidated.end_access();
	assert!(!invalidated.is_valid());

	let dropped = manager.create_session(None).expect("create").expect("session");
	drop(dropped);

	assert_no_leaks(&store);
	assert!(stops_promptly(&manager));
	assert!(matches!(manager.create_session(None), Err(Error::ManagerStopped)));
}

#[test]
fn not_found_rolls_back_and_releases() {
	let store = MemoryStore::new();
	let manager = manager(&store);

	assert!(manager.find_session("missing").expect("find").is_none());
	assert!(manager.find_session("missing.node9").expect("find").is_none());
	assert_no_leaks(&store);
	assert!(stops_promptly(&manager));
}

#[test]
fn expired_session_is_not_found() {
	let store = MemoryStore::with_timeout(Duration::from_millis(20));
	let manager = manager(&store);

	let session = manager.create_session(Some("A")).expect("create").expect("session");
	session.end_access();
	thread::sleep(Duration::from_millis(100));

	assert!(manager.find_session("A").expect("find").is_none());
	assert_no_leaks(&store);
}

#[test]
fn routing_suffix_is_stripped_on_lookup() {
	let store = MemoryStore::new();
	let manager = manager(&store);

	manager.create_session(Some("A.other-node")).expect("create").expect("session").end_access();
	assert!(store.contains("A"));

	let found = manager.find_session("A.node7").expect("find").expect("session");
	assert_eq!(found.id(), "A.node1");
	found.end_access();
}

#[test]
fn no_affinity_keeps_ids_bare() {
	let store = MemoryStore::new();
	let manager = FacadeManager::new(store.clone(), NoAffinity, FacadeConfig::default()).expect("manager");

	let session = manager.create_session(Some("A")).expect("create").expect("session");
	assert_eq!(session.id(), "A");
	session.end_access();
}

#[test]
fn generated_ids_are_routed() {
	let store = MemoryStore::new();
	let manager = manager(&store);

	let session = manager.create_session(None).expect("create").expect("session");
	let id = session.id();
	assert!(id.ends_with(".node1"), "{id}");
	assert!(store.contains(&session.base_id()));
	session.end_access();
}

#[test]
fn end_access_records_the_request_start() {
	let store = MemoryStore::new();
	let manager = manager(&store);

	let created = manager.create_session(Some("A")).expect("create").expect("session");
	assert!(created.is_new().expect("is_new"));
	assert_eq!(created.start_time(), created.creation_time().expect("creation time"));
	created.end_access();

	let found = manager.find_session("A").expect("find").expect("session");
	assert!(!found.is_new().expect("is_new"));
	let start = found.start_time();
	thread::sleep(Duration::from_millis(10));
	found.end_access();

	let again = manager.find_session("A").expect("find").expect("session");
	assert_eq!(again.last_accessed_time().expect("last accessed"), start);
	again.end_access();
}

#[test]
fn detached_handle_keeps_id_and_local_context() {
	let store = MemoryStore::new();
	let manager = manager(&store);

	let session = manager.create_session(Some("A")).expect("create").expect("session");
	session.set_auth_type(Some("FORM".to_string()));
	session.set_note("csrf", json!("t0k3n"));
	session.end_access();

	assert!(session.is_detached());
	assert!(!session.is_valid());
	assert_eq!(session.id(), "A.node1");
	assert_eq!(session.auth_type().as_deref(), Some("FORM"));
	assert_eq!(session.note("csrf"), Some(json!("t0k3n")));
	assert_eq!(session.remove_note("csrf"), Some(json!("t0k3n")));
	assert!(session.note_names().is_empty());
	assert!(matches!(session.attribute("x"), Err(Error::Detached { id }) if id == "A.node1"));
}

#[test]
fn null_attribute_is_a_removal() {
	let store = MemoryStore::new();
	let manager = manager(&store);
	let recorder = Recorder::new(&store);
	manager.add_listener(recorder.clone());

	let session = manager.create_session(Some("A")).expect("create").expect("session");
	session.set_attribute("x", json!(1)).expect("set");
	session.set_attribute("x", json!(1)).expect("set same");
	session.set_attribute("x", json!(2)).expect("replace");
	assert_eq!(session.set_attribute("x", serde_json::Value::Null).expect("null"), Some(json!(2)));
	assert_eq!(session.attribute("x").expect("get"), None);
	assert!(session.attribute_names().expect("names").is_empty());
	session.end_access();

	assert_eq!(recorder.events(), ["created A.node1", "added x=1", "replaced x=2", "removed x"]);
	assert!(recorder.inside_batch().is_empty());
}

#[test]
fn unchanged_value_notifies_when_configured() {
	let store = MemoryStore::new();
	let config = FacadeConfig {
		notify_attribute_listener_on_unchanged_value: true,
		..FacadeConfig::default()
	};
	let manager = support::manager_with(&store, config);
	let recorder = Recorder::new(&store);
	manager.add_listener(recorder.clone());

	let session = manager.create_session(Some("A")).expect("create").expect("session");
	session.set_attribute("x", json!(1)).expect("set");
	session.set_attribute("x", json!(1)).expect("set same");
	session.end_access();

	assert_eq!(recorder.events(), ["created A.node1", "added x=1", "replaced x=1"]);
}

#[test]
fn zero_timeout_reads_as_never_expiring() {
	let store = MemoryStore::new();
	let manager = manager(&store);

	let session = manager.create_session(Some("A")).expect("create").expect("session");
	assert_eq!(session.timeout().expect("timeout"), Some(clustered_session::memory::DEFAULT_TIMEOUT));
	session.set_timeout(Some(Duration::ZERO)).expect("set timeout");
	assert_eq!(session.timeout().expect("timeout"), None);
	session.set_timeout(Some(Duration::from_secs(60))).expect("set timeout");
	assert_eq!(session.timeout().expect("timeout"), Some(Duration::from_secs(60)));
	session.set_timeout(None).expect("set timeout");
	assert_eq!(session.timeout().expect("timeout"), None);
	session.end_access();
}

#[test]
fn invalidate_fires_destroyed_and_removes_the_session() {
	let store = MemoryStore::new();
	let manager = manager(&store);
	let recorder = Recorder::new(&store);
	manager.add_listener(recorder.clone());

	let session = manager.create_session(Some("A")).expect("create").expect("session");
	session.end_access();

	let found = manager.find_session("A").expect("find").expect("session");
	found.invalidate().expect("invalidate");
	assert!(found.is_detached());
	assert!(!store.contains("A"));
	assert!(manager.find_session("A").expect("find").is_none());

	assert_eq!(recorder.events(), ["created A.node1", "destroyed A.node1"]);
	assert!(recorder.inside_batch().is_empty());
	assert_no_leaks(&store);
}

#[test]
fn create_on_existing_id_fails_and_rolls_back() {
	let store = MemoryStore::new();
	let manager = manager(&store);

	manager.create_session(Some("A")).expect("create").expect("session").end_access();
	let err = manager.create_session(Some("A")).expect_err("duplicate");
	assert!(matches!(err, Error::Store(_)), "{err}");
	assert!(store.contains("A"));
	assert_no_leaks(&store);
}

#[test]
fn end_access_on_discarded_batch_leaves_access_times() {
	let store = MemoryStore::new();
	let manager = manager(&store);
	manager.create_session(Some("A")).expect("create").expect("session").end_access();

	let before = {
		let session = manager.find_session("A").expect("find").expect("session");
		let last = session.last_accessed_time().expect("last accessed");
		session.close();
		last
	};
	thread::sleep(Duration::from_millis(10));

	let found = manager.find_session("A").expect("find").expect("session");
	assert_eq!(store.discard_open_batches(), 1);
	found.end_access();
	assert!(found.is_detached());
	assert_no_leaks(&store);

	let again = manager.find_session("A").expect("find").expect("session");
	assert_eq!(again.last_accessed_time().expect("last accessed"), before);
	again.close();
	assert!(stops_promptly(&manager));
}

#[derive(Default)]
struct Destroyed(Mutex<Vec<String>>);

impl ContextListener for Destroyed {
	fn session_destroyed(&self, id: &str) {
		self.0.lock().expect("destroyed lock").push(id.to_string());
	}
}

#[test]
fn context_listeners_follow_renames_and_hear_invalidation() {
	let store = MemoryStore::new();
	let manager = manager(&store);
	let destroyed = Arc::new(Destroyed::default());

	let session = manager.create_session(Some("A")).expect("create").expect("session");
	session.local_context().add_listener(destroyed.clone());
	session.tell_changed_session_id("B", IdChangeNotification::NONE).expect("rename");
	session.end_access();
	assert!(destroyed.0.lock().expect("destroyed lock").is_empty());

	let found = manager.find_session("B").expect("find").expect("session");
	assert_eq!(found.local_context().listeners().len(), 1);
	found.invalidate().expect("invalidate");
	assert_eq!(*destroyed.0.lock().expect("destroyed lock"), ["B.node1"]);
	assert_no_leaks(&store);
}
