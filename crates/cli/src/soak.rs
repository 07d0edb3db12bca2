//! Concurrent request driver.
//!
//! Every worker thread plays a stream of requests: create a session, write
//! two attributes, hold the binding for a moment, optionally rename, then end
//! access. The manager is stopped while workers are mid-request; the report
//! shows whether the stop waited for all of them and whether anything leaked.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, anyhow};
use clustered_session::{Error, FacadeConfig, FacadeManager, FixedRoute, MemoryStore};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct SoakOptions {
	pub config: Option<PathBuf>,
	pub requests: usize,
	pub hold: Duration,
	pub stop_after: Duration,
	pub rename_every: usize,
	pub route: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SoakReport {
	pub workers: usize,
	pub completed: usize,
	pub renamed: usize,
	pub invalidated: usize,
	pub failed: usize,
	/// Workers turned away once the manager stopped.
	pub refused: usize,
	/// Requests still bound when `stop` returned. Anything but zero is a bug.
	pub in_flight_after_stop: usize,
	pub drain_millis: u64,
	pub sessions: usize,
	pub open_batches: usize,
	pub open_sessions: usize,
}

#[derive(Default)]
struct Counters {
	completed: AtomicUsize,
	renamed: AtomicUsize,
	invalidated: AtomicUsize,
	failed: AtomicUsize,
	refused: AtomicUsize,
	in_flight: AtomicUsize,
}

pub fn run(options: &SoakOptions) -> anyhow::Result<SoakReport> {
	let config = match &options.config {
		Some(path) => FacadeConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
		None => FacadeConfig::default(),
	};
	let store = MemoryStore::new();
	let manager = Arc::new(FacadeManager::new(store.clone(), FixedRoute(options.route.clone()), config)?);
	let counters = Arc::new(Counters::default());

	let workers: Vec<_> = (0..options.requests)
		.map(|worker| {
			let manager = Arc::clone(&manager);
			let counters = Arc::clone(&counters);
			let options = options.clone();
			thread::spawn(move || request_loop(&manager, &counters, worker, &options))
		})
		.collect();

	thread::sleep(options.stop_after);
	let started = Instant::now();
	manager.stop();
	let drain_millis = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
	let in_flight_after_stop = counters.in_flight.load(Ordering::SeqCst);
	info!(target = "cs", drain_ms = drain_millis, "manager drained");

	for worker in workers {
		worker.join().map_err(|_| anyhow!("request thread panicked"))?;
	}

	Ok(SoakReport {
		workers: options.requests,
		completed: counters.completed.load(Ordering::SeqCst),
		renamed: counters.renamed.load(Ordering::SeqCst),
		invalidated: counters.invalidated.load(Ordering::SeqCst),
		failed: counters.failed.load(Ordering::SeqCst),
		refused: counters.refused.load(Ordering::SeqCst),
		in_flight_after_stop,
		drain_millis,
		sessions: store.session_count(),
		open_batches: store.open_batches(),
		open_sessions: store.open_sessions(),
	})
}

fn request_loop(manager: &FacadeManager<MemoryStore>, counters: &Counters, worker: usize, options: &SoakOptions) {
	for request in 0.. {
		match one_request(manager, counters, worker, request, options) {
			Ok(()) => {
				counters.completed.fetch_add(1, Ordering::SeqCst);
			}
			Err(Error::ManagerStopped) => {
				counters.refused.fetch_add(1, Ordering::SeqCst);
				return;
			}
			Err(err) if err.is_invalidated() => {
				counters.invalidated.fetch_add(1, Ordering::SeqCst);
			}
			Err(err) => {
				warn!(target = "cs", worker, request, error = %err, "request failed");
				counters.failed.fetch_add(1, Ordering::SeqCst);
			}
		}
	}
}

fn one_request(
	manager: &FacadeManager<MemoryStore>,
	counters: &Counters,
	worker: usize,
	request: usize,
	options: &SoakOptions,
) -> clustered_session::Result<()> {
	let Some(session) = manager.create_session(None)? else {
		return Ok(());
	};
	counters.in_flight.fetch_add(1, Ordering::SeqCst);

	let result = (|| -> clustered_session::Result<()> {
		session.set_attribute("worker", json!(worker))?;
		session.set_attribute("request", json!(request))?;
		thread::sleep(options.hold);
		if options.rename_every > 0 && request % options.rename_every == 0 {
			manager.change_session_id(&session, None)?;
			counters.renamed.fetch_add(1, Ordering::SeqCst);
		}
		Ok(())
	})();

	// Leave the in-flight count before the lease goes.
	counters.in_flight.fetch_sub(1, Ordering::SeqCst);
	session.end_access();
	result
}
