//! Contract between the session facade and an external session store.
//!
//! The store owns replication, marshalling, and eviction. This crate only
//! describes the surface the facade drives:
//! * [`SessionStore`]: create/find sessions, mint identifiers, open batches
//! * [`Batch`] / [`SuspendedBatch`]: a transactional unit of work that can be
//!   detached from one thread and resumed on another
//! * [`StoreSession`]: one session as seen through an active batch
//! * [`LocalContext`]: per-node state that is never replicated
//!
//! Every fallible call reports [`StoreError::InvalidState`] when the session or
//! batch was invalidated concurrently, so callers can recover by matching on
//! the variant instead of inspecting a message.

pub mod batch;
pub mod context;
pub mod error;
pub mod store;

pub use batch::{Batch, BatchState, SuspendedBatch};
pub use context::{ContextListener, LocalContext, Principal};
pub use error::{StoreError, StoreResult};
pub use store::{SessionStore, StoreSession};
