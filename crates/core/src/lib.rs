//! Request-scoped session handles over a transactional clustered store.
//!
//! A [`FacadeManager`] turns find/create calls from the container into
//! [`SessionFacade`] handles. Each handle owns one suspended store batch and
//! one [`Lease`] on the manager's [`ShutdownBarrier`] until the request ends,
//! so a single batch spans every callback of the request and stopping the
//! manager waits for in-flight requests to drain.
//!
//! ```ignore
//! let manager = FacadeManager::new(MemoryStore::new(), FixedRoute("node1".into()), FacadeConfig::default())?;
//! let session = manager.create_session(None)?.expect("fresh session");
//! session.set_attribute("user", json!("ada"))?;
//! session.end_access();
//! ```

pub mod barrier;
mod batch;
pub mod config;
pub mod error;
pub mod event;
pub mod facade;
pub mod listener;
pub mod manager;
pub mod memory;
mod registry;
pub mod route;

pub use barrier::{Lease, ShutdownBarrier};
pub use clustered_session_spi as spi;
pub use config::{FacadeConfig, RenameRecovery};
pub use error::{Error, Result};
pub use event::{AttributeEvent, ContainerEvent, SessionSnapshot};
pub use facade::{IdChangeNotification, SessionFacade};
pub use listener::{ContainerListener, SessionListener};
pub use manager::{ExpirationListener, FacadeManager, SessionAccessor};
pub use memory::MemoryStore;
pub use route::{Affinity, FixedRoute, NoAffinity, RouteCodec};
