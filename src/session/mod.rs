//! Replicated session store
//!
//! - `SessionRecord`: the unit of state written to the cache
//! - `SessionState`: Valid / Invalidated / Expired lifecycle
//! - `SessionStore`: load, store, update, remove and attribute access
//! - `LocalSessionRegistry`: this node's view of the sessions it touched
//! - `InvalidationListener`: forwards cache change events to the registry

mod error;
mod factory;
mod lifecycle;
mod listener;
mod record;
mod registry;
mod store;

pub use error::{SessionError, SessionResult};
pub use factory::{create_cache, create_session_store};
pub use lifecycle::SessionState;
pub use listener::{invalidation_channel, InvalidationListener, InvalidationWorker};
pub use record::{SessionId, SessionRecord};
pub use registry::LocalSessionRegistry;
pub use store::SessionStore;
