//! The wire protocol: one POST route, dispatched by `X-Amz-Target` (component H).

pub mod handlers;
pub mod routes;

use crate::auth::Authenticator;
use crate::config::Config;
use crate::store::Store;

/// Everything a request handler needs, owned by the server and shared
/// read-only (or through the store's own internal locking) across workers.
pub struct AppState {
    pub store: Store,
    pub auth: Authenticator,
    pub config: Config,
}

pub use routes::router;
