//! Shared application state for the service.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use lockstep::io::client::LoginGrant;
use lockstep::io::store::Store;

use crate::rendezvous::RendezvousBroker;

/// Shared state accessible from all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Server-side store. Handlers lock it for one synchronous call sequence
    /// and never across an `.await`.
    pub store: Arc<Mutex<Store>>,
    /// Pending browser logins.
    pub broker: Arc<RendezvousBroker<LoginGrant>>,
    /// Row id of this server in its own `servers` table; users register under it.
    pub sid: i64,
    /// Upper bound on how long `auth/jwt` waits for the browser.
    pub login_timeout: Duration,
}

impl AppState {
    pub fn new(store: Store, sid: i64, login_timeout: Duration) -> Self {
        Self {
            store: Arc::new(Mutex::new(store)),
            broker: Arc::new(RendezvousBroker::new(login_timeout)),
            sid,
            login_timeout,
        }
    }

    pub fn store(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
