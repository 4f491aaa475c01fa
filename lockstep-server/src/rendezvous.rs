//! One-shot hand-off of a login credential from the browser flow to a
//! waiting CLI request.
//!
//! Each pre-token owns a single-slot channel. The first `deliver` fills it;
//! later deliveries are refused. The waiting side removes the token once it
//! has its value or gives up. Tokens nobody waits on are swept once they are
//! older than the broker's ttl.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use rand::Rng;
use rand::distributions::Alphanumeric;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

/// Length of issued pre-tokens and credentials.
pub const TOKEN_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("pre-token not found")]
    NotFound,
    #[error("pre-token already used")]
    AlreadyUsed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AwaitError {
    #[error("pre-token not found")]
    NotFound,
    #[error("pre-token is already being awaited")]
    AlreadyAwaited,
    #[error("login was not completed in time")]
    Expired,
}

/// Longest pause between sweeps run by [`RendezvousBroker::spawn_reaper`].
const MAX_SWEEP_EVERY: Duration = Duration::from_secs(60);

struct Slot<T> {
    tx: Option<oneshot::Sender<T>>,
    /// Taken by the waiter; a slot without it is being awaited.
    rx: Option<oneshot::Receiver<T>>,
    created: Instant,
}

/// Pre-token to channel map, owned by the server state.
pub struct RendezvousBroker<T> {
    slots: Mutex<HashMap<String, Slot<T>>>,
    ttl: Duration,
}

/// Random token of [`TOKEN_LEN`] ASCII letters and digits.
pub fn random_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect()
}

impl<T: Send> RendezvousBroker<T> {
    /// Unawaited tokens older than `ttl` are dropped by [`sweep`](Self::sweep).
    pub fn new(ttl: Duration) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, Slot<T>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of tokens still awaiting hand-off.
    pub fn pending(&self) -> usize {
        self.slots().len()
    }

    /// Issue a fresh pre-token and open its channel.
    pub fn create_token(&self) -> String {
        let mut slots = self.slots();
        let token = loop {
            let candidate = random_token();
            if !slots.contains_key(&candidate) {
                break candidate;
            }
        };
        let (tx, rx) = oneshot::channel();
        slots.insert(
            token.clone(),
            Slot {
                tx: Some(tx),
                rx: Some(rx),
                created: Instant::now(),
            },
        );
        debug!(pending = slots.len(), "pre-token issued");
        token
    }

    /// Hand `value` to whoever awaits `token`. Never blocks.
    pub fn deliver(&self, token: &str, value: T) -> Result<(), DeliveryError> {
        let mut slots = self.slots();
        let slot = slots.get_mut(token).ok_or(DeliveryError::NotFound)?;
        let tx = slot.tx.take().ok_or(DeliveryError::AlreadyUsed)?;
        // Fails only if the waiter gave up a moment ago.
        tx.send(value).map_err(|_| DeliveryError::NotFound)?;
        info!("login delivered");
        Ok(())
    }

    /// Wait up to `timeout` for the value delivered to `token`.
    ///
    /// The token is removed when this returns, whatever the outcome, so at
    /// most one call per token ever succeeds.
    pub async fn await_delivery(&self, token: &str, timeout: Duration) -> Result<T, AwaitError> {
        let rx = {
            let mut slots = self.slots();
            let slot = slots.get_mut(token).ok_or(AwaitError::NotFound)?;
            slot.rx.take().ok_or(AwaitError::AlreadyAwaited)?
        };
        // Also runs when the request is dropped mid-wait.
        let _remove = RemoveOnDrop {
            broker: self,
            token,
        };
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(AwaitError::NotFound),
            Err(_) => {
                info!(?timeout, "login expired");
                Err(AwaitError::Expired)
            }
        }
    }

    /// Drop tokens older than the ttl that nobody is waiting on.
    pub fn sweep(&self) -> usize {
        let ttl = self.ttl;
        let mut slots = self.slots();
        let before = slots.len();
        slots.retain(|_, slot| slot.rx.is_none() || slot.created.elapsed() < ttl);
        let swept = before - slots.len();
        if swept > 0 {
            info!(swept, pending = slots.len(), "expired unclaimed pre-tokens");
        }
        swept
    }

    /// Sweep periodically until the broker is dropped.
    pub fn spawn_reaper(self: &Arc<Self>) -> JoinHandle<()>
    where
        T: 'static,
    {
        let every = self.ttl.min(MAX_SWEEP_EVERY).max(Duration::from_millis(10));
        let broker: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(every);
            loop {
                tick.tick().await;
                let Some(broker) = broker.upgrade() else {
                    break;
                };
                broker.sweep();
            }
        })
    }
}

struct RemoveOnDrop<'a, T: Send> {
    broker: &'a RendezvousBroker<T>,
    token: &'a str,
}

impl<T: Send> Drop for RemoveOnDrop<'_, T> {
    fn drop(&mut self) {
        self.broker.slots().remove(self.token);
    }
}
