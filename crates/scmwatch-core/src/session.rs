//! Reference-counted sessions for connection-oriented backends.
//!
//! A licensed client that holds a server connection must be disconnected
//! once nobody in the process is using it any more. The count is shared by
//! every connector of the same backend type, across projects.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Mutex as AsyncMutex;

use crate::error::Result;
use crate::metrics::METRICS;

/// Process-lifetime session counter for one backend type.
#[derive(Debug)]
pub struct SessionRegistry {
    backend: &'static str,
    active: Mutex<usize>,
    /// Held while entering the session and while disconnecting.
    gate: AsyncMutex<()>,
}

/// One in-flight operation. Dropping it, on completion, cancellation or
/// panic, gives the slot back.
struct Slot<'a> {
    registry: &'a SessionRegistry,
    held: bool,
}

impl Slot<'_> {
    /// Give the slot back and return how many operations remain.
    fn release(&mut self) -> usize {
        self.held = false;
        let mut active = self.registry.lock_active();
        *active = active.saturating_sub(1);
        tracing::trace!(backend = self.registry.backend, active = *active, "session left");
        *active
    }
}

impl Drop for Slot<'_> {
    fn drop(&mut self) {
        if self.held {
            let remaining = self.release();
            tracing::debug!(
                backend = self.registry.backend,
                active = remaining,
                "session operation abandoned"
            );
        }
    }
}

impl SessionRegistry {
    pub fn new(backend: &'static str) -> Self {
        Self {
            backend,
            active: Mutex::new(0),
            gate: AsyncMutex::new(()),
        }
    }

    pub fn backend(&self) -> &'static str {
        self.backend
    }

    /// Operations currently in flight.
    pub async fn active(&self) -> usize {
        *self.lock_active()
    }

    fn lock_active(&self) -> MutexGuard<'_, usize> {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn enter(&self) -> Slot<'_> {
        let _gate = self.gate.lock().await;
        let mut active = self.lock_active();
        *active += 1;
        tracing::trace!(backend = self.backend, active = *active, "session entered");
        Slot {
            registry: self,
            held: true,
        }
    }

    /// Run `op` inside the shared session.
    ///
    /// When the last in-flight operation finishes and `auto_disconnect` is
    /// set, `disconnect` runs while the entry gate is held, so no new
    /// operation can start against a half-closed session. An operation that
    /// is dropped before finishing still gives its slot back; the next one to
    /// finish last disconnects.
    pub async fn run<T, F, Fut, D, DFut>(&self, auto_disconnect: bool, op: F, disconnect: D) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
        D: FnOnce() -> DFut,
        DFut: Future<Output = Result<()>>,
    {
        let mut slot = self.enter().await;
        let outcome = op().await;

        let _gate = self.gate.lock().await;
        if slot.release() > 0 || !auto_disconnect {
            return outcome;
        }

        tracing::debug!(backend = self.backend, "last session user finished, disconnecting");
        METRICS.inc_disconnects();
        let disconnected = disconnect().await;

        match (outcome, disconnected) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(err)) => Err(err),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(disconnect_err)) => {
                tracing::warn!(
                    backend = self.backend,
                    error = %disconnect_err,
                    "disconnect failed after a failed operation"
                );
                Err(err)
            }
        }
    }
}

/// One [`SessionRegistry`] per backend type, created once by the host.
#[derive(Debug, Default)]
pub struct SessionRegistries {
    registries: Mutex<HashMap<&'static str, Arc<SessionRegistry>>>,
}

impl SessionRegistries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_backend(&self, backend: &'static str) -> Arc<SessionRegistry> {
        let mut registries = self
            .registries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        registries
            .entry(backend)
            .or_insert_with(|| Arc::new(SessionRegistry::new(backend)))
            .clone()
    }
}
