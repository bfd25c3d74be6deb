//! Named store slots with scoped leases and the cross-process gate.
//!
//! A pool owns stores keyed by name (`primary`/`secondary` at minimum for
//! copy-and-switch). [`StorePool::rent`] hands out an exclusive scoped
//! lease; [`StorePool::switch`] swaps which directory answers to which
//! name, closing and reopening handles around the rename. The first rent
//! acquires one slot of the process gate; the pool's drop releases it.

use crate::store::QuadStore;
use mercury_concurrency::{GateSlot, ProcessGate};
use mercury_core::{Error, Result, StoreOptions};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ops::Deref;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Default gate acquisition timeout.
const DEFAULT_GATE_TIMEOUT: Duration = Duration::from_secs(30);

struct Slot {
    path: PathBuf,
    store: Option<Arc<QuadStore>>,
    rented: bool,
}

struct PoolShared {
    slots: Mutex<HashMap<String, Slot>>,
    gate: Arc<ProcessGate>,
    gate_slot: Mutex<Option<GateSlot>>,
    gate_timeout: Duration,
    options: StoreOptions,
}

/// A pool of named quad stores.
pub struct StorePool {
    shared: Arc<PoolShared>,
}

impl StorePool {
    /// Pool using the process-wide gate.
    pub fn new(options: StoreOptions) -> Self {
        Self::with_gate(options, ProcessGate::global(), DEFAULT_GATE_TIMEOUT)
    }

    /// Pool with an injected gate, the hook tests use for isolation.
    pub fn with_gate(
        options: StoreOptions,
        gate: Arc<ProcessGate>,
        gate_timeout: Duration,
    ) -> Self {
        StorePool {
            shared: Arc::new(PoolShared {
                slots: Mutex::new(HashMap::new()),
                gate,
                gate_slot: Mutex::new(None),
                gate_timeout,
                options,
            }),
        }
    }

    /// Bind a name to a store directory. The store opens lazily on first
    /// rent.
    pub fn register(&self, name: impl Into<String>, path: impl Into<PathBuf>) -> Result<()> {
        let name = name.into();
        let mut slots = self.shared.slots.lock();
        if slots.contains_key(&name) {
            return Err(Error::invalid_argument(format!(
                "pool slot '{}' already registered",
                name
            )));
        }
        slots.insert(
            name,
            Slot {
                path: path.into(),
                store: None,
                rented: false,
            },
        );
        Ok(())
    }

    /// Registered slot names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.shared.slots.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Take an exclusive scoped lease on a named store, opening it (and, on
    /// the first rent, acquiring the process gate) if needed.
    pub fn rent(&self, name: &str) -> Result<StoreLease> {
        {
            let mut gate_slot = self.shared.gate_slot.lock();
            if gate_slot.is_none() {
                *gate_slot = Some(self.shared.gate.acquire(self.shared.gate_timeout)?);
            }
        }

        let mut slots = self.shared.slots.lock();
        let slot = slots.get_mut(name).ok_or_else(|| Error::NotFound {
            entity: format!("pool slot '{}'", name),
        })?;
        if slot.rented {
            return Err(Error::concurrency(format!(
                "pool slot '{}' is already rented",
                name
            )));
        }
        if slot.store.is_none() {
            slot.store = Some(Arc::new(QuadStore::open(
                &slot.path,
                self.shared.options.clone(),
            )?));
        }
        slot.rented = true;
        Ok(StoreLease {
            shared: Arc::clone(&self.shared),
            name: name.to_string(),
            store: Arc::clone(slot.store.as_ref().expect("opened above")),
        })
    }

    /// Make the store currently named `b` become the new `a` by swapping
    /// the two directories. Both stores are closed first; neither may be
    /// rented or otherwise referenced.
    pub fn switch(&self, a: &str, b: &str) -> Result<()> {
        let mut slots = self.shared.slots.lock();
        for name in [a, b] {
            let slot = slots.get(name).ok_or_else(|| Error::NotFound {
                entity: format!("pool slot '{}'", name),
            })?;
            if slot.rented {
                return Err(Error::concurrency(format!(
                    "pool slot '{}' is rented; cannot switch",
                    name
                )));
            }
        }

        // Close both stores, flushing them. An outstanding Arc means a
        // lease escaped its scope; refuse rather than rename under it.
        for name in [a, b] {
            let slot = slots.get_mut(name).expect("checked above");
            if let Some(store) = slot.store.take() {
                match Arc::try_unwrap(store) {
                    Ok(store) => store.close()?,
                    Err(arc) => {
                        slot.store = Some(arc);
                        return Err(Error::concurrency(format!(
                            "store '{}' still referenced; cannot switch",
                            name
                        )));
                    }
                }
            }
        }

        let path_a = slots.get(a).expect("checked").path.clone();
        let path_b = slots.get(b).expect("checked").path.clone();
        let tmp = path_a.with_extension("switch-tmp");
        std::fs::rename(&path_a, &tmp)?;
        std::fs::rename(&path_b, &path_a)?;
        std::fs::rename(&tmp, &path_b)?;
        info!(from = b, to = a, "pool switch complete");
        Ok(())
    }
}

/// An exclusive scoped lease from [`StorePool::rent`]. Dereferences to the
/// store; dropping returns the slot to the pool.
pub struct StoreLease {
    shared: Arc<PoolShared>,
    name: String,
    store: Arc<QuadStore>,
}

impl std::fmt::Debug for StoreLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreLease").field("name", &self.name).finish()
    }
}

impl StoreLease {
    /// The slot name this lease came from.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Deref for StoreLease {
    type Target = QuadStore;

    fn deref(&self) -> &QuadStore {
        &self.store
    }
}

impl Drop for StoreLease {
    fn drop(&mut self) {
        if let Some(slot) = self.shared.slots.lock().get_mut(&self.name) {
            slot.rented = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mercury_core::Timestamp;
    use tempfile::tempdir;

    fn test_pool(dir: &std::path::Path) -> StorePool {
        let gate = Arc::new(ProcessGate::with_dir(dir.join("gate"), 2));
        StorePool::with_gate(
            StoreOptions::for_testing(),
            gate,
            Duration::from_millis(500),
        )
    }

    #[test]
    fn rent_opens_lazily_and_returns() {
        let dir = tempdir().unwrap();
        let pool = test_pool(dir.path());
        pool.register("primary", dir.path().join("primary")).unwrap();

        {
            let lease = pool.rent("primary").unwrap();
            lease.add_current(None, "ex:s", "ex:p", "ex:o").unwrap();
            // Exclusive: a second rent fails while the lease lives.
            assert!(pool.rent("primary").unwrap_err().is_retryable());
        }
        // Returned: rentable again, same store instance.
        let lease = pool.rent("primary").unwrap();
        assert_eq!(lease.statistics().unwrap().quads, 1);
    }

    #[test]
    fn unknown_slot_is_not_found() {
        let dir = tempdir().unwrap();
        let pool = test_pool(dir.path());
        assert!(pool.rent("nope").unwrap_err().is_not_found());
    }

    #[test]
    fn duplicate_registration_rejected() {
        let dir = tempdir().unwrap();
        let pool = test_pool(dir.path());
        pool.register("a", dir.path().join("a")).unwrap();
        assert!(pool
            .register("a", dir.path().join("other"))
            .unwrap_err()
            .is_invalid_argument());
    }

    #[test]
    fn switch_swaps_directories() {
        let dir = tempdir().unwrap();
        let pool = test_pool(dir.path());
        pool.register("primary", dir.path().join("primary")).unwrap();
        pool.register("secondary", dir.path().join("secondary")).unwrap();

        {
            let lease = pool.rent("primary").unwrap();
            lease.add_current(None, "ex:old", "ex:p", "ex:o").unwrap();
        }
        {
            let lease = pool.rent("secondary").unwrap();
            lease.add_current(None, "ex:new", "ex:p", "ex:o").unwrap();
            lease.add_current(None, "ex:new2", "ex:p", "ex:o").unwrap();
        }

        pool.switch("primary", "secondary").unwrap();

        let lease = pool.rent("primary").unwrap();
        assert_eq!(lease.statistics().unwrap().quads, 2);
        let snap = lease.snapshot().unwrap();
        assert!(snap.lookup("ex:new").unwrap().is_some());
        assert!(snap.lookup("ex:old").unwrap().is_none());
    }

    #[test]
    fn switch_refuses_while_rented() {
        let dir = tempdir().unwrap();
        let pool = test_pool(dir.path());
        pool.register("primary", dir.path().join("primary")).unwrap();
        pool.register("secondary", dir.path().join("secondary")).unwrap();
        let _lease = pool.rent("primary").unwrap();
        assert!(pool.switch("primary", "secondary").unwrap_err().is_retryable());
    }

    #[test]
    fn gate_bounds_concurrent_pools() {
        let dir = tempdir().unwrap();
        let gate = Arc::new(ProcessGate::with_dir(dir.path().join("gate"), 1));
        let pool1 = StorePool::with_gate(
            StoreOptions::for_testing(),
            Arc::clone(&gate),
            Duration::from_millis(100),
        );
        let pool2 = StorePool::with_gate(
            StoreOptions::for_testing(),
            gate,
            Duration::from_millis(100),
        );
        pool1.register("a", dir.path().join("a")).unwrap();
        pool2.register("b", dir.path().join("b")).unwrap();

        let lease = pool1.rent("a").unwrap();
        // The single gate slot is held by pool1 for its lifetime.
        let err = pool2.rent("b").unwrap_err();
        assert!(matches!(err, Error::LockTimeout { .. }));
        drop(lease);
        drop(pool1);
        // Pool drop released the gate.
        let _lease2 = pool2.rent("b").unwrap();
    }

    #[test]
    fn lease_survives_scoped_use() {
        let dir = tempdir().unwrap();
        let pool = test_pool(dir.path());
        pool.register("primary", dir.path().join("p")).unwrap();
        let lease = pool.rent("primary").unwrap();
        lease
            .add(
                None,
                "ex:s",
                "ex:p",
                "ex:o",
                Timestamp::from_secs(1),
                Timestamp::from_secs(2),
            )
            .unwrap();
        drop(lease);
        assert_eq!(pool.names(), vec!["primary"]);
    }
}
