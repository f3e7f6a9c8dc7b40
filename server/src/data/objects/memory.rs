//! In-memory object store with fault injection
//!
//! Backs tests and local dry runs. Failures can be scripted per operation so
//! retry, timeout and quarantine paths are reachable without a real backend.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use super::error::ObjectStoreError;
use super::storage::{ObjectStore, validate_key};

/// Scripted failure for the next `put`
#[derive(Debug, Clone)]
pub enum InjectedFault {
    Transient,
    Permanent,
    /// Sleep before answering (exercises per-attempt timeouts)
    Delay(Duration),
}

#[derive(Default)]
pub struct MemoryObjectStore {
    objects: RwLock<BTreeMap<String, Vec<u8>>>,
    put_faults: Mutex<VecDeque<InjectedFault>>,
    probe_fault: Mutex<Option<InjectedFault>>,
    put_calls: AtomicU64,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue faults consumed one per `put` call, in order
    pub fn inject_put_faults(&self, faults: impl IntoIterator<Item = InjectedFault>) {
        self.put_faults.lock().extend(faults);
    }

    /// Make every `probe` fail with the given fault until cleared
    pub fn set_probe_fault(&self, fault: Option<InjectedFault>) {
        *self.probe_fault.lock() = fault;
    }

    /// Number of `put` calls, including failed ones
    pub fn put_calls(&self) -> u64 {
        self.put_calls.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    async fn apply(fault: InjectedFault, op: &str) -> Result<(), ObjectStoreError> {
        match fault {
            InjectedFault::Transient => Err(ObjectStoreError::Transient(format!(
                "injected transient failure on {}",
                op
            ))),
            InjectedFault::Permanent => Err(ObjectStoreError::Permanent(format!(
                "injected permanent failure on {}",
                op
            ))),
            InjectedFault::Delay(d) => {
                tokio::time::sleep(d).await;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn put(&self, key: &str, data: &[u8]) -> Result<(), ObjectStoreError> {
        validate_key(key)?;
        self.put_calls.fetch_add(1, Ordering::Relaxed);

        let fault = self.put_faults.lock().pop_front();
        if let Some(fault) = fault {
            Self::apply(fault, "put").await?;
        }

        self.objects.write().insert(key.to_string(), data.to_vec());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, ObjectStoreError> {
        validate_key(key)?;
        self.objects
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| ObjectStoreError::NotFound(key.to_string()))
    }

    async fn exists(&self, key: &str) -> Result<bool, ObjectStoreError> {
        validate_key(key)?;
        Ok(self.objects.read().contains_key(key))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, ObjectStoreError> {
        Ok(self
            .objects
            .read()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn probe(&self) -> Result<(), ObjectStoreError> {
        let fault = self.probe_fault.lock().clone();
        match fault {
            Some(fault) => Self::apply(fault, "probe").await,
            None => Ok(()),
        }
    }
}
