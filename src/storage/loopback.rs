//! In-process distributed client.
//!
//! Behaves like a remote network: entries are scoped by owner, mutations must
//! carry a valid owner signature, and every response is delivered from a
//! separate thread after an optional latency.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use crate::crypto::ed25519::{owner_name_for, verify_signature};

use super::notify::{Authorization, DistributedClient, ResponseFn, DELETE_PAYLOAD};
use super::StorageError;

struct Entry {
    bytes: Vec<u8>,
    writer: [u8; 32],
}

#[derive(Default)]
struct Shared {
    entries: Mutex<HashMap<(String, String), Entry>>,
    offline: AtomicBool,
    latency_ms: AtomicUsize,
    requests: AtomicUsize,
}

/// Cloneable handle to one loopback network.
#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    shared: Arc<Shared>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every response by `latency`.
    pub fn with_latency(self, latency: Duration) -> Self {
        self.shared
            .latency_ms
            .store(latency.as_millis() as usize, Ordering::SeqCst);
        self
    }

    /// While offline, every request fails with a backend error.
    pub fn set_offline(&self, offline: bool) {
        self.shared.offline.store(offline, Ordering::SeqCst);
    }

    pub fn request_count(&self) -> usize {
        self.shared.requests.load(Ordering::SeqCst)
    }

    pub fn contains(&self, owner: &str, name: &str) -> bool {
        self.entries()
            .contains_key(&(owner.to_string(), name.to_string()))
    }

    pub fn entry_count(&self) -> usize {
        self.entries().len()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<(String, String), Entry>> {
        self.shared
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Evaluate `op` now and deliver its result from another thread.
    fn respond_later<T, F>(&self, respond: ResponseFn<T>, op: F)
    where
        T: Send + 'static,
        F: FnOnce(&LoopbackNetwork) -> Result<T, StorageError>,
    {
        self.shared.requests.fetch_add(1, Ordering::SeqCst);
        let result = if self.shared.offline.load(Ordering::SeqCst) {
            Err(StorageError::Backend("network unreachable".to_string()))
        } else {
            op(self)
        };
        let latency = Duration::from_millis(self.shared.latency_ms.load(Ordering::SeqCst) as u64);
        thread::spawn(move || {
            if !latency.is_zero() {
                thread::sleep(latency);
            }
            respond(result);
        });
    }

    fn check_owner(
        owner: &str,
        name: &str,
        payload: &[u8],
        authorization: &Authorization,
    ) -> Result<(), StorageError> {
        if owner_name_for(&authorization.public_key) != owner
            || !verify_signature(
                name,
                payload,
                &authorization.signature,
                &authorization.public_key,
            )
        {
            log::warn!("Rejected unsigned or foreign request for {}", name);
            return Err(StorageError::Unauthorized(name.to_string()));
        }
        Ok(())
    }
}

impl DistributedClient for LoopbackNetwork {
    fn put(
        &self,
        owner: &str,
        name: &str,
        bytes: Vec<u8>,
        authorization: Authorization,
        respond: ResponseFn<()>,
    ) {
        self.respond_later(respond, |network| {
            Self::check_owner(owner, name, &bytes, &authorization)?;
            let key = (owner.to_string(), name.to_string());
            let mut entries = network.entries();
            if let Some(existing) = entries.get(&key) {
                if existing.writer != authorization.public_key {
                    return Err(StorageError::Unauthorized(name.to_string()));
                }
            }
            entries.insert(
                key,
                Entry {
                    bytes,
                    writer: authorization.public_key,
                },
            );
            Ok(())
        });
    }

    fn get(&self, owner: &str, name: &str, respond: ResponseFn<Vec<u8>>) {
        self.respond_later(respond, |network| {
            network
                .entries()
                .get(&(owner.to_string(), name.to_string()))
                .map(|entry| entry.bytes.clone())
                .ok_or_else(|| StorageError::NotFound(name.to_string()))
        });
    }

    fn delete(&self, owner: &str, name: &str, authorization: Authorization, respond: ResponseFn<()>) {
        self.respond_later(respond, |network| {
            Self::check_owner(owner, name, DELETE_PAYLOAD, &authorization)?;
            network
                .entries()
                .remove(&(owner.to_string(), name.to_string()))
                .map(|_| ())
                .ok_or_else(|| StorageError::NotFound(name.to_string()))
        });
    }
}
