// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

// Client registry and session manager.
//
// Holds every ProxyClient by key and remembers which endpoint each client
// talks from, so messages without a client key (session id >= 0x80) can be
// attributed. One mutex covers the whole registry; clients are released
// after it is unlocked.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::client::ProxyClient;
use crate::protocol::{ClientKey, ClientRepresentation, StatusCode};
use crate::transport::Endpoint;

#[derive(Default)]
struct RegistryInner {
    clients: BTreeMap<ClientKey, Arc<ProxyClient>>,
    key_by_endpoint: BTreeMap<Endpoint, ClientKey>,
    endpoint_by_key: BTreeMap<ClientKey, Endpoint>,
}

impl RegistryInner {
    fn bind(&mut self, key: ClientKey, endpoint: Endpoint) {
        if self.key_by_endpoint.get(&endpoint) == Some(&key) {
            return;
        }
        if let Some(old) = self.endpoint_by_key.remove(&key) {
            self.key_by_endpoint.remove(&old);
        }
        if let Some(other) = self.key_by_endpoint.remove(&endpoint) {
            self.endpoint_by_key.remove(&other);
        }
        self.key_by_endpoint.insert(endpoint.clone(), key);
        self.endpoint_by_key.insert(key, endpoint.clone());
        if let Some(client) = self.clients.get(&key) {
            client.set_endpoint(endpoint);
        }
    }

    fn unbind(&mut self, key: ClientKey) {
        if let Some(ep) = self.endpoint_by_key.remove(&key) {
            self.key_by_endpoint.remove(&ep);
        }
    }
}

/// Owned set of connected clients.
pub struct ClientRegistry {
    max_clients: usize,
    inner: Mutex<RegistryInner>,
}

impl ClientRegistry {
    pub fn new(max_clients: usize) -> Self {
        Self {
            max_clients,
            inner: Mutex::new(RegistryInner::default()),
        }
    }

    /// Register the client described by `rep`, reached at `source`.
    ///
    /// A known key with the same session id only has its streams reset.
    /// A known key with another session id is replaced by a fresh client
    /// built with `build`.
    pub fn create_client(
        &self,
        rep: &ClientRepresentation,
        source: Endpoint,
        build: impl FnOnce() -> ProxyClient,
    ) -> StatusCode {
        let key = rep.client_key;
        let mut inner = self.inner.lock();

        let replaced = match inner.clients.get(&key) {
            Some(existing) if existing.session_id() == rep.session_id => {
                existing.session().reset();
                inner.bind(key, source);
                log::info!("[XRCE] client {} reconnected, session {} reset", key, rep.session_id);
                return StatusCode::Ok;
            }
            Some(_) => inner.clients.remove(&key),
            None => {
                if inner.clients.len() >= self.max_clients {
                    log::warn!(
                        "[XRCE] client {} refused: registry full ({} clients)",
                        key,
                        self.max_clients
                    );
                    return StatusCode::ErrResources;
                }
                None
            }
        };

        inner.clients.insert(key, Arc::new(build()));
        inner.bind(key, source.clone());
        drop(inner);

        if let Some(old) = replaced {
            log::info!(
                "[XRCE] client {} replaced session {} with {}",
                key,
                old.session_id(),
                rep.session_id
            );
            old.release_all();
        } else {
            log::info!("[XRCE] client {} connected from {} (session {})", key, source, rep.session_id);
        }
        StatusCode::Ok
    }

    pub fn get_client(&self, key: ClientKey) -> Option<Arc<ProxyClient>> {
        self.inner.lock().clients.get(&key).cloned()
    }

    /// Key of the client last seen at `endpoint`.
    pub fn get_client_key(&self, endpoint: &Endpoint) -> Option<ClientKey> {
        self.inner.lock().key_by_endpoint.get(endpoint).copied()
    }

    pub fn get_endpoint(&self, key: ClientKey) -> Option<Endpoint> {
        self.inner.lock().endpoint_by_key.get(&key).cloned()
    }

    /// Record that `key` now talks from `endpoint`. Unknown keys are ignored.
    pub fn bind_endpoint(&self, key: ClientKey, endpoint: Endpoint) {
        let mut inner = self.inner.lock();
        if inner.clients.contains_key(&key) {
            inner.bind(key, endpoint);
        }
    }

    /// Remove a client and release all its objects.
    pub fn delete_client(&self, key: ClientKey) -> StatusCode {
        let removed = {
            let mut inner = self.inner.lock();
            inner.unbind(key);
            inner.clients.remove(&key)
        };
        match removed {
            Some(client) => {
                client.release_all();
                log::info!("[XRCE] client {} deleted", key);
                StatusCode::Ok
            }
            None => StatusCode::ErrUnknownReference,
        }
    }

    /// Every client, ordered by key.
    pub fn clients(&self) -> Vec<Arc<ProxyClient>> {
        self.inner.lock().clients.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove and release every client.
    pub fn clear(&self) {
        let clients = {
            let mut inner = self.inner.lock();
            inner.key_by_endpoint.clear();
            inner.endpoint_by_key.clear();
            std::mem::take(&mut inner.clients)
        };
        for client in clients.into_values() {
            client.release_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::{InMemoryMiddleware, Middleware};
    use crate::object::{ObjectVariant, Representation};
    use crate::protocol::{ObjectId, XRCE_COOKIE, XRCE_VENDOR_ID, XRCE_VERSION};
    use crate::client::CreationMode;
    use std::time::Duration;

    fn rep(key: u32, session_id: u8) -> ClientRepresentation {
        ClientRepresentation {
            xrce_cookie: XRCE_COOKIE,
            xrce_version: XRCE_VERSION,
            xrce_vendor_id: XRCE_VENDOR_ID,
            client_key: ClientKey(key),
            session_id,
            properties: None,
            mtu: 512,
        }
    }

    fn ep(port: u16) -> Endpoint {
        Endpoint::Ipv4 {
            addr: [127, 0, 0, 1],
            port,
        }
    }

    fn register(reg: &ClientRegistry, mw: &Arc<InMemoryMiddleware>, key: u32, sid: u8, port: u16) -> StatusCode {
        let r = rep(key, sid);
        let middleware: Arc<dyn Middleware> = mw.clone();
        reg.create_client(&r, ep(port), || {
            ProxyClient::new(ClientKey(key), sid, 512, middleware, Duration::from_millis(10))
        })
    }

    #[test]
    fn test_registry_full() {
        let mw = Arc::new(InMemoryMiddleware::new());
        let reg = ClientRegistry::new(2);
        assert_eq!(register(&reg, &mw, 1, 1, 1001), StatusCode::Ok);
        assert_eq!(register(&reg, &mw, 2, 1, 1002), StatusCode::Ok);
        assert_eq!(register(&reg, &mw, 3, 1, 1003), StatusCode::ErrResources);
        // Re-registering a known client is still allowed.
        assert_eq!(register(&reg, &mw, 2, 1, 1002), StatusCode::Ok);
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn test_endpoint_tracking() {
        let mw = Arc::new(InMemoryMiddleware::new());
        let reg = ClientRegistry::new(8);
        register(&reg, &mw, 7, 0x81, 2000);
        assert_eq!(reg.get_client_key(&ep(2000)), Some(ClientKey(7)));

        reg.bind_endpoint(ClientKey(7), ep(2001));
        assert_eq!(reg.get_client_key(&ep(2000)), None);
        assert_eq!(reg.get_client_key(&ep(2001)), Some(ClientKey(7)));
        assert_eq!(reg.get_client(ClientKey(7)).and_then(|c| c.endpoint()), Some(ep(2001)));

        // Unknown keys never get an endpoint.
        reg.bind_endpoint(ClientKey(8), ep(2002));
        assert_eq!(reg.get_client_key(&ep(2002)), None);
    }

    #[test]
    fn test_same_session_keeps_objects_new_session_drops_them() {
        let mw = Arc::new(InMemoryMiddleware::new());
        let reg = ClientRegistry::new(8);
        register(&reg, &mw, 5, 1, 3000);
        let client = reg.get_client(ClientKey(5)).unwrap();
        let participant = ObjectVariant::Participant {
            domain_id: 0,
            representation: Representation::ByReference("p".into()),
        };
        assert_eq!(
            client.create(CreationMode::default(), ObjectId::from_raw(0x0011), &participant),
            StatusCode::Ok
        );

        register(&reg, &mw, 5, 1, 3000);
        assert!(Arc::ptr_eq(&client, &reg.get_client(ClientKey(5)).unwrap()));
        assert_eq!(client.object_count(), 1);

        register(&reg, &mw, 5, 2, 3000);
        let fresh = reg.get_client(ClientKey(5)).unwrap();
        assert_eq!(fresh.session_id(), 2);
        assert_eq!(fresh.object_count(), 0);
        assert_eq!(client.object_count(), 0);
        assert_eq!(mw.entity_count(), 0);
    }

    #[test]
    fn test_delete_client() {
        let mw = Arc::new(InMemoryMiddleware::new());
        let reg = ClientRegistry::new(8);
        register(&reg, &mw, 9, 1, 4000);
        assert_eq!(reg.delete_client(ClientKey(9)), StatusCode::Ok);
        assert_eq!(reg.delete_client(ClientKey(9)), StatusCode::ErrUnknownReference);
        assert!(reg.is_empty());
        assert_eq!(reg.get_client_key(&ep(4000)), None);
    }
}
