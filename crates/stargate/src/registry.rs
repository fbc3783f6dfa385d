//! Broadcast registries for fan-out messaging.
//!
//! [`BroadcastRegistry`] is a flat set of live connections for one broadcast
//! target. [`ResourceRegistry`] keys a registry per resource path and keeps a
//! reverse index so a disconnecting connection can be removed from every
//! resource it joined in one call.
//!
//! ## Broadcast
//!
//! Membership is snapshotted under the read lock, the lock is released, and
//! every member is sent to. Members whose send fails because the peer is gone
//! are collected and detached after the loop under one write lock. Any other
//! failure is returned once all members have been tried.
//!
//! Lock ordering in `ResourceRegistry`: always `resources` first, then
//! `conn_resources`.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::connection::{Connection, ConnectionId};
use crate::error::ConnectionError;
use crate::message::Message;
use crate::socket::Socket;

/// Outcome of a broadcast in which no unexpected error occurred.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Members the message was written to.
    pub delivered: usize,
    /// Members detached because their peer was gone.
    pub pruned: Vec<ConnectionId>,
}

// ---------------------------------------------------------------------------
// BroadcastRegistry
// ---------------------------------------------------------------------------

/// The set of connections currently attached to one broadcast target.
pub struct BroadcastRegistry<S: Socket> {
    members: RwLock<FxHashMap<ConnectionId, Arc<Connection<S>>>>,
}

impl<S: Socket> Default for BroadcastRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Socket> BroadcastRegistry<S> {
    pub fn new() -> Self {
        BroadcastRegistry {
            members: RwLock::new(FxHashMap::default()),
        }
    }

    /// Attach a connection. Returns `false` if it was already attached.
    pub fn attach(&self, conn: Arc<Connection<S>>) -> bool {
        let mut members = self.members.write();
        if members.contains_key(&conn.id()) {
            return false;
        }
        members.insert(conn.id(), conn);
        true
    }

    /// Detach a connection. Returns `false` if it was not attached.
    pub fn detach(&self, id: ConnectionId) -> bool {
        self.members.write().remove(&id).is_some()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.members.read().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.members.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.read().is_empty()
    }

    /// Snapshot of the current members. The lock is released on return.
    pub fn members(&self) -> Vec<Arc<Connection<S>>> {
        self.members.read().values().cloned().collect()
    }

    /// Send `message` to every attached connection.
    pub fn broadcast(&self, message: &Message) -> Result<BroadcastReport, ConnectionError> {
        self.broadcast_filtered(message, None)
    }

    /// Send `message` to every attached connection except `except`.
    pub fn broadcast_except(
        &self,
        message: &Message,
        except: ConnectionId,
    ) -> Result<BroadcastReport, ConnectionError> {
        self.broadcast_filtered(message, Some(except))
    }

    fn broadcast_filtered(
        &self,
        message: &Message,
        except: Option<ConnectionId>,
    ) -> Result<BroadcastReport, ConnectionError> {
        match self.deliver(message, except) {
            (_, Some(err)) => Err(err),
            (report, None) => Ok(report),
        }
    }

    /// Send to every member and detach the dead ones. The report is kept
    /// even when another member failed, so callers can still see what was
    /// pruned.
    fn deliver(
        &self,
        message: &Message,
        except: Option<ConnectionId>,
    ) -> (BroadcastReport, Option<ConnectionError>) {
        let mut report = BroadcastReport::default();
        let mut failure = None;

        for conn in self.members() {
            if Some(conn.id()) == except {
                continue;
            }
            match conn.send(message) {
                Ok(()) => report.delivered += 1,
                Err(err) if err.is_peer_gone() => report.pruned.push(conn.id()),
                Err(err) => {
                    warn!(id = %conn.id(), error = %err, "broadcast send failed");
                    if failure.is_none() {
                        failure = Some(err);
                    }
                }
            }
        }

        if !report.pruned.is_empty() {
            let mut members = self.members.write();
            for id in &report.pruned {
                members.remove(id);
            }
            debug!(pruned = report.pruned.len(), "detached dead listeners");
        }

        (report, failure)
    }
}

// ---------------------------------------------------------------------------
// ResourceRegistry
// ---------------------------------------------------------------------------

/// Broadcast registries keyed by resource path.
pub struct ResourceRegistry<S: Socket> {
    /// resource path -> its registry
    resources: RwLock<FxHashMap<String, Arc<BroadcastRegistry<S>>>>,
    /// connection -> resources it joined (reverse index for cleanup)
    conn_resources: RwLock<FxHashMap<ConnectionId, HashSet<String>>>,
}

impl<S: Socket> Default for ResourceRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Socket> ResourceRegistry<S> {
    pub fn new() -> Self {
        ResourceRegistry {
            resources: RwLock::new(FxHashMap::default()),
            conn_resources: RwLock::new(FxHashMap::default()),
        }
    }

    /// Attach `conn` to `resource`, creating the registry on first use.
    pub fn join(&self, resource: &str, conn: Arc<Connection<S>>) -> bool {
        let mut resources = self.resources.write();
        let mut conn_resources = self.conn_resources.write();
        let id = conn.id();
        let added = resources
            .entry(resource.to_string())
            .or_default()
            .attach(conn);
        conn_resources
            .entry(id)
            .or_default()
            .insert(resource.to_string());
        added
    }

    /// Detach `id` from `resource`. Empty registries are dropped.
    pub fn leave(&self, resource: &str, id: ConnectionId) -> bool {
        let mut resources = self.resources.write();
        let mut conn_resources = self.conn_resources.write();

        let removed = match resources.get(resource) {
            Some(registry) => {
                let removed = registry.detach(id);
                if registry.is_empty() {
                    resources.remove(resource);
                }
                removed
            }
            None => false,
        };

        if let Some(joined) = conn_resources.get_mut(&id) {
            joined.remove(resource);
            if joined.is_empty() {
                conn_resources.remove(&id);
            }
        }
        removed
    }

    /// Remove a connection from every resource. Called on disconnect.
    pub fn cleanup_connection(&self, id: ConnectionId) {
        let mut resources = self.resources.write();
        let mut conn_resources = self.conn_resources.write();

        if let Some(joined) = conn_resources.remove(&id) {
            for resource in joined {
                if let Some(registry) = resources.get(&resource) {
                    registry.detach(id);
                    if registry.is_empty() {
                        resources.remove(&resource);
                    }
                }
            }
        }
    }

    /// The registry for `resource`, if anyone has joined it.
    pub fn registry(&self, resource: &str) -> Option<Arc<BroadcastRegistry<S>>> {
        self.resources.read().get(resource).cloned()
    }

    /// Resources joined by `id`.
    pub fn resources_of(&self, id: ConnectionId) -> Vec<String> {
        self.conn_resources
            .read()
            .get(&id)
            .map(|joined| joined.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn broadcast(
        &self,
        resource: &str,
        message: &Message,
    ) -> Result<BroadcastReport, ConnectionError> {
        self.broadcast_filtered(resource, message, None)
    }

    pub fn broadcast_except(
        &self,
        resource: &str,
        message: &Message,
        except: ConnectionId,
    ) -> Result<BroadcastReport, ConnectionError> {
        self.broadcast_filtered(resource, message, Some(except))
    }

    fn broadcast_filtered(
        &self,
        resource: &str,
        message: &Message,
        except: Option<ConnectionId>,
    ) -> Result<BroadcastReport, ConnectionError> {
        let Some(registry) = self.registry(resource) else {
            return Ok(BroadcastReport::default());
        };
        let (report, failure) = registry.deliver(message, except);
        if !report.pruned.is_empty() {
            self.forget(resource, &report.pruned);
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(report),
        }
    }

    /// Drop reverse-index entries for connections pruned from `resource`.
    fn forget(&self, resource: &str, pruned: &[ConnectionId]) {
        let mut resources = self.resources.write();
        let mut conn_resources = self.conn_resources.write();

        for id in pruned {
            if let Some(joined) = conn_resources.get_mut(id) {
                joined.remove(resource);
                if joined.is_empty() {
                    conn_resources.remove(id);
                }
            }
        }
        if resources.get(resource).is_some_and(|r| r.is_empty()) {
            resources.remove(resource);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StargateConfig;
    use crate::handshake::ProtocolVariant;
    use crate::socket::mock::MockSocket;
    use std::io;
    use std::thread;

    fn conn() -> (Arc<Connection<MockSocket>>, MockSocket) {
        let socket = MockSocket::new();
        let conn =
            Connection::new(socket.clone(), ProtocolVariant::Hybi, &StargateConfig::default())
                .unwrap();
        (Arc::new(conn), socket)
    }

    #[test]
    fn test_attach_detach_idempotent() {
        let registry = BroadcastRegistry::new();
        let (a, _) = conn();
        assert!(registry.attach(Arc::clone(&a)));
        assert!(!registry.attach(Arc::clone(&a)));
        assert_eq!(registry.len(), 1);
        assert!(registry.detach(a.id()));
        assert!(!registry.detach(a.id()));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_broadcast_prunes_broken_pipe() {
        let registry = BroadcastRegistry::new();
        let (healthy, healthy_socket) = conn();
        let (broken, broken_socket) = conn();
        broken_socket.fail_writes(io::ErrorKind::BrokenPipe);
        registry.attach(Arc::clone(&healthy));
        registry.attach(Arc::clone(&broken));

        let report = registry.broadcast(&Message::from("hi")).unwrap();

        assert_eq!(report.delivered, 1);
        assert_eq!(report.pruned, vec![broken.id()]);
        assert!(registry.contains(healthy.id()));
        assert!(!registry.contains(broken.id()));
        assert_eq!(healthy_socket.written(), vec![0x81, 0x02, b'h', b'i']);
    }

    #[test]
    fn test_broadcast_propagates_other_errors_after_all_sends() {
        let registry = BroadcastRegistry::new();
        let (failing, failing_socket) = conn();
        let (healthy, healthy_socket) = conn();
        failing_socket.fail_writes(io::ErrorKind::PermissionDenied);
        registry.attach(Arc::clone(&failing));
        registry.attach(Arc::clone(&healthy));

        let err = registry.broadcast(&Message::from("x")).unwrap_err();
        assert!(matches!(err, ConnectionError::Io(_)));
        assert!(!healthy_socket.written().is_empty());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_broadcast_except_skips_sender() {
        let registry = BroadcastRegistry::new();
        let (sender, sender_socket) = conn();
        let (other, other_socket) = conn();
        registry.attach(Arc::clone(&sender));
        registry.attach(Arc::clone(&other));

        let report = registry
            .broadcast_except(&Message::from("x"), sender.id())
            .unwrap();
        assert_eq!(report.delivered, 1);
        assert!(sender_socket.written().is_empty());
        assert!(!other_socket.written().is_empty());
    }

    #[test]
    fn test_closed_member_is_pruned() {
        let registry = BroadcastRegistry::new();
        let (closed, _) = conn();
        closed.close_normal().unwrap();
        registry.attach(Arc::clone(&closed));
        let report = registry.broadcast(&Message::from("x")).unwrap();
        assert_eq!(report.pruned, vec![closed.id()]);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_concurrent_attach() {
        let registry = Arc::new(BroadcastRegistry::new());
        let (shared, _) = conn();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let shared = Arc::clone(&shared);
                thread::spawn(move || {
                    let (own, _) = conn();
                    registry.attach(own);
                    registry.attach(shared);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.len(), 9);
    }

    #[test]
    fn test_resource_join_leave_cleanup() {
        let resources = ResourceRegistry::new();
        let (a, _) = conn();
        let (b, _) = conn();
        assert!(resources.join("/chat", Arc::clone(&a)));
        assert!(resources.join("/news", Arc::clone(&a)));
        assert!(resources.join("/chat", Arc::clone(&b)));
        assert!(!resources.join("/chat", Arc::clone(&b)));

        let mut joined = resources.resources_of(a.id());
        joined.sort();
        assert_eq!(joined, vec!["/chat".to_string(), "/news".to_string()]);

        assert!(resources.leave("/news", a.id()));
        assert!(resources.registry("/news").is_none());

        resources.cleanup_connection(a.id());
        assert!(resources.resources_of(a.id()).is_empty());
        assert_eq!(resources.registry("/chat").map(|r| r.len()), Some(1));
    }

    #[test]
    fn test_resource_broadcast_forgets_pruned() {
        let resources = ResourceRegistry::new();
        let (dead, dead_socket) = conn();
        dead_socket.fail_writes(io::ErrorKind::ConnectionReset);
        resources.join("/feed", Arc::clone(&dead));

        let report = resources.broadcast("/feed", &Message::from("x")).unwrap();
        assert_eq!(report.pruned, vec![dead.id()]);
        assert!(resources.registry("/feed").is_none());
        assert!(resources.resources_of(dead.id()).is_empty());

        let empty = resources.broadcast("/missing", &Message::from("x")).unwrap();
        assert_eq!(empty, BroadcastReport::default());
    }

    #[test]
    fn test_resource_broadcast_forgets_pruned_when_another_send_fails() {
        let resources = ResourceRegistry::new();
        let (dead, dead_socket) = conn();
        let (bad, bad_socket) = conn();
        dead_socket.fail_writes(io::ErrorKind::BrokenPipe);
        bad_socket.fail_writes(io::ErrorKind::PermissionDenied);
        resources.join("/feed", Arc::clone(&dead));
        resources.join("/feed", Arc::clone(&bad));

        let err = resources.broadcast("/feed", &Message::from("x")).unwrap_err();
        assert!(matches!(err, ConnectionError::Io(_)));

        assert!(resources.resources_of(dead.id()).is_empty());
        assert_eq!(resources.resources_of(bad.id()), vec!["/feed".to_string()]);
        let feed = resources.registry("/feed").unwrap();
        assert!(!feed.contains(dead.id()));
        assert!(feed.contains(bad.id()));
    }
}
