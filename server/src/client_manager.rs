//! Registry of connected clients.
//!
//! Owned by the network hub. Each entry keeps the connection handle used to
//! reach the client, its display name and the lobby it currently sits in.

use crate::connection::ConnectionHandle;
use log::info;
use shared::{Packet, PlayerId};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;

#[derive(Debug)]
pub struct Client {
    pub id: PlayerId,
    pub addr: SocketAddr,
    pub name: String,
    pub lobby: Option<String>,
    pub handle: ConnectionHandle,
    pub connected_at: Instant,
}

impl Client {
    pub fn new(id: PlayerId, addr: SocketAddr, handle: ConnectionHandle) -> Self {
        Self {
            id,
            addr,
            name: format!("guest-{}", id),
            lobby: None,
            handle,
            connected_at: Instant::now(),
        }
    }

    pub fn send(&self, packet: Packet) -> bool {
        self.handle.send(packet)
    }
}

/// Why a requested display name was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameRejection {
    Invalid,
    Taken,
}

pub struct ClientManager {
    clients: HashMap<PlayerId, Client>,
    next_client_id: PlayerId,
    max_clients: usize,
}

impl ClientManager {
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: HashMap::new(),
            next_client_id: 1,
            max_clients,
        }
    }

    pub fn is_full(&self) -> bool {
        self.clients.len() >= self.max_clients
    }

    /// Registers a client, letting `connect` build its handle from the new id.
    ///
    /// Returns `None` without calling `connect` when the server is at capacity.
    pub fn add_client<F>(&mut self, addr: SocketAddr, connect: F) -> Option<PlayerId>
    where
        F: FnOnce(PlayerId) -> ConnectionHandle,
    {
        if self.is_full() {
            return None;
        }

        let client_id = self.next_client_id;
        self.next_client_id += 1;

        let client = Client::new(client_id, addr, connect(client_id));
        info!("Client {} connected from {}", client_id, addr);
        self.clients.insert(client_id, client);

        Some(client_id)
    }

    /// Removes a client; only the first call for an id returns it.
    pub fn remove_client(&mut self, client_id: &PlayerId) -> Option<Client> {
        let client = self.clients.remove(client_id)?;
        info!("Client {} ({}) disconnected", client.id, client.name);
        Some(client)
    }

    pub fn get(&self, client_id: PlayerId) -> Option<&Client> {
        self.clients.get(&client_id)
    }

    pub fn get_mut(&mut self, client_id: PlayerId) -> Option<&mut Client> {
        self.clients.get_mut(&client_id)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Client> {
        self.clients.values().find(|client| client.name == name)
    }

    pub fn rename(&mut self, client_id: PlayerId, name: &str) -> Result<(), NameRejection> {
        let valid = !name.trim().is_empty() && !name.contains(shared::protocol::LIST_SEPARATOR);
        if !valid {
            return Err(NameRejection::Invalid);
        }
        if self
            .find_by_name(name)
            .is_some_and(|other| other.id != client_id)
        {
            return Err(NameRejection::Taken);
        }
        match self.clients.get_mut(&client_id) {
            Some(client) => {
                info!("Client {} is now known as {}", client_id, name);
                client.name = name.to_string();
                Ok(())
            }
            None => Err(NameRejection::Invalid),
        }
    }

    pub fn send(&self, client_id: PlayerId, packet: Packet) -> bool {
        self.get(client_id).is_some_and(|client| client.send(packet))
    }

    pub fn broadcast(&self, packet: &Packet, exclude: Option<PlayerId>) {
        for client in self.clients.values() {
            if Some(client.id) != exclude {
                client.send(packet.clone());
            }
        }
    }

    /// Ids in ascending order.
    pub fn ids(&self) -> Vec<PlayerId> {
        let mut ids: Vec<PlayerId> = self.clients.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Display names ordered by client id.
    pub fn names(&self) -> Vec<String> {
        let mut clients: Vec<&Client> = self.clients.values().collect();
        clients.sort_by_key(|client| client.id);
        clients.into_iter().map(|client| client.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:8080".parse().unwrap()
    }

    fn detached(id: PlayerId) -> ConnectionHandle {
        ConnectionHandle::channel(id).0
    }

    #[test]
    fn test_client_manager_creation() {
        let manager = ClientManager::new(5);
        assert_eq!(manager.max_clients, 5);
        assert!(manager.is_empty());
        assert_eq!(manager.len(), 0);
    }

    #[test]
    fn test_add_multiple_clients() {
        let mut manager = ClientManager::new(3);

        let client_id1 = manager.add_client(test_addr(), detached).unwrap();
        let client_id2 = manager.add_client(test_addr(), detached).unwrap();

        assert_eq!(client_id1, 1);
        assert_eq!(client_id2, 2);
        assert_eq!(manager.len(), 2);
        assert_eq!(manager.get(2).unwrap().name, "guest-2");
        assert_eq!(manager.get(2).unwrap().handle.id, 2);
    }

    #[test]
    fn test_add_client_max_capacity() {
        let mut manager = ClientManager::new(1);

        assert!(manager.add_client(test_addr(), detached).is_some());
        assert!(manager.is_full());

        let mut called = false;
        let rejected = manager.add_client(test_addr(), |id| {
            called = true;
            detached(id)
        });
        assert!(rejected.is_none());
        assert!(!called, "no connection is built for a rejected client");
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_remove_client_only_once() {
        let mut manager = ClientManager::new(2);
        let client_id = manager.add_client(test_addr(), detached).unwrap();

        assert!(manager.remove_client(&client_id).is_some());
        assert!(manager.remove_client(&client_id).is_none());
        assert!(manager.is_empty());
    }

    #[test]
    fn test_rename_rules() {
        let mut manager = ClientManager::new(4);
        let ann = manager.add_client(test_addr(), detached).unwrap();
        let bob = manager.add_client(test_addr(), detached).unwrap();

        assert_eq!(manager.rename(ann, "ann"), Ok(()));
        assert_eq!(manager.rename(bob, "ann"), Err(NameRejection::Taken));
        assert_eq!(manager.rename(bob, "  "), Err(NameRejection::Invalid));
        assert_eq!(manager.rename(bob, "b,ob"), Err(NameRejection::Invalid));
        assert_eq!(manager.rename(ann, "ann"), Ok(()), "keeping your own name is fine");
        assert_eq!(manager.find_by_name("ann").unwrap().id, ann);
        assert_eq!(manager.names(), vec!["ann".to_string(), "guest-2".to_string()]);
    }

    #[test]
    fn test_broadcast_skips_excluded() {
        let mut manager = ClientManager::new(4);
        let mut receivers = HashMap::new();
        for _ in 0..3 {
            manager.add_client(test_addr(), |id| {
                let (handle, rx) = ConnectionHandle::channel(id);
                receivers.insert(id, rx);
                handle
            });
        }

        manager.broadcast(&Packet::MatchStarted, Some(2));

        assert_eq!(receivers.get_mut(&1).unwrap().try_recv().unwrap(), Packet::MatchStarted);
        assert!(receivers.get_mut(&2).unwrap().try_recv().is_err());
        assert_eq!(receivers.get_mut(&3).unwrap().try_recv().unwrap(), Packet::MatchStarted);
        assert!(manager.send(1, Packet::Ping));
        assert!(!manager.send(99, Packet::Ping));
    }
}
