//! Lobbies group up to four clients into one match.

use crate::match_runner::MatchHandle;
use log::info;
use sha2::{Digest, Sha256};
use shared::PlayerId;
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;

pub const MAX_MEMBERS: usize = 4;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LobbyError {
    #[error("lobby name must not be empty or contain commas")]
    InvalidName,
    #[error("a lobby named {0} already exists")]
    NameTaken(String),
    #[error("there is no lobby named {0}")]
    NotFound(String),
    #[error("wrong password")]
    WrongPassword,
    #[error("lobby {0} is full")]
    Full(String),
    #[error("lobby {0} is already playing")]
    MatchRunning(String),
    #[error("you are not a member of {0}")]
    NotAMember(String),
}

/// Hex-encoded SHA-256 digest of a lobby password.
pub fn hash_password(password: &str) -> String {
    format!("{:x}", Sha256::digest(password.as_bytes()))
}

#[derive(Debug)]
pub struct Lobby {
    pub name: String,
    password_hash: String,
    members: Vec<PlayerId>,
    ready: BTreeSet<PlayerId>,
    pub match_handle: Option<MatchHandle>,
}

impl Lobby {
    fn new(name: &str, password: &str, owner: PlayerId) -> Self {
        Lobby {
            name: name.to_string(),
            password_hash: hash_password(password),
            members: vec![owner],
            ready: BTreeSet::new(),
            match_handle: None,
        }
    }

    pub fn members(&self) -> &[PlayerId] {
        &self.members
    }

    pub fn is_member(&self, id: PlayerId) -> bool {
        self.members.contains(&id)
    }

    pub fn check_password(&self, password: &str) -> bool {
        self.password_hash == hash_password(password)
    }

    pub fn in_match(&self) -> bool {
        self.match_handle.is_some()
    }

    pub fn mark_ready(&mut self, id: PlayerId) {
        if self.is_member(id) {
            self.ready.insert(id);
        }
    }

    /// Every member is ready and nobody is playing yet.
    pub fn can_start(&self) -> bool {
        !self.in_match()
            && !self.members.is_empty()
            && self.members.iter().all(|id| self.ready.contains(id))
    }

    pub fn clear_ready(&mut self) {
        self.ready.clear();
    }
}

/// Outcome of leaving a lobby.
#[derive(Debug)]
pub struct Departure {
    /// Members still in the lobby.
    pub remaining: Vec<PlayerId>,
    /// Set when the lobby was removed because it became empty.
    pub closed_match: Option<MatchHandle>,
    pub lobby_removed: bool,
}

#[derive(Debug, Default)]
pub struct LobbyManager {
    lobbies: HashMap<String, Lobby>,
}

impl LobbyManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, name: &str, password: &str, owner: PlayerId) -> Result<(), LobbyError> {
        if name.trim().is_empty() || name.contains(shared::protocol::LIST_SEPARATOR) {
            return Err(LobbyError::InvalidName);
        }
        if self.lobbies.contains_key(name) {
            return Err(LobbyError::NameTaken(name.to_string()));
        }
        self.lobbies
            .insert(name.to_string(), Lobby::new(name, password, owner));
        info!("Client {} created lobby {}", owner, name);
        Ok(())
    }

    pub fn join(&mut self, name: &str, password: &str, member: PlayerId) -> Result<(), LobbyError> {
        let lobby = self
            .lobbies
            .get_mut(name)
            .ok_or_else(|| LobbyError::NotFound(name.to_string()))?;
        if !lobby.check_password(password) {
            return Err(LobbyError::WrongPassword);
        }
        if lobby.in_match() {
            return Err(LobbyError::MatchRunning(name.to_string()));
        }
        if lobby.members.len() >= MAX_MEMBERS {
            return Err(LobbyError::Full(name.to_string()));
        }
        if !lobby.is_member(member) {
            lobby.members.push(member);
        }
        info!("Client {} joined lobby {}", member, name);
        Ok(())
    }

    /// Removes `member`; an emptied lobby is destroyed.
    pub fn leave(&mut self, name: &str, member: PlayerId) -> Result<Departure, LobbyError> {
        let lobby = self
            .lobbies
            .get_mut(name)
            .ok_or_else(|| LobbyError::NotFound(name.to_string()))?;
        if !lobby.is_member(member) {
            return Err(LobbyError::NotAMember(name.to_string()));
        }
        lobby.members.retain(|id| *id != member);
        lobby.ready.remove(&member);
        info!("Client {} left lobby {}", member, name);

        if !lobby.members.is_empty() {
            return Ok(Departure {
                remaining: lobby.members.clone(),
                closed_match: None,
                lobby_removed: false,
            });
        }

        let closed_match = self
            .lobbies
            .remove(name)
            .and_then(|lobby| lobby.match_handle);
        info!("Lobby {} is empty and was closed", name);
        Ok(Departure {
            remaining: Vec::new(),
            closed_match,
            lobby_removed: true,
        })
    }

    pub fn get(&self, name: &str) -> Option<&Lobby> {
        self.lobbies.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Lobby> {
        self.lobbies.get_mut(name)
    }

    /// Lobby names in alphabetical order.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lobbies.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.lobbies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lobbies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_hash_is_sha256_hex() {
        assert_eq!(
            hash_password("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_ne!(hash_password("abc"), hash_password("abd"));
    }

    #[test]
    fn test_create_and_join() {
        let mut lobbies = LobbyManager::new();
        lobbies.create("alpha", "pw", 1).unwrap();

        assert_eq!(
            lobbies.create("alpha", "other", 2),
            Err(LobbyError::NameTaken("alpha".into()))
        );
        assert_eq!(lobbies.join("alpha", "nope", 2), Err(LobbyError::WrongPassword));
        assert_eq!(
            lobbies.join("beta", "pw", 2),
            Err(LobbyError::NotFound("beta".into()))
        );
        lobbies.join("alpha", "pw", 2).unwrap();
        assert_eq!(lobbies.get("alpha").unwrap().members(), &[1, 2]);
        assert_eq!(lobbies.create("", "pw", 3), Err(LobbyError::InvalidName));
    }

    #[test]
    fn test_lobby_holds_four_members() {
        let mut lobbies = LobbyManager::new();
        lobbies.create("full", "", 1).unwrap();
        for id in 2..=4 {
            lobbies.join("full", "", id).unwrap();
        }
        assert_eq!(lobbies.join("full", "", 5), Err(LobbyError::Full("full".into())));
    }

    #[test]
    fn test_readiness_requires_everyone() {
        let mut lobbies = LobbyManager::new();
        lobbies.create("r", "", 1).unwrap();
        lobbies.join("r", "", 2).unwrap();

        let lobby = lobbies.get_mut("r").unwrap();
        lobby.mark_ready(1);
        assert!(!lobby.can_start());
        lobby.mark_ready(9);
        assert!(!lobby.can_start(), "non-members do not count");
        lobby.mark_ready(2);
        assert!(lobby.can_start());
        lobby.clear_ready();
        assert!(!lobby.can_start());
    }

    #[test]
    fn test_leaving_last_member_removes_lobby() {
        let mut lobbies = LobbyManager::new();
        lobbies.create("solo", "", 1).unwrap();
        lobbies.join("solo", "", 2).unwrap();

        let departure = lobbies.leave("solo", 1).unwrap();
        assert_eq!(departure.remaining, vec![2]);
        assert!(!departure.lobby_removed);

        assert_eq!(
            lobbies.leave("solo", 1).unwrap_err(),
            LobbyError::NotAMember("solo".into())
        );

        let departure = lobbies.leave("solo", 2).unwrap();
        assert!(departure.lobby_removed);
        assert!(departure.closed_match.is_none());
        assert!(lobbies.is_empty());
    }

    #[test]
    fn test_names_are_sorted() {
        let mut lobbies = LobbyManager::new();
        lobbies.create("zeta", "", 1).unwrap();
        lobbies.create("alpha", "", 2).unwrap();
        assert_eq!(lobbies.names(), vec!["alpha".to_string(), "zeta".to_string()]);
        assert_eq!(lobbies.len(), 2);
    }
}
