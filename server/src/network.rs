//! Server network layer: TCP acceptor and the hub event loop.
//!
//! The hub is the only owner of the client registry and the lobbies. Every
//! connection task, match task and the acceptor report to it through one
//! unbounded queue of [`ServerMessage`]s, so membership changes never race.

use crate::client_manager::{ClientManager, NameRejection};
use crate::config::ServerConfig;
use crate::connection::{self, HeartbeatSettings};
use crate::game::Match;
use crate::lobby::LobbyManager;
use crate::match_runner::{self, MatchCommand, MatchSetup, MatchTiming};
use log::{error, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use shared::protocol::encode_frame;
use shared::{levels, ColorMode, Packet, PlayerId};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// Messages sent from network and match tasks to the hub
#[derive(Debug)]
pub enum ServerMessage {
    Accepted {
        stream: TcpStream,
        addr: SocketAddr,
    },
    PacketReceived {
        id: PlayerId,
        packet: Packet,
    },
    Disconnected {
        id: PlayerId,
        reason: String,
    },
    HeartbeatTimeout {
        id: PlayerId,
    },
    MatchEnded {
        lobby: String,
        match_id: u64,
    },
    Shutdown,
}

/// Main server coordinating connections, lobbies and matches
pub struct Server {
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    config: ServerConfig,
    clients: ClientManager,
    lobbies: LobbyManager,
    rng: StdRng,
    next_match_id: u64,

    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
}

impl Server {
    pub async fn new(config: ServerConfig) -> Result<Self, Box<dyn std::error::Error>> {
        // Fail at startup rather than when the first match begins.
        match levels::load(&config.level, config.cube.block_width, ColorMode::Deferred) {
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(format!("level {} is invalid: {}", config.level, e).into()),
            None => return Err(format!("unknown level {}", config.level).into()),
        }

        let listener = TcpListener::bind(config.address()).await?;
        let local_addr = listener.local_addr()?;
        info!("Server listening on {}", local_addr);

        let (server_tx, server_rx) = mpsc::unbounded_channel();

        Ok(Server {
            listener: Some(listener),
            local_addr,
            clients: ClientManager::new(config.max_clients),
            lobbies: LobbyManager::new(),
            rng: StdRng::from_entropy(),
            next_match_id: 1,
            config,
            server_tx,
            server_rx,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Queue into the hub; sending [`ServerMessage::Shutdown`] stops [`Server::run`].
    pub fn sender(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.server_tx.clone()
    }

    /// Spawns task that accepts connections for as long as the hub lives
    fn spawn_acceptor(&mut self) {
        let Some(listener) = self.listener.take() else {
            return;
        };
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        if server_tx
                            .send(ServerMessage::Accepted { stream, addr })
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(e) => {
                        error!("Error accepting connection: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Main hub loop
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.spawn_acceptor();
        info!("Server started successfully");

        while let Some(message) = self.server_rx.recv().await {
            if let ServerMessage::Shutdown = message {
                break;
            }
            self.handle_message(message);
        }

        info!("Server shutting down");
        for id in self.clients.ids() {
            self.teardown(id, "server shutdown");
        }
        Ok(())
    }

    fn handle_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::Accepted { stream, addr } => self.handle_accepted(stream, addr),
            ServerMessage::PacketReceived { id, packet } => self.handle_packet(id, packet),
            ServerMessage::Disconnected { id, reason } => self.teardown(id, &reason),
            ServerMessage::HeartbeatTimeout { id } => self.teardown(id, "heartbeat timeout"),
            ServerMessage::MatchEnded { lobby, match_id } => self.handle_match_ended(&lobby, match_id),
            ServerMessage::Shutdown => {}
        }
    }

    fn handle_accepted(&mut self, stream: TcpStream, addr: SocketAddr) {
        if self.clients.is_full() {
            warn!("Rejecting {}: server full", addr);
            tokio::spawn(reject(stream, "Server full"));
            return;
        }

        let events = self.server_tx.clone();
        let heartbeat = HeartbeatSettings {
            interval: self.config.heartbeat_interval,
            threshold: self.config.heartbeat_threshold,
        };
        let Some(id) = self
            .clients
            .add_client(addr, |id| connection::spawn(id, stream, events, heartbeat))
        else {
            return;
        };

        if let Some(client) = self.clients.get(id) {
            client.send(Packet::Welcome {
                id,
                name: client.name.clone(),
            });
        }
    }

    fn notice(&self, id: PlayerId, text: impl Into<String>) {
        self.clients.send(id, Packet::ServerNotice { text: text.into() });
    }

    fn send_to_lobby(&self, lobby: &str, packet: &Packet, exclude: Option<PlayerId>) {
        let Some(lobby) = self.lobbies.get(lobby) else {
            return;
        };
        for member in lobby.members() {
            if Some(*member) != exclude {
                self.clients.send(*member, packet.clone());
            }
        }
    }

    /// Processes one decoded command from client `id`
    fn handle_packet(&mut self, id: PlayerId, packet: Packet) {
        let Some(client) = self.clients.get(id) else {
            warn!("Packet {} from unknown client {}", packet.kind(), id);
            return;
        };
        let name = client.name.clone();
        let lobby = client.lobby.clone();

        match packet {
            Packet::SetUsername { name: requested } => {
                let reply = match self.clients.rename(id, &requested) {
                    Ok(()) => Packet::UsernameAccepted { name: requested },
                    Err(NameRejection::Taken | NameRejection::Invalid) => {
                        Packet::UsernameTaken { name: requested }
                    }
                };
                self.clients.send(id, reply);
            }

            Packet::ChatLobby { text } => match lobby {
                Some(lobby) => {
                    self.send_to_lobby(&lobby, &Packet::DeliverLobby { from: name, text }, None);
                }
                None => self.notice(id, "You are not in a lobby"),
            },

            Packet::ChatBroadcast { text } => {
                self.clients
                    .broadcast(&Packet::DeliverBroadcast { from: name, text }, None);
            }

            Packet::ChatWhisper { target, text } => match self.clients.find_by_name(&target) {
                Some(recipient) => {
                    recipient.send(Packet::DeliverWhisper { from: name, text });
                }
                None => self.notice(id, format!("No client named {}", target)),
            },

            Packet::Logout => {
                self.notice(id, "Goodbye");
                self.teardown(id, "logout");
            }

            Packet::CreateLobby {
                name: lobby_name,
                password,
            } => {
                if let Some(current) = lobby {
                    self.clients.send(
                        id,
                        Packet::LobbyRejected {
                            reason: format!("already in lobby {}", current),
                        },
                    );
                    return;
                }
                match self.lobbies.create(&lobby_name, &password, id) {
                    Ok(()) => self.enter_lobby(id, &lobby_name),
                    Err(e) => {
                        self.clients
                            .send(id, Packet::LobbyRejected { reason: e.to_string() });
                    }
                }
            }

            Packet::JoinLobby {
                name: lobby_name,
                password,
            } => {
                if let Some(current) = lobby {
                    self.clients.send(
                        id,
                        Packet::LobbyRejected {
                            reason: format!("already in lobby {}", current),
                        },
                    );
                    return;
                }
                match self.lobbies.join(&lobby_name, &password, id) {
                    Ok(()) => {
                        self.enter_lobby(id, &lobby_name);
                        let text = format!("{} joined the lobby", name);
                        self.send_to_lobby(&lobby_name, &Packet::ServerNotice { text }, Some(id));
                    }
                    Err(e) => {
                        self.clients
                            .send(id, Packet::LobbyRejected { reason: e.to_string() });
                    }
                }
            }

            Packet::LeaveLobby => match lobby {
                Some(lobby) => {
                    self.leave_lobby(id, &name, &lobby);
                    self.clients.send(id, Packet::LobbyLeft);
                }
                None => self.notice(id, "You are not in a lobby"),
            },

            Packet::Ready => match lobby {
                Some(lobby) => self.handle_ready(id, &name, &lobby),
                None => self.notice(id, "Join a lobby before getting ready"),
            },

            Packet::SpaceBarPressed => self.forward_to_match(id, lobby, MatchCommand::Jump(id)),

            Packet::TogglePause => self.forward_to_match(id, lobby, MatchCommand::TogglePause(id)),

            Packet::RequestLobbyList => {
                self.clients.send(
                    id,
                    Packet::LobbyList {
                        names: self.lobbies.names(),
                    },
                );
            }

            Packet::RequestClientList => {
                self.clients.send(
                    id,
                    Packet::ClientList {
                        names: self.clients.names(),
                    },
                );
            }

            Packet::Ping | Packet::Pong => {}

            other => warn!("Unexpected packet {} from client {}", other.kind(), id),
        }
    }

    fn enter_lobby(&mut self, id: PlayerId, lobby: &str) {
        if let Some(client) = self.clients.get_mut(id) {
            client.lobby = Some(lobby.to_string());
            client.handle.set_ready(false);
            client.send(Packet::LobbyJoined {
                name: lobby.to_string(),
            });
        }
    }

    fn forward_to_match(&self, id: PlayerId, lobby: Option<String>, command: MatchCommand) {
        let handle = lobby
            .as_deref()
            .and_then(|name| self.lobbies.get(name))
            .and_then(|lobby| lobby.match_handle.as_ref());
        match handle {
            Some(handle) => {
                if !handle.send(command) {
                    warn!("Match for client {} already ended", id);
                }
            }
            None => self.notice(id, "No match is running"),
        }
    }

    fn handle_ready(&mut self, id: PlayerId, name: &str, lobby_name: &str) {
        let Some(lobby) = self.lobbies.get_mut(lobby_name) else {
            return;
        };

        if lobby.in_match() {
            // Loaded the level of the running match.
            if let Some(client) = self.clients.get(id) {
                client.handle.set_ready(true);
            }
            return;
        }

        lobby.mark_ready(id);
        if lobby.can_start() {
            self.start_match(lobby_name);
        } else {
            let text = format!("{} is ready", name);
            self.send_to_lobby(lobby_name, &Packet::ServerNotice { text }, None);
        }
    }

    fn start_match(&mut self, lobby_name: &str) {
        let block_width = self.config.cube.block_width;
        let mut level = match levels::load(&self.config.level, block_width, ColorMode::Deferred) {
            Some(Ok(level)) => level,
            Some(Err(e)) => {
                error!("Cannot load level {}: {}", self.config.level, e);
                return;
            }
            None => {
                error!("Unknown level {}", self.config.level);
                return;
            }
        };
        let critical = level.flood_fill(&mut self.rng);

        let Some(lobby) = self.lobbies.get_mut(lobby_name) else {
            return;
        };
        lobby.clear_ready();
        let member_ids = lobby.members().to_vec();

        let mut game = Match::new(&self.config.level, level, critical, self.config.cube);
        let mut members = Vec::new();
        for member in &member_ids {
            if let Some(client) = self.clients.get(*member) {
                client.handle.set_ready(false);
                game.add_player(client.id, &client.name);
                members.push(client.handle.clone());
            }
        }

        let mut announcements = vec![Packet::MatchStarting {
            level: game.level_name().to_string(),
        }];
        announcements.extend(game.player_infos());
        announcements.push(Packet::CriticalBlocks {
            blocks: game.critical_blocks().to_vec(),
        });
        for member in &members {
            for packet in &announcements {
                member.send(packet.clone());
            }
        }

        let match_id = self.next_match_id;
        self.next_match_id += 1;
        let handle = match_runner::spawn(
            game,
            MatchSetup {
                id: match_id,
                lobby: lobby_name.to_string(),
                members,
                timing: MatchTiming {
                    tick: self.config.tick_duration(),
                    max_frame_delta: self.config.max_frame_delta,
                    ready_poll_interval: self.config.ready_poll_interval,
                    ready_timeout: self.config.ready_timeout,
                },
                events: self.server_tx.clone(),
            },
        );
        info!("Lobby {} started match {}", lobby_name, match_id);

        if let Some(lobby) = self.lobbies.get_mut(lobby_name) {
            lobby.match_handle = Some(handle);
        }
    }

    fn handle_match_ended(&mut self, lobby_name: &str, match_id: u64) {
        let Some(lobby) = self.lobbies.get_mut(lobby_name) else {
            return;
        };
        if lobby.match_handle.as_ref().map(|h| h.id) != Some(match_id) {
            return;
        }
        lobby.match_handle = None;
        lobby.clear_ready();
        let members = lobby.members().to_vec();

        for member in members {
            if let Some(client) = self.clients.get(member) {
                client.handle.set_ready(false);
            }
        }
        info!("Match {} in lobby {} ended", match_id, lobby_name);
        let text = "Match over, send READY to play again".to_string();
        self.send_to_lobby(lobby_name, &Packet::ServerNotice { text }, None);
    }

    fn leave_lobby(&mut self, id: PlayerId, name: &str, lobby_name: &str) {
        if let Some(handle) = self
            .lobbies
            .get(lobby_name)
            .and_then(|lobby| lobby.match_handle.as_ref())
        {
            handle.send(MatchCommand::RemovePlayer(id));
        }

        match self.lobbies.leave(lobby_name, id) {
            Ok(departure) => {
                if let Some(handle) = departure.closed_match {
                    handle.send(MatchCommand::Stop);
                }
                for member in departure.remaining {
                    self.notice(member, format!("{} left the lobby", name));
                }
            }
            Err(e) => warn!("Client {} could not leave {}: {}", id, lobby_name, e),
        }

        if let Some(client) = self.clients.get_mut(id) {
            client.lobby = None;
            client.handle.set_ready(false);
        }
    }

    /// Removes a client everywhere. Safe to call repeatedly; only the first call acts.
    fn teardown(&mut self, id: PlayerId, reason: &str) {
        let Some(client) = self.clients.remove_client(&id) else {
            return;
        };
        info!("Tearing down client {} ({}): {}", id, client.name, reason);
        client.handle.close();
        if let Some(lobby) = &client.lobby {
            self.leave_lobby(id, &client.name, lobby);
        }
    }
}

/// Tells a client it cannot be served and closes the socket.
async fn reject(mut stream: TcpStream, reason: &str) {
    let packet = Packet::ServerNotice {
        text: reason.to_string(),
    };
    if let Ok(frame) = encode_frame(&packet) {
        let _ = stream.write_all(frame.as_bytes()).await;
    }
    let _ = stream.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionHandle;
    use std::collections::HashMap;

    async fn test_server() -> Server {
        let config = ServerConfig {
            port: 0,
            ..ServerConfig::default()
        };
        Server::new(config).await.unwrap()
    }

    /// Registers clients backed by plain channels instead of sockets.
    fn connect(
        server: &mut Server,
        count: usize,
    ) -> HashMap<PlayerId, mpsc::UnboundedReceiver<Packet>> {
        let addr: SocketAddr = "127.0.0.1:5000".parse().unwrap();
        let mut receivers = HashMap::new();
        for _ in 0..count {
            server.clients.add_client(addr, |id| {
                let (handle, rx) = ConnectionHandle::channel(id);
                receivers.insert(id, rx);
                handle
            });
        }
        receivers
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Packet>) -> Vec<Packet> {
        let mut packets = Vec::new();
        while let Ok(packet) = rx.try_recv() {
            packets.push(packet);
        }
        packets
    }

    fn send(server: &mut Server, id: PlayerId, packet: Packet) {
        server.handle_message(ServerMessage::PacketReceived { id, packet });
    }

    #[tokio::test]
    async fn test_unknown_level_fails_at_startup() {
        let config = ServerConfig {
            port: 0,
            level: "missing".into(),
            ..ServerConfig::default()
        };
        assert!(Server::new(config).await.is_err());
    }

    #[tokio::test]
    async fn test_chat_routing() {
        let mut server = test_server().await;
        let mut rx = connect(&mut server, 3);

        send(&mut server, 1, Packet::SetUsername { name: "ann".into() });
        send(&mut server, 2, Packet::SetUsername { name: "ann".into() });
        assert_eq!(drain(rx.get_mut(&1).unwrap()), vec![Packet::UsernameAccepted { name: "ann".into() }]);
        assert_eq!(drain(rx.get_mut(&2).unwrap()), vec![Packet::UsernameTaken { name: "ann".into() }]);

        send(&mut server, 2, Packet::ChatWhisper { target: "ann".into(), text: "psst".into() });
        assert_eq!(
            drain(rx.get_mut(&1).unwrap()),
            vec![Packet::DeliverWhisper { from: "guest-2".into(), text: "psst".into() }]
        );
        assert!(drain(rx.get_mut(&3).unwrap()).is_empty());

        send(&mut server, 3, Packet::ChatBroadcast { text: "hello".into() });
        for id in 1..=3 {
            assert_eq!(
                drain(rx.get_mut(&id).unwrap()),
                vec![Packet::DeliverBroadcast { from: "guest-3".into(), text: "hello".into() }]
            );
        }

        send(&mut server, 1, Packet::RequestClientList);
        assert_eq!(
            drain(rx.get_mut(&1).unwrap()),
            vec![Packet::ClientList {
                names: vec!["ann".into(), "guest-2".into(), "guest-3".into()]
            }]
        );
    }

    #[tokio::test]
    async fn test_lobby_chat_stays_in_lobby() {
        let mut server = test_server().await;
        let mut rx = connect(&mut server, 3);

        send(&mut server, 1, Packet::CreateLobby { name: "alpha".into(), password: "pw".into() });
        send(&mut server, 2, Packet::JoinLobby { name: "alpha".into(), password: "bad".into() });
        send(&mut server, 3, Packet::JoinLobby { name: "alpha".into(), password: "pw".into() });
        assert_eq!(drain(rx.get_mut(&1).unwrap())[0], Packet::LobbyJoined { name: "alpha".into() });
        assert!(matches!(drain(rx.get_mut(&2).unwrap())[0], Packet::LobbyRejected { .. }));
        assert_eq!(drain(rx.get_mut(&3).unwrap())[0], Packet::LobbyJoined { name: "alpha".into() });

        send(&mut server, 3, Packet::ChatLobby { text: "hi team".into() });
        let expected = Packet::DeliverLobby { from: "guest-3".into(), text: "hi team".into() };
        assert_eq!(drain(rx.get_mut(&1).unwrap()), vec![expected.clone()]);
        assert_eq!(drain(rx.get_mut(&3).unwrap()), vec![expected]);
        assert!(drain(rx.get_mut(&2).unwrap()).is_empty());

        send(&mut server, 2, Packet::RequestLobbyList);
        assert_eq!(
            drain(rx.get_mut(&2).unwrap()),
            vec![Packet::LobbyList { names: vec!["alpha".into()] }]
        );
    }

    #[tokio::test]
    async fn test_all_ready_starts_match() {
        let mut server = test_server().await;
        let mut rx = connect(&mut server, 2);

        send(&mut server, 1, Packet::CreateLobby { name: "go".into(), password: "".into() });
        send(&mut server, 2, Packet::JoinLobby { name: "go".into(), password: "".into() });
        send(&mut server, 1, Packet::Ready);
        assert!(!server.lobbies.get("go").unwrap().in_match());
        drain(rx.get_mut(&1).unwrap());
        drain(rx.get_mut(&2).unwrap());

        send(&mut server, 2, Packet::Ready);
        assert!(server.lobbies.get("go").unwrap().in_match());

        let packets = drain(rx.get_mut(&2).unwrap());
        assert_eq!(
            packets[0],
            Packet::MatchStarting { level: levels::DEFAULT_LEVEL.into() }
        );
        let infos = packets
            .iter()
            .filter(|p| matches!(p, Packet::PlayerInfo { .. }))
            .count();
        assert_eq!(infos, 2);
        assert!(matches!(packets.last(), Some(Packet::CriticalBlocks { blocks }) if !blocks.is_empty()));

        // A READY during the match marks the client as loaded.
        send(&mut server, 2, Packet::Ready);
        assert!(server.clients.get(2).unwrap().handle.is_ready());
        assert!(!server.clients.get(1).unwrap().handle.is_ready());
    }

    #[tokio::test]
    async fn test_teardown_happens_once_and_cleans_lobby() {
        let mut server = test_server().await;
        let mut rx = connect(&mut server, 2);
        send(&mut server, 1, Packet::CreateLobby { name: "solo".into(), password: "".into() });
        send(&mut server, 2, Packet::CreateLobby { name: "duo".into(), password: "".into() });
        let cancel = server.clients.get(1).unwrap().handle.cancel.clone();

        server.handle_message(ServerMessage::HeartbeatTimeout { id: 1 });
        server.handle_message(ServerMessage::Disconnected { id: 1, reason: "eof".into() });

        assert!(cancel.is_cancelled());
        assert!(server.clients.get(1).is_none());
        assert_eq!(server.clients.len(), 1);
        assert!(server.lobbies.get("solo").is_none());
        assert!(server.lobbies.get("duo").is_some());

        send(&mut server, 2, Packet::Logout);
        assert!(server.clients.is_empty());
        assert!(server.lobbies.is_empty());
        assert_eq!(
            drain(rx.get_mut(&2).unwrap()).last(),
            Some(&Packet::ServerNotice { text: "Goodbye".into() })
        );
    }

    #[tokio::test]
    async fn test_match_commands_need_a_running_match() {
        let mut server = test_server().await;
        let mut rx = connect(&mut server, 1);

        send(&mut server, 1, Packet::SpaceBarPressed);
        send(&mut server, 1, Packet::Welcome { id: 1, name: "spoof".into() });

        assert_eq!(
            drain(rx.get_mut(&1).unwrap()),
            vec![Packet::ServerNotice { text: "No match is running".into() }]
        );
    }
}
