//! Client-side mirror of the server state.
//!
//! The server is authoritative: position and motion updates overwrite the
//! local cubes. Between updates the mirror keeps stepping every cube with the
//! shared physics so the view moves smoothly.

use log::{debug, warn};
use shared::{
    levels, Color, ColorMode, Cube, CubeConfig, Gravity, Level, NoHooks, Packet, PlayerId,
    Vector2D,
};
use std::collections::BTreeMap;

/// A cube as seen by this client.
#[derive(Debug, Clone)]
pub struct PlayerView {
    pub id: PlayerId,
    pub name: String,
    pub cube: Cube,
    pub coins: u32,
    pub deaths: u32,
    pub finished: bool,
}

/// What the client should do in response to a server packet.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Reaction {
    /// Line to show the user.
    pub message: Option<String>,
    /// Packet to send back to the server.
    pub reply: Option<Packet>,
}

impl Reaction {
    fn say(message: impl Into<String>) -> Self {
        Reaction {
            message: Some(message.into()),
            reply: None,
        }
    }

    fn reply(packet: Packet) -> Self {
        Reaction {
            message: None,
            reply: Some(packet),
        }
    }
}

#[derive(Debug)]
pub struct ClientGameState {
    pub player_id: Option<PlayerId>,
    pub name: Option<String>,
    pub lobby: Option<String>,
    level_name: Option<String>,
    level: Option<Level>,
    players: BTreeMap<PlayerId, PlayerView>,
    cube_config: CubeConfig,
    started: bool,
    paused: bool,
    loaded: bool,
}

impl ClientGameState {
    pub fn new(cube_config: CubeConfig) -> Self {
        Self {
            player_id: None,
            name: None,
            lobby: None,
            level_name: None,
            level: None,
            players: BTreeMap::new(),
            cube_config,
            started: false,
            paused: false,
            loaded: false,
        }
    }

    pub fn level(&self) -> Option<&Level> {
        self.level.as_ref()
    }

    pub fn level_name(&self) -> Option<&str> {
        self.level_name.as_deref()
    }

    pub fn player(&self, id: PlayerId) -> Option<&PlayerView> {
        self.players.get(&id)
    }

    pub fn players(&self) -> impl Iterator<Item = &PlayerView> {
        self.players.values()
    }

    /// The cube this client controls, once the match has announced it.
    pub fn local_player(&self) -> Option<&PlayerView> {
        self.player_id.and_then(|id| self.players.get(&id))
    }

    pub fn in_match(&self) -> bool {
        self.level.is_some()
    }

    pub fn is_running(&self) -> bool {
        self.started && !self.paused
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Forgets everything tied to the current connection.
    pub fn reset(&mut self) {
        *self = ClientGameState::new(self.cube_config);
    }

    fn end_match(&mut self) {
        self.level = None;
        self.level_name = None;
        self.players.clear();
        self.started = false;
        self.paused = false;
        self.loaded = false;
    }

    fn spawn_position(&self) -> Vector2D {
        self.level
            .as_ref()
            .map(|level| level.spawn_position(self.cube_config.size))
            .unwrap_or(Vector2D::ZERO)
    }

    fn name_of(&self, id: PlayerId) -> String {
        self.players
            .get(&id)
            .map(|player| player.name.clone())
            .unwrap_or_else(|| format!("player {}", id))
    }

    /// Applies one packet from the server.
    pub fn apply(&mut self, packet: &Packet) -> Reaction {
        match packet {
            Packet::Ping => Reaction::reply(Packet::Pong),
            Packet::Pong => Reaction::default(),
            Packet::Welcome { id, name } => {
                self.player_id = Some(*id);
                self.name = Some(name.clone());
                Reaction::say(format!("Connected as {} (id {})", name, id))
            }
            Packet::UsernameAccepted { name } => {
                self.name = Some(name.clone());
                Reaction::say(format!("You are now known as {}", name))
            }
            Packet::UsernameTaken { name } => {
                Reaction::say(format!("The name {} is not available", name))
            }
            Packet::DeliverBroadcast { from, text } => Reaction::say(format!("[all] {}: {}", from, text)),
            Packet::DeliverWhisper { from, text } => {
                Reaction::say(format!("[whisper] {}: {}", from, text))
            }
            Packet::DeliverLobby { from, text } => Reaction::say(format!("[lobby] {}: {}", from, text)),
            Packet::ServerNotice { text } => Reaction::say(format!("[server] {}", text)),
            Packet::LobbyJoined { name } => {
                self.lobby = Some(name.clone());
                Reaction::say(format!("Joined lobby {}", name))
            }
            Packet::LobbyRejected { reason } => Reaction::say(format!("Lobby refused: {}", reason)),
            Packet::LobbyLeft => {
                self.lobby = None;
                self.end_match();
                Reaction::say("Left the lobby")
            }
            Packet::LobbyList { names } => Reaction::say(format!("Lobbies: {}", list(names))),
            Packet::ClientList { names } => Reaction::say(format!("Clients: {}", list(names))),
            Packet::MatchStarting { level } => self.start_loading(level),
            Packet::PlayerInfo { id, name, color } => {
                self.add_player(*id, name, *color);
                Reaction::default()
            }
            Packet::CriticalBlocks { blocks } => {
                let Some(level) = self.level.as_mut() else {
                    warn!("Critical blocks arrived without a level");
                    return Reaction::default();
                };
                if let Err(e) = level.apply_critical_blocks(blocks) {
                    warn!("Could not colour level: {}", e);
                    return Reaction::default();
                }
                if !level.is_fully_colored() || self.loaded {
                    return Reaction::default();
                }
                self.loaded = true;
                debug!("Level coloured, reporting ready");
                Reaction::reply(Packet::Ready)
            }
            Packet::MatchStarted => {
                self.started = true;
                Reaction::say("Go!")
            }
            Packet::PositionUpdate { id, position } => {
                if let Some(player) = self.players.get_mut(id) {
                    player.cube.position = *position;
                }
                Reaction::default()
            }
            Packet::BigUpdate {
                id,
                velocity,
                acceleration,
                jumping,
            } => {
                if let Some(player) = self.players.get_mut(id) {
                    player.cube.velocity = *velocity;
                    match Gravity::from_vector(*acceleration) {
                        Some(gravity) => player.cube.rotate_acceleration(gravity),
                        None => warn!("Ignoring acceleration {:?} for player {}", acceleration, id),
                    }
                    player.cube.jumping = *jumping;
                    // Gravity flips arrive from the server; never predict one.
                    player.cube.can_rotate = false;
                }
                Reaction::default()
            }
            Packet::PlayerDied { id } => {
                let spawn = self.spawn_position();
                let name = self.name_of(*id);
                if let Some(player) = self.players.get_mut(id) {
                    player.cube.respawn(spawn);
                    player.deaths += 1;
                }
                Reaction::say(format!("{} died", name))
            }
            Packet::CoinCollected { id, cell } => {
                let name = self.name_of(*id);
                if let Some(player) = self.players.get_mut(id) {
                    player.coins += 1;
                }
                Reaction::say(format!("{} collected the coin at {:?}", name, cell))
            }
            Packet::PlayerFinished { id } => {
                let name = self.name_of(*id);
                if let Some(player) = self.players.get_mut(id) {
                    player.finished = true;
                }
                Reaction::say(format!("{} reached the goal", name))
            }
            Packet::MatchPaused { paused } => {
                self.paused = *paused;
                Reaction::say(if *paused { "Match paused" } else { "Match resumed" })
            }
            Packet::MatchFinished { ticks } => {
                let summary = self
                    .players
                    .values()
                    .map(|p| format!("{} ({} coins, {} deaths)", p.name, p.coins, p.deaths))
                    .collect::<Vec<_>>()
                    .join(", ");
                self.end_match();
                Reaction::say(format!("Match finished after {} ticks: {}", ticks, summary))
            }
            other => {
                warn!("Unexpected {} from server", other.kind());
                Reaction::default()
            }
        }
    }

    fn start_loading(&mut self, name: &str) -> Reaction {
        self.end_match();
        match levels::load(name, self.cube_config.block_width, ColorMode::Deferred) {
            Some(Ok(level)) => {
                self.level = Some(level);
                self.level_name = Some(name.to_string());
                Reaction::say(format!("Loading level {}", name))
            }
            Some(Err(e)) => {
                warn!("Level {} is malformed: {}", name, e);
                Reaction::say(format!("Could not load level {}", name))
            }
            None => Reaction::say(format!("Unknown level {}", name)),
        }
    }

    fn add_player(&mut self, id: PlayerId, name: &str, color: Color) {
        let spawn = self.spawn_position();
        self.players.insert(
            id,
            PlayerView {
                id,
                name: name.to_string(),
                cube: Cube::spawned(spawn, color, self.cube_config),
                coins: 0,
                deaths: 0,
                finished: false,
            },
        );
    }

    /// Predicts every cube forward by `dt` seconds.
    pub fn predict(&mut self, dt: f64) {
        if !self.is_running() {
            return;
        }
        let Some(level) = self.level.as_ref() else {
            return;
        };
        let spawn = level.spawn_position(self.cube_config.size);
        for player in self.players.values_mut().filter(|p| !p.finished) {
            player.cube.step(level, dt, &mut NoHooks);
            if player.cube.dead {
                // The server announces the death; until then wait at the spawn.
                player.cube.respawn(spawn);
            }
        }
    }
}

fn list(names: &[String]) -> String {
    if names.is_empty() {
        "(none)".to_string()
    } else {
        names.join(", ")
    }
}
