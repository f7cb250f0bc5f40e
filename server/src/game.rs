use log::{debug, info};
use shared::cube::{Cube, CubeConfig, CubeHooks};
use shared::{Color, CriticalBlock, GridIndex, Level, Packet, PlayerId, Vector2D};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Something that happened to a player during a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchEvent {
    Died { id: PlayerId },
    CoinCollected { id: PlayerId, cell: GridIndex },
    Finished { id: PlayerId },
}

impl MatchEvent {
    pub fn to_packet(&self) -> Packet {
        match *self {
            MatchEvent::Died { id } => Packet::PlayerDied { id },
            MatchEvent::CoinCollected { id, cell } => Packet::CoinCollected { id, cell },
            MatchEvent::Finished { id } => Packet::PlayerFinished { id },
        }
    }
}

/// Velocity, acceleration and jumping flag as last sent in a `BIG_UPDATE`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Motion {
    velocity: Vector2D,
    acceleration: Vector2D,
    jumping: bool,
}

impl Motion {
    fn of(cube: &Cube) -> Self {
        Motion {
            velocity: cube.velocity,
            acceleration: cube.acceleration(),
            jumping: cube.jumping,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub cube: Cube,
    pub finished: bool,
    pub coins: u32,
    pub deaths: u32,
    /// Motion last announced to clients; `None` forces a new announcement.
    announced: Option<Motion>,
}

impl Player {
    pub fn color(&self) -> Color {
        self.cube.color
    }
}

/// Collects the hook calls of one cube step.
struct StepHooks<'a> {
    id: PlayerId,
    collected: &'a mut HashSet<GridIndex>,
    events: &'a mut Vec<MatchEvent>,
    died: bool,
    reached_goal: bool,
    coins: u32,
}

impl CubeHooks for StepHooks<'_> {
    fn on_death(&mut self, _cube: &Cube) {
        self.died = true;
    }

    fn on_coin_collision(&mut self, cell: GridIndex) {
        if self.collected.insert(cell) {
            self.coins += 1;
            self.events.push(MatchEvent::CoinCollected { id: self.id, cell });
        }
    }

    fn on_goal_reached(&mut self, _cell: GridIndex) {
        self.reached_goal = true;
    }
}

/// Authoritative state of one running match.
pub struct Match {
    level: Level,
    level_name: String,
    critical_blocks: Vec<CriticalBlock>,
    cube_config: CubeConfig,
    players: BTreeMap<PlayerId, Player>,
    pending_jumps: BTreeSet<PlayerId>,
    collected: HashSet<GridIndex>,
    pub tick: u64,
    paused: bool,
}

impl Match {
    /// `level` must already be coloured; `critical_blocks` reproduce that colouring.
    pub fn new(
        level_name: &str,
        level: Level,
        critical_blocks: Vec<CriticalBlock>,
        cube_config: CubeConfig,
    ) -> Self {
        Match {
            level,
            level_name: level_name.to_string(),
            critical_blocks,
            cube_config,
            players: BTreeMap::new(),
            pending_jumps: BTreeSet::new(),
            collected: HashSet::new(),
            tick: 0,
            paused: false,
        }
    }

    pub fn level(&self) -> &Level {
        &self.level
    }

    pub fn level_name(&self) -> &str {
        &self.level_name
    }

    pub fn critical_blocks(&self) -> &[CriticalBlock] {
        &self.critical_blocks
    }

    pub fn spawn_position(&self) -> Vector2D {
        self.level.spawn_position(self.cube_config.size)
    }

    /// Adds a player at the spawn; colours follow join order.
    pub fn add_player(&mut self, id: PlayerId, name: &str) {
        let color = Color::for_player(self.players.len());
        let cube = Cube::spawned(self.spawn_position(), color, self.cube_config);
        info!("Player {} ({}) joins the match as {}", id, name, color);
        self.players.insert(
            id,
            Player {
                id,
                name: name.to_string(),
                cube,
                finished: false,
                coins: 0,
                deaths: 0,
                announced: None,
            },
        );
    }

    pub fn remove_player(&mut self, id: PlayerId) -> bool {
        self.pending_jumps.remove(&id);
        let removed = self.players.remove(&id).is_some();
        if removed {
            info!("Player {} left the match", id);
        }
        removed
    }

    pub fn player(&self, id: PlayerId) -> Option<&Player> {
        self.players.get(&id)
    }

    pub fn players(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    pub fn player_ids(&self) -> Vec<PlayerId> {
        self.players.keys().copied().collect()
    }

    pub fn queue_jump(&mut self, id: PlayerId) {
        if self.players.contains_key(&id) {
            self.pending_jumps.insert(id);
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn toggle_pause(&mut self) -> bool {
        self.paused = !self.paused;
        self.paused
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    /// Every remaining player reached the goal.
    pub fn is_finished(&self) -> bool {
        !self.players.is_empty() && self.players.values().all(|p| p.finished)
    }

    /// Advances every unfinished player by `dt` seconds, in id order.
    pub fn step(&mut self, dt: f64) -> Vec<MatchEvent> {
        let mut events = Vec::new();
        if self.paused {
            return events;
        }

        for id in std::mem::take(&mut self.pending_jumps) {
            if let Some(player) = self.players.get_mut(&id) {
                if player.finished || !player.cube.try_jump() {
                    debug!("Player {} cannot jump right now", id);
                }
            }
        }

        let spawn = self.spawn_position();
        for player in self.players.values_mut().filter(|p| !p.finished) {
            let mut hooks = StepHooks {
                id: player.id,
                collected: &mut self.collected,
                events: &mut events,
                died: false,
                reached_goal: false,
                coins: 0,
            };
            player.cube.step(&self.level, dt, &mut hooks);
            let (died, reached_goal, coins) = (hooks.died, hooks.reached_goal, hooks.coins);

            player.coins += coins;
            if died {
                player.deaths += 1;
                player.cube.respawn(spawn);
                player.announced = None;
                events.push(MatchEvent::Died { id: player.id });
            } else if reached_goal {
                player.finished = true;
                player.cube.velocity = Vector2D::ZERO;
                player.announced = None;
                info!("Player {} reached the goal", player.id);
                events.push(MatchEvent::Finished { id: player.id });
            }
        }

        self.tick += 1;
        events
    }

    pub fn position_updates(&self) -> Vec<Packet> {
        self.players
            .values()
            .map(|p| Packet::PositionUpdate {
                id: p.id,
                position: p.cube.position,
            })
            .collect()
    }

    /// `BIG_UPDATE`s for players whose motion changed since the last call.
    pub fn take_motion_updates(&mut self) -> Vec<Packet> {
        let mut updates = Vec::new();
        for player in self.players.values_mut() {
            let motion = Motion::of(&player.cube);
            if player.announced == Some(motion) {
                continue;
            }
            player.announced = Some(motion);
            updates.push(Packet::BigUpdate {
                id: player.id,
                velocity: player.cube.velocity,
                acceleration: player.cube.acceleration(),
                jumping: player.cube.jumping,
            });
        }
        updates
    }

    pub fn player_infos(&self) -> Vec<Packet> {
        self.players
            .values()
            .map(|p| Packet::PlayerInfo {
                id: p.id,
                name: p.name.clone(),
                color: p.color(),
            })
            .collect()
    }
}
