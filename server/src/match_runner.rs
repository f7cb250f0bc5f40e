//! Task driving one [`Match`] at a fixed tick rate.
//!
//! The runner first waits for every member to report that it loaded the
//! level, then steps the simulation with an accumulator and broadcasts the
//! resulting state. It is controlled exclusively through [`MatchCommand`]s.

use crate::connection::ConnectionHandle;
use crate::game::Match;
use crate::network::ServerMessage;
use log::{debug, info, warn};
use shared::{Packet, PlayerId};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchCommand {
    Jump(PlayerId),
    RemovePlayer(PlayerId),
    TogglePause(PlayerId),
    Stop,
}

/// Sender side of a running match.
#[derive(Debug, Clone)]
pub struct MatchHandle {
    pub id: u64,
    commands: mpsc::UnboundedSender<MatchCommand>,
}

impl MatchHandle {
    pub fn new(id: u64, commands: mpsc::UnboundedSender<MatchCommand>) -> Self {
        MatchHandle { id, commands }
    }

    /// Returns `false` once the match task has ended.
    pub fn send(&self, command: MatchCommand) -> bool {
        self.commands.send(command).is_ok()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MatchTiming {
    pub tick: Duration,
    pub max_frame_delta: Duration,
    pub ready_poll_interval: Duration,
    pub ready_timeout: Duration,
}

/// Everything the runner needs besides the match itself.
pub struct MatchSetup {
    pub id: u64,
    pub lobby: String,
    pub members: Vec<ConnectionHandle>,
    pub timing: MatchTiming,
    pub events: mpsc::UnboundedSender<ServerMessage>,
}

pub fn spawn(game: Match, setup: MatchSetup) -> MatchHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = MatchHandle::new(setup.id, tx);
    tokio::spawn(run(game, setup, rx));
    handle
}

enum Flow {
    Continue,
    Stop,
}

struct Runner {
    game: Match,
    members: Vec<ConnectionHandle>,
    commands: mpsc::UnboundedReceiver<MatchCommand>,
}

impl Runner {
    fn broadcast(&self, packet: Packet) {
        for member in &self.members {
            member.send(packet.clone());
        }
    }

    fn remove(&mut self, id: PlayerId) {
        self.members.retain(|m| m.id != id);
        self.game.remove_player(id);
    }

    /// Applies every queued command without blocking.
    fn drain_commands(&mut self) -> Flow {
        loop {
            match self.commands.try_recv() {
                Ok(MatchCommand::Jump(id)) => self.game.queue_jump(id),
                Ok(MatchCommand::RemovePlayer(id)) => self.remove(id),
                Ok(MatchCommand::TogglePause(id)) => {
                    let paused = self.game.toggle_pause();
                    info!("Player {} {} the match", id, if paused { "paused" } else { "resumed" });
                    self.broadcast(Packet::MatchPaused { paused });
                }
                Ok(MatchCommand::Stop) => return Flow::Stop,
                Err(mpsc::error::TryRecvError::Empty) => return Flow::Continue,
                Err(mpsc::error::TryRecvError::Disconnected) => return Flow::Stop,
            }
        }
    }

    /// Waits until every member is ready; unready members are dropped on timeout.
    async fn wait_for_ready(&mut self, timing: &MatchTiming) -> Flow {
        let deadline = Instant::now() + timing.ready_timeout;
        loop {
            if let Flow::Stop = self.drain_commands() {
                return Flow::Stop;
            }
            if self.members.iter().all(ConnectionHandle::is_ready) {
                break;
            }
            if Instant::now() >= deadline {
                let unready: Vec<PlayerId> = self
                    .members
                    .iter()
                    .filter(|m| !m.is_ready())
                    .map(|m| m.id)
                    .collect();
                for id in unready {
                    warn!("Player {} did not get ready in time", id);
                    self.remove(id);
                }
                break;
            }
            sleep(timing.ready_poll_interval).await;
        }

        if self.game.is_empty() {
            Flow::Stop
        } else {
            Flow::Continue
        }
    }

    fn broadcast_state(&mut self) {
        for packet in self.game.position_updates() {
            self.broadcast(packet);
        }
        for packet in self.game.take_motion_updates() {
            self.broadcast(packet);
        }
    }
}

async fn run(game: Match, setup: MatchSetup, commands: mpsc::UnboundedReceiver<MatchCommand>) {
    let MatchSetup {
        id,
        lobby,
        members,
        timing,
        events,
    } = setup;
    let mut runner = Runner {
        game,
        members,
        commands,
    };

    info!("Match {} in lobby {} waiting for players", id, lobby);
    if let Flow::Continue = runner.wait_for_ready(&timing).await {
        runner.broadcast(Packet::MatchStarted);
        runner.broadcast_state();
        info!("Match {} started with {} players", id, runner.members.len());
        simulate(&mut runner, &timing).await;
    } else {
        info!("Match {} abandoned before it started", id);
    }

    let _ = events.send(ServerMessage::MatchEnded {
        lobby,
        match_id: id,
    });
}

async fn simulate(runner: &mut Runner, timing: &MatchTiming) {
    let tick = timing.tick;
    let dt = tick.as_secs_f64();
    let mut ticker = interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    // Skip the first tick since it fires immediately
    ticker.tick().await;
    let mut last_update = Instant::now();
    let mut accumulator = Duration::ZERO;

    loop {
        ticker.tick().await;

        let now = Instant::now();
        let mut delta = now - last_update;
        last_update = now;
        if delta > timing.max_frame_delta {
            warn!(
                "Large frame delta ({:.3}s), capping to {:.3}s",
                delta.as_secs_f64(),
                timing.max_frame_delta.as_secs_f64()
            );
            delta = timing.max_frame_delta;
        }

        if let Flow::Stop = runner.drain_commands() {
            info!("Match stopped after {} ticks", runner.game.tick);
            return;
        }
        if runner.game.is_empty() {
            info!("Every player left the match");
            return;
        }
        if runner.game.is_paused() {
            accumulator = Duration::ZERO;
            continue;
        }

        accumulator += delta;
        while accumulator >= tick {
            accumulator -= tick;
            for event in runner.game.step(dt) {
                runner.broadcast(event.to_packet());
            }
            runner.broadcast_state();

            if runner.game.is_finished() {
                let ticks = runner.game.tick;
                info!("Match finished after {} ticks", ticks);
                runner.broadcast(Packet::MatchFinished { ticks });
                return;
            }
        }

        if runner.game.tick % 600 == 0 {
            debug!(
                "Tick {}: {} players",
                runner.game.tick,
                runner.members.len()
            );
        }
    }
}
