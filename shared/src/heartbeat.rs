//! Ping/pong liveness tracking used by both ends of a connection.

use log::debug;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// What the owner should do after an interval tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Beat {
    /// Send a `PING` now; `missed` earlier pings are still unanswered.
    SendPing { missed: u32 },
    /// Too many pings went unanswered.
    Dead,
}

/// Why [`monitor`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    Cancelled,
    TimedOut,
    /// The ping could not be handed to the writer.
    SendFailed,
}

#[derive(Debug, Clone)]
pub struct Heartbeat {
    threshold: u32,
    waiting: bool,
    misses: u32,
}

impl Heartbeat {
    pub fn new(threshold: u32) -> Self {
        Heartbeat {
            threshold,
            waiting: false,
            misses: 0,
        }
    }

    pub fn on_tick(&mut self) -> Beat {
        if self.waiting {
            self.misses += 1;
            if self.misses > self.threshold {
                return Beat::Dead;
            }
        }
        self.waiting = true;
        Beat::SendPing {
            missed: self.misses,
        }
    }

    pub fn on_pong(&mut self) {
        self.waiting = false;
        self.misses = 0;
    }

    pub fn is_waiting(&self) -> bool {
        self.waiting
    }

    pub fn misses(&self) -> u32 {
        self.misses
    }
}

/// Drives a [`Heartbeat`] every `period` until the peer stops answering.
///
/// Pongs arrive on `pongs`; `send_ping` returns `false` when the outbound
/// side is gone.
pub async fn monitor<F>(
    period: Duration,
    threshold: u32,
    mut pongs: mpsc::UnboundedReceiver<()>,
    mut send_ping: F,
    cancel: CancellationToken,
) -> HeartbeatOutcome
where
    F: FnMut() -> bool,
{
    let mut heartbeat = Heartbeat::new(threshold);
    let mut interval = tokio::time::interval(period);
    // The first tick completes immediately; skip it so the peer gets a full period.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return HeartbeatOutcome::Cancelled,
            pong = pongs.recv() => match pong {
                Some(()) => heartbeat.on_pong(),
                None => return HeartbeatOutcome::Cancelled,
            },
            _ = interval.tick() => match heartbeat.on_tick() {
                Beat::SendPing { missed } => {
                    if missed > 0 {
                        debug!("Ping unanswered ({} missed)", missed);
                    }
                    if !send_ping() {
                        return HeartbeatOutcome::SendFailed;
                    }
                }
                Beat::Dead => return HeartbeatOutcome::TimedOut,
            },
        }
    }
}
