//! Per-client TCP endpoint.
//!
//! Every accepted socket gets three tasks: a reader that decodes inbound
//! lines, a writer that drains the outbound queue, and a heartbeat that
//! pings the peer. All three stop when the connection's cancellation token
//! fires. Anything the hub must act on is reported as a [`ServerMessage`].

use crate::network::ServerMessage;
use log::{debug, error, warn};
use shared::heartbeat::{self, HeartbeatOutcome};
use shared::protocol::{decode_frame, encode_frame};
use shared::{Packet, PlayerId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Queue feeding a connection's writer task.
pub type Outbound = mpsc::UnboundedSender<Packet>;

/// Handle the hub and match tasks use to reach one connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: PlayerId,
    pub outbound: Outbound,
    /// Set once the client reports it finished loading a match.
    pub ready: Arc<AtomicBool>,
    pub cancel: CancellationToken,
}

impl ConnectionHandle {
    /// A handle together with the receiving end of its outbound queue.
    pub fn channel(id: PlayerId) -> (Self, mpsc::UnboundedReceiver<Packet>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let handle = ConnectionHandle {
            id,
            outbound,
            ready: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
        };
        (handle, rx)
    }

    /// Queues `packet`; returns `false` once the writer is gone.
    pub fn send(&self, packet: Packet) -> bool {
        self.outbound.send(packet).is_ok()
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn close(&self) {
        self.cancel.cancel();
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HeartbeatSettings {
    pub interval: Duration,
    pub threshold: u32,
}

/// Starts the reader, writer and heartbeat tasks for `stream`.
pub fn spawn(
    id: PlayerId,
    stream: TcpStream,
    events: mpsc::UnboundedSender<ServerMessage>,
    heartbeat: HeartbeatSettings,
) -> ConnectionHandle {
    let (handle, outbound_rx) = ConnectionHandle::channel(id);
    let (read_half, write_half) = stream.into_split();
    let (pong_tx, pong_rx) = mpsc::unbounded_channel();

    tokio::spawn(run_reader(
        id,
        read_half,
        handle.outbound.clone(),
        pong_tx,
        events.clone(),
        handle.cancel.clone(),
    ));
    tokio::spawn(run_writer(
        id,
        write_half,
        outbound_rx,
        events.clone(),
        handle.cancel.clone(),
    ));

    let outbound = handle.outbound.clone();
    let cancel = handle.cancel.clone();
    tokio::spawn(async move {
        let outcome = heartbeat::monitor(
            heartbeat.interval,
            heartbeat.threshold,
            pong_rx,
            move || outbound.send(Packet::Ping).is_ok(),
            cancel,
        )
        .await;
        if outcome == HeartbeatOutcome::TimedOut {
            warn!("Client {} stopped answering pings", id);
            let _ = events.send(ServerMessage::HeartbeatTimeout { id });
        }
    });

    handle
}

async fn run_reader(
    id: PlayerId,
    read_half: OwnedReadHalf,
    outbound: Outbound,
    pongs: mpsc::UnboundedSender<()>,
    events: mpsc::UnboundedSender<ServerMessage>,
    cancel: CancellationToken,
) {
    let mut reader = BufReader::new(read_half);
    let mut buf = Vec::new();

    let reason = loop {
        let read = tokio::select! {
            _ = cancel.cancelled() => return,
            read = reader.read_until(b'\n', &mut buf) => read,
        };

        match read {
            Ok(0) => break "connection closed".to_string(),
            Ok(_) => {
                let line = match String::from_utf8(std::mem::take(&mut buf)) {
                    Ok(line) => line,
                    Err(e) => {
                        warn!("Dropping non UTF-8 line from client {}: {}", id, e);
                        continue;
                    }
                };
                match decode_frame(&line) {
                    Ok(Packet::Ping) => {
                        let _ = outbound.send(Packet::Pong);
                    }
                    Ok(Packet::Pong) => {
                        let _ = pongs.send(());
                    }
                    Ok(packet) => {
                        if events
                            .send(ServerMessage::PacketReceived { id, packet })
                            .is_err()
                        {
                            error!("Hub is gone, dropping client {}", id);
                            return;
                        }
                    }
                    Err(e) => warn!("Dropping line from client {}: {}", id, e),
                }
            }
            Err(e) => break format!("read error: {}", e),
        }
    };

    let _ = events.send(ServerMessage::Disconnected { id, reason });
}

async fn run_writer(
    id: PlayerId,
    mut write_half: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<Packet>,
    events: mpsc::UnboundedSender<ServerMessage>,
    cancel: CancellationToken,
) {
    loop {
        let packet = tokio::select! {
            _ = cancel.cancelled() => break,
            packet = outbound.recv() => match packet {
                Some(packet) => packet,
                None => break,
            },
        };

        let frame = match encode_frame(&packet) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Not sending {} to client {}: {}", packet.kind(), id, e);
                continue;
            }
        };
        if let Err(e) = write_half.write_all(frame.as_bytes()).await {
            let _ = events.send(ServerMessage::Disconnected {
                id,
                reason: format!("write error: {}", e),
            });
            break;
        }
    }

    // Flush whatever was queued before the close, e.g. a farewell notice.
    while let Ok(packet) = outbound.try_recv() {
        if let Ok(frame) = encode_frame(&packet) {
            if write_half.write_all(frame.as_bytes()).await.is_err() {
                break;
            }
        }
    }
    let _ = write_half.shutdown().await;
    debug!("Writer for client {} stopped", id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;
    use tokio_test::assert_ok;

    async fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (server, client)
    }

    fn quiet_heartbeat() -> HeartbeatSettings {
        HeartbeatSettings {
            interval: Duration::from_secs(3600),
            threshold: 3,
        }
    }

    #[test]
    fn test_handle_ready_flag_is_shared() {
        let (handle, _rx) = ConnectionHandle::channel(1);
        let copy = handle.clone();
        assert!(!copy.is_ready());
        handle.set_ready(true);
        assert!(copy.is_ready());
    }

    #[tokio::test]
    async fn test_send_fails_after_receiver_dropped() {
        let (handle, rx) = ConnectionHandle::channel(1);
        assert!(handle.send(Packet::Ping));
        drop(rx);
        assert!(!handle.send(Packet::Ping));
    }

    #[tokio::test]
    async fn test_reader_forwards_packets_and_answers_pings() {
        let (server, mut client) = socket_pair().await;
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let handle = spawn(7, server, events_tx, quiet_heartbeat());

        let mut frames = encode_frame(&Packet::Ping).unwrap();
        frames.push_str(&encode_frame(&Packet::Ready).unwrap());
        frames.push_str("garbage\n");
        assert_ok!(client.write_all(frames.as_bytes()).await);

        match events_rx.recv().await.unwrap() {
            ServerMessage::PacketReceived { id, packet } => {
                assert_eq!(id, 7);
                assert_eq!(packet, Packet::Ready);
            }
            other => panic!("Unexpected message: {:?}", other),
        }

        let expected = encode_frame(&Packet::Pong).unwrap();
        let mut buf = vec![0u8; expected.len()];
        assert_ok!(client.read_exact(&mut buf).await);
        assert_eq!(String::from_utf8(buf).unwrap(), expected);

        handle.close();
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_keeps_connection() {
        let (server, mut client) = socket_pair().await;
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let handle = spawn(5, server, events_tx, quiet_heartbeat());

        let mut bytes = vec![0xFF, 0xFE, b'\n'];
        bytes.extend_from_slice(encode_frame(&Packet::Ready).unwrap().as_bytes());
        assert_ok!(client.write_all(&bytes).await);

        match events_rx.recv().await.unwrap() {
            ServerMessage::PacketReceived { id, packet } => {
                assert_eq!(id, 5);
                assert_eq!(packet, Packet::Ready);
            }
            other => panic!("Unexpected message: {:?}", other),
        }

        handle.close();
    }

    #[tokio::test]
    async fn test_peer_close_reports_disconnect() {
        let (server, client) = socket_pair().await;
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let _handle = spawn(3, server, events_tx, quiet_heartbeat());

        drop(client);

        match events_rx.recv().await.unwrap() {
            ServerMessage::Disconnected { id, .. } => assert_eq!(id, 3),
            other => panic!("Unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_silent_peer_times_out() {
        let (server, _client) = socket_pair().await;
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let heartbeat = HeartbeatSettings {
            interval: Duration::from_millis(20),
            threshold: 3,
        };
        let _handle = spawn(5, server, events_tx, heartbeat);

        let message = tokio::time::timeout(Duration::from_secs(2), events_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(message, ServerMessage::HeartbeatTimeout { id: 5 }));
    }
}
