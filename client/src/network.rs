use crate::game::ClientGameState;
use crate::input::{parse_line, Intent, HELP};
use log::{debug, info, warn};
use shared::heartbeat::{Beat, Heartbeat};
use shared::protocol::{decode_frame, encode_frame};
use shared::{CubeConfig, Packet, HEARTBEAT_INTERVAL_MS, HEARTBEAT_MISS_THRESHOLD, TICK_RATE};
use std::io;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server: String,
    pub retry_interval: Duration,
    pub heartbeat_interval: Duration,
    pub heartbeat_threshold: u32,
    pub tick_rate: u32,
    pub cube: CubeConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: format!("127.0.0.1:{}", shared::DEFAULT_PORT),
            retry_interval: Duration::from_secs(2),
            heartbeat_interval: Duration::from_millis(HEARTBEAT_INTERVAL_MS),
            heartbeat_threshold: HEARTBEAT_MISS_THRESHOLD,
            tick_rate: TICK_RATE,
            cube: CubeConfig::default(),
        }
    }
}

/// How a session with the server ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// The user asked to leave; do not reconnect.
    Exit,
    /// The connection broke; reconnect.
    Lost(String),
}

pub struct Client {
    config: ClientConfig,
    game: ClientGameState,
    cancel: CancellationToken,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        let game = ClientGameState::new(config.cube);
        Client {
            config,
            game,
            cancel: CancellationToken::new(),
        }
    }

    /// Cancelling the token logs out and stops [`Client::run`].
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn game(&self) -> &ClientGameState {
        &self.game
    }

    /// Connects, plays until the link breaks and reconnects, until the user exits.
    pub async fn run<R>(&mut self, input: R) -> Result<(), Box<dyn std::error::Error>>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut input = input.lines();
        loop {
            let Some(stream) =
                connect_with_retry(&self.config.server, self.config.retry_interval, &self.cancel)
                    .await
            else {
                return Ok(());
            };

            match self.session(stream, &mut input).await {
                SessionEnd::Exit => {
                    info!("Logged out");
                    return Ok(());
                }
                SessionEnd::Lost(reason) => {
                    warn!("Connection lost: {}", reason);
                    println!("Connection lost, reconnecting...");
                    self.game.reset();
                }
            }
        }
    }

    /// Runs one connection: server packets, typed lines, heartbeat and prediction.
    pub async fn session<R>(&mut self, stream: TcpStream, input: &mut Lines<R>) -> SessionEnd
    where
        R: AsyncBufRead + Unpin,
    {
        let (read_half, mut writer) = stream.into_split();
        let mut server_reader = BufReader::new(read_half);
        let mut server_buf = Vec::new();

        let mut heartbeat = Heartbeat::new(self.config.heartbeat_threshold);
        let mut heartbeat_interval = interval(self.config.heartbeat_interval);
        heartbeat_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        heartbeat_interval.tick().await;

        let tick = Duration::from_secs_f64(1.0 / self.config.tick_rate.max(1) as f64);
        let mut physics_interval = interval(tick);
        physics_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_frame = Instant::now();

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    let _ = send_packet(&mut writer, &Packet::Logout).await;
                    return SessionEnd::Exit;
                }

                read = server_reader.read_until(b'\n', &mut server_buf) => match read {
                    Ok(0) => return SessionEnd::Lost("server closed the connection".into()),
                    Ok(_) => match String::from_utf8(std::mem::take(&mut server_buf)) {
                        Ok(line) => {
                            if let Err(e) = self.handle_line(&line, &mut heartbeat, &mut writer).await {
                                return SessionEnd::Lost(e.to_string());
                            }
                        }
                        Err(e) => warn!("Dropping non UTF-8 line from server: {}", e),
                    },
                    Err(e) => return SessionEnd::Lost(e.to_string()),
                },

                line = input.next_line() => {
                    let line = match line {
                        Ok(Some(line)) => line,
                        Ok(None) => {
                            debug!("Input closed, logging out");
                            let _ = send_packet(&mut writer, &Packet::Logout).await;
                            return SessionEnd::Exit;
                        }
                        Err(e) => {
                            warn!("Error reading input: {}", e);
                            continue;
                        }
                    };
                    match parse_line(&line) {
                        Intent::Send(packet) => {
                            if let Err(e) = send_packet(&mut writer, &packet).await {
                                return SessionEnd::Lost(e.to_string());
                            }
                        }
                        Intent::Exit => {
                            let _ = send_packet(&mut writer, &Packet::Logout).await;
                            return SessionEnd::Exit;
                        }
                        Intent::Usage(usage) => println!("Usage: {}", usage),
                        Intent::Unknown(command) => println!("Unknown command /{}\n{}", command, HELP),
                        Intent::Nothing => {}
                    }
                },

                _ = heartbeat_interval.tick() => match heartbeat.on_tick() {
                    Beat::SendPing { missed } => {
                        if missed > 0 {
                            debug!("Server missed {} heartbeat(s)", missed);
                        }
                        if let Err(e) = send_packet(&mut writer, &Packet::Ping).await {
                            return SessionEnd::Lost(e.to_string());
                        }
                    }
                    Beat::Dead => return SessionEnd::Lost("heartbeat timed out".into()),
                },

                _ = physics_interval.tick() => {
                    let now = Instant::now();
                    let dt = now.duration_since(last_frame).as_secs_f64();
                    last_frame = now;
                    self.game.predict(dt);
                }
            }
        }
    }

    async fn handle_line(
        &mut self,
        line: &str,
        heartbeat: &mut Heartbeat,
        writer: &mut OwnedWriteHalf,
    ) -> io::Result<()> {
        let packet = match decode_frame(line) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("Dropping malformed line from server: {}", e);
                return Ok(());
            }
        };
        if packet == Packet::Pong {
            heartbeat.on_pong();
            return Ok(());
        }

        let reaction = self.game.apply(&packet);
        if let Some(message) = reaction.message {
            println!("{}", message);
        }
        if let Some(reply) = reaction.reply {
            send_packet(writer, &reply).await?;
        }
        Ok(())
    }
}

async fn send_packet(writer: &mut OwnedWriteHalf, packet: &Packet) -> io::Result<()> {
    let frame =
        encode_frame(packet).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writer.write_all(frame.as_bytes()).await
}

/// Keeps dialling `addr` every `retry` until it answers.
///
/// Returns `None` only if `cancel` fires first.
pub async fn connect_with_retry(
    addr: &str,
    retry: Duration,
    cancel: &CancellationToken,
) -> Option<TcpStream> {
    loop {
        info!("Connecting to {}...", addr);
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                info!("Connected to {}", addr);
                return Some(stream);
            }
            Err(e) => warn!("Could not reach {}: {}, retrying in {:?}", addr, e, retry),
        }

        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = sleep(retry) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, DuplexStream};
    use tokio::net::TcpListener;
    use tokio::time::timeout;
    use tokio_test::assert_ok;

    fn quick_config(addr: String) -> ClientConfig {
        ClientConfig {
            server: addr,
            retry_interval: Duration::from_millis(20),
            heartbeat_interval: Duration::from_millis(50),
            ..ClientConfig::default()
        }
    }

    async fn read_packet<R: AsyncBufRead + Unpin>(lines: &mut Lines<R>) -> Packet {
        let line = timeout(Duration::from_secs(2), lines.next_line())
            .await
            .expect("server side timed out")
            .unwrap()
            .expect("client closed the connection");
        decode_frame(&line).unwrap()
    }

    /// A listener, a connected client stream and the server's end of it.
    async fn connected_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, server)
    }

    fn keyboard() -> (DuplexStream, Lines<BufReader<DuplexStream>>) {
        let (typing, reading) = duplex(1024);
        (typing, BufReader::new(reading).lines())
    }

    #[tokio::test]
    async fn test_session_answers_ping_and_reports_ready() {
        let (client_stream, server_stream) = connected_pair().await;
        let (_typing, mut input) = keyboard();
        let mut client = Client::new(quick_config(String::new()));

        let mut level = shared::levels::load(
            shared::levels::DEFAULT_LEVEL,
            shared::BLOCK_WIDTH,
            shared::ColorMode::Deferred,
        )
        .unwrap()
        .unwrap();
        let blocks = level.flood_fill(&mut rand::thread_rng());

        let server = tokio::spawn(async move {
            let (read, mut write) = server_stream.into_split();
            let mut lines = BufReader::new(read).lines();
            for packet in [
                Packet::Welcome {
                    id: 3,
                    name: "guest-3".into(),
                },
                Packet::Ping,
                Packet::MatchStarting {
                    level: shared::levels::DEFAULT_LEVEL.into(),
                },
                Packet::CriticalBlocks { blocks },
            ] {
                write
                    .write_all(encode_frame(&packet).unwrap().as_bytes())
                    .await
                    .unwrap();
            }

            let mut seen = Vec::new();
            while seen.len() < 2 {
                match read_packet(&mut lines).await {
                    Packet::Ping => {
                        write
                            .write_all(encode_frame(&Packet::Pong).unwrap().as_bytes())
                            .await
                            .unwrap();
                    }
                    other => seen.push(other),
                }
            }
            seen
        });

        tokio::select! {
            end = client.session(client_stream, &mut input) => {
                panic!("session ended early: {:?}", end);
            }
            seen = server => {
                assert_eq!(seen.unwrap(), vec![Packet::Pong, Packet::Ready]);
            }
        }
    }

    #[tokio::test]
    async fn test_typed_commands_are_sent_and_exit_logs_out() {
        let (client_stream, server_stream) = connected_pair().await;
        let (mut typing, mut input) = keyboard();
        let mut client = Client::new(quick_config(String::new()));

        assert_ok!(
            typing
                .write_all(b"/create alpha secret\nhello lobby\n/bogus\n/exit\n")
                .await
        );

        let end = timeout(Duration::from_secs(2), client.session(client_stream, &mut input))
            .await
            .unwrap();
        assert_eq!(end, SessionEnd::Exit);

        let mut lines = BufReader::new(server_stream).lines();
        let mut received = Vec::new();
        loop {
            let packet = read_packet(&mut lines).await;
            if packet == Packet::Ping {
                continue;
            }
            received.push(packet.clone());
            if packet == Packet::Logout {
                break;
            }
        }
        assert_eq!(
            received,
            vec![
                Packet::CreateLobby {
                    name: "alpha".into(),
                    password: "secret".into()
                },
                Packet::ChatLobby {
                    text: "hello lobby".into()
                },
                Packet::Logout,
            ]
        );
    }

    #[tokio::test]
    async fn test_invalid_utf8_from_server_is_skipped() {
        let (client_stream, server_stream) = connected_pair().await;
        let (_typing, mut input) = keyboard();
        let mut client = Client::new(quick_config(String::new()));

        let server = tokio::spawn(async move {
            let (read, mut write) = server_stream.into_split();
            let mut bytes = vec![0xFF, 0xFE, b'\n'];
            bytes.extend_from_slice(encode_frame(&Packet::Ping).unwrap().as_bytes());
            write.write_all(&bytes).await.unwrap();

            let mut lines = BufReader::new(read).lines();
            loop {
                if read_packet(&mut lines).await == Packet::Pong {
                    return;
                }
            }
        });

        tokio::select! {
            end = client.session(client_stream, &mut input) => {
                panic!("session ended early: {:?}", end);
            }
            answered = server => assert_ok!(answered),
        }
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let (client_stream, _server_stream) = connected_pair().await;
        let (_typing, mut input) = keyboard();
        let mut client = Client::new(ClientConfig {
            heartbeat_interval: Duration::from_millis(20),
            heartbeat_threshold: 1,
            ..quick_config(String::new())
        });

        let end = timeout(Duration::from_secs(2), client.session(client_stream, &mut input))
            .await
            .unwrap();
        assert_eq!(end, SessionEnd::Lost("heartbeat timed out".into()));
    }

    #[tokio::test]
    async fn test_closed_server_ends_session() {
        let (client_stream, server_stream) = connected_pair().await;
        let (_typing, mut input) = keyboard();
        let mut client = Client::new(quick_config(String::new()));
        drop(server_stream);

        let end = timeout(Duration::from_secs(2), client.session(client_stream, &mut input))
            .await
            .unwrap();
        assert!(matches!(end, SessionEnd::Lost(_)));
    }

    #[tokio::test]
    async fn test_connect_with_retry_waits_for_server() {
        let vacant = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = vacant.local_addr().unwrap();
        drop(vacant);

        let cancel = CancellationToken::new();
        let dialer = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                connect_with_retry(&addr.to_string(), Duration::from_millis(20), &cancel).await
            })
        };

        sleep(Duration::from_millis(100)).await;
        let listener = TcpListener::bind(addr).await.unwrap();
        let (_accepted, _) = timeout(Duration::from_secs(2), listener.accept())
            .await
            .unwrap()
            .unwrap();

        let stream = dialer.await.unwrap();
        assert!(stream.is_some());
    }

    #[tokio::test]
    async fn test_connect_with_retry_cancelled() {
        let vacant = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = vacant.local_addr().unwrap();
        drop(vacant);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let stream = connect_with_retry(&addr.to_string(), Duration::from_secs(60), &cancel).await;
        assert!(stream.is_none());
    }
}
