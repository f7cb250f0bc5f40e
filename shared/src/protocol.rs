//! Line-based wire protocol.
//!
//! A frame is one command per line: the command name followed by its
//! arguments, joined by [`SEPARATOR`], with the whole line passed through
//! [`obfuscate`] (ROT47 over printable ASCII). Every command has a fixed
//! arity; lines whose argument count does not match are rejected.

use crate::color::Color;
use crate::level::{CriticalBlock, GridIndex};
use crate::vector::Vector2D;
use crate::PlayerId;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const SEPARATOR: char = '§';

/// Separator inside list arguments such as [`Packet::LobbyList`].
pub const LIST_SEPARATOR: char = ',';

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("empty line")]
    Empty,
    #[error("unknown command `{0}`")]
    UnknownCommand(String),
    #[error("{command} expects {expected} argument(s), got {found}")]
    Arity {
        command: CommandKind,
        expected: usize,
        found: usize,
    },
    #[error("bad argument `{argument}` for {command}")]
    BadArgument {
        command: CommandKind,
        argument: String,
    },
    #[error("argument `{0}` contains a reserved character")]
    ReservedCharacter(String),
}

/// Which side may send a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ToServer,
    ToClient,
    Both,
}

macro_rules! commands {
    ($($kind:ident => $name:literal, $arity:literal, $dir:ident;)*) => {
        /// Every command of the protocol.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum CommandKind {
            $($kind,)*
        }

        impl CommandKind {
            pub const ALL: &'static [CommandKind] = &[$(CommandKind::$kind,)*];

            pub fn name(self) -> &'static str {
                match self {
                    $(CommandKind::$kind => $name,)*
                }
            }

            pub fn arity(self) -> usize {
                match self {
                    $(CommandKind::$kind => $arity,)*
                }
            }

            pub fn direction(self) -> Direction {
                match self {
                    $(CommandKind::$kind => Direction::$dir,)*
                }
            }
        }

        impl FromStr for CommandKind {
            type Err = ProtocolError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok(CommandKind::$kind),)*
                    other => Err(ProtocolError::UnknownCommand(other.to_string())),
                }
            }
        }
    };
}

commands! {
    SetUsername => "SET_USERNAME", 1, ToServer;
    ChatLobby => "CHAT_LOBBY", 1, ToServer;
    ChatBroadcast => "CHAT_BROADCAST", 1, ToServer;
    ChatWhisper => "CHAT_WHISPER", 2, ToServer;
    Logout => "LOGOUT", 0, ToServer;
    CreateLobby => "CREATE_LOBBY", 2, ToServer;
    JoinLobby => "JOIN_LOBBY", 2, ToServer;
    LeaveLobby => "LEAVE_LOBBY", 0, ToServer;
    Ready => "READY", 0, ToServer;
    SpaceBarPressed => "SPACE_BAR_PRESSED", 0, ToServer;
    TogglePause => "TOGGLE_PAUSE", 0, ToServer;
    RequestLobbyList => "REQUEST_LOBBY_LIST", 0, ToServer;
    RequestClientList => "REQUEST_CLIENT_LIST", 0, ToServer;
    Ping => "PING", 0, Both;
    Pong => "PONG", 0, Both;
    Welcome => "WELCOME", 2, ToClient;
    UsernameAccepted => "USERNAME_ACCEPTED", 1, ToClient;
    UsernameTaken => "USERNAME_TAKEN", 1, ToClient;
    DeliverBroadcast => "DELIVER_BROADCAST", 2, ToClient;
    DeliverWhisper => "DELIVER_WHISPER", 2, ToClient;
    DeliverLobby => "DELIVER_LOBBY", 2, ToClient;
    ServerNotice => "SERVER_NOTICE", 1, ToClient;
    LobbyJoined => "LOBBY_JOINED", 1, ToClient;
    LobbyRejected => "LOBBY_REJECTED", 1, ToClient;
    LobbyLeft => "LOBBY_LEFT", 0, ToClient;
    LobbyList => "LOBBY_LIST", 1, ToClient;
    ClientList => "CLIENT_LIST", 1, ToClient;
    MatchStarting => "MATCH_STARTING", 1, ToClient;
    PlayerInfo => "PLAYER_INFO", 3, ToClient;
    CriticalBlocks => "CRITICAL_BLOCKS", 1, ToClient;
    MatchStarted => "MATCH_STARTED", 0, ToClient;
    PositionUpdate => "POSITION_UPDATE", 3, ToClient;
    BigUpdate => "BIG_UPDATE", 6, ToClient;
    PlayerDied => "PLAYER_DIED", 1, ToClient;
    CoinCollected => "COIN_COLLECTED", 3, ToClient;
    PlayerFinished => "PLAYER_FINISHED", 1, ToClient;
    MatchPaused => "MATCH_PAUSED", 1, ToClient;
    MatchFinished => "MATCH_FINISHED", 1, ToClient;
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    // client -> server
    SetUsername { name: String },
    ChatLobby { text: String },
    ChatBroadcast { text: String },
    ChatWhisper { target: String, text: String },
    Logout,
    CreateLobby { name: String, password: String },
    JoinLobby { name: String, password: String },
    LeaveLobby,
    Ready,
    SpaceBarPressed,
    TogglePause,
    RequestLobbyList,
    RequestClientList,

    Ping,
    Pong,

    // server -> client
    Welcome { id: PlayerId, name: String },
    UsernameAccepted { name: String },
    UsernameTaken { name: String },
    DeliverBroadcast { from: String, text: String },
    DeliverWhisper { from: String, text: String },
    DeliverLobby { from: String, text: String },
    ServerNotice { text: String },
    LobbyJoined { name: String },
    LobbyRejected { reason: String },
    LobbyLeft,
    LobbyList { names: Vec<String> },
    ClientList { names: Vec<String> },
    MatchStarting { level: String },
    PlayerInfo { id: PlayerId, name: String, color: Color },
    CriticalBlocks { blocks: Vec<CriticalBlock> },
    MatchStarted,
    PositionUpdate { id: PlayerId, position: Vector2D },
    BigUpdate {
        id: PlayerId,
        velocity: Vector2D,
        acceleration: Vector2D,
        jumping: bool,
    },
    PlayerDied { id: PlayerId },
    CoinCollected { id: PlayerId, cell: GridIndex },
    PlayerFinished { id: PlayerId },
    MatchPaused { paused: bool },
    MatchFinished { ticks: u64 },
}

impl Packet {
    pub fn kind(&self) -> CommandKind {
        match self {
            Packet::SetUsername { .. } => CommandKind::SetUsername,
            Packet::ChatLobby { .. } => CommandKind::ChatLobby,
            Packet::ChatBroadcast { .. } => CommandKind::ChatBroadcast,
            Packet::ChatWhisper { .. } => CommandKind::ChatWhisper,
            Packet::Logout => CommandKind::Logout,
            Packet::CreateLobby { .. } => CommandKind::CreateLobby,
            Packet::JoinLobby { .. } => CommandKind::JoinLobby,
            Packet::LeaveLobby => CommandKind::LeaveLobby,
            Packet::Ready => CommandKind::Ready,
            Packet::SpaceBarPressed => CommandKind::SpaceBarPressed,
            Packet::TogglePause => CommandKind::TogglePause,
            Packet::RequestLobbyList => CommandKind::RequestLobbyList,
            Packet::RequestClientList => CommandKind::RequestClientList,
            Packet::Ping => CommandKind::Ping,
            Packet::Pong => CommandKind::Pong,
            Packet::Welcome { .. } => CommandKind::Welcome,
            Packet::UsernameAccepted { .. } => CommandKind::UsernameAccepted,
            Packet::UsernameTaken { .. } => CommandKind::UsernameTaken,
            Packet::DeliverBroadcast { .. } => CommandKind::DeliverBroadcast,
            Packet::DeliverWhisper { .. } => CommandKind::DeliverWhisper,
            Packet::DeliverLobby { .. } => CommandKind::DeliverLobby,
            Packet::ServerNotice { .. } => CommandKind::ServerNotice,
            Packet::LobbyJoined { .. } => CommandKind::LobbyJoined,
            Packet::LobbyRejected { .. } => CommandKind::LobbyRejected,
            Packet::LobbyLeft => CommandKind::LobbyLeft,
            Packet::LobbyList { .. } => CommandKind::LobbyList,
            Packet::ClientList { .. } => CommandKind::ClientList,
            Packet::MatchStarting { .. } => CommandKind::MatchStarting,
            Packet::PlayerInfo { .. } => CommandKind::PlayerInfo,
            Packet::CriticalBlocks { .. } => CommandKind::CriticalBlocks,
            Packet::MatchStarted => CommandKind::MatchStarted,
            Packet::PositionUpdate { .. } => CommandKind::PositionUpdate,
            Packet::BigUpdate { .. } => CommandKind::BigUpdate,
            Packet::PlayerDied { .. } => CommandKind::PlayerDied,
            Packet::CoinCollected { .. } => CommandKind::CoinCollected,
            Packet::PlayerFinished { .. } => CommandKind::PlayerFinished,
            Packet::MatchPaused { .. } => CommandKind::MatchPaused,
            Packet::MatchFinished { .. } => CommandKind::MatchFinished,
        }
    }

    fn arguments(&self) -> Vec<String> {
        match self {
            Packet::SetUsername { name }
            | Packet::UsernameAccepted { name }
            | Packet::UsernameTaken { name }
            | Packet::LobbyJoined { name } => vec![name.clone()],
            Packet::ChatLobby { text }
            | Packet::ChatBroadcast { text }
            | Packet::ServerNotice { text } => vec![text.clone()],
            Packet::ChatWhisper { target, text } => vec![target.clone(), text.clone()],
            Packet::CreateLobby { name, password } | Packet::JoinLobby { name, password } => {
                vec![name.clone(), password.clone()]
            }
            Packet::Logout
            | Packet::LeaveLobby
            | Packet::Ready
            | Packet::SpaceBarPressed
            | Packet::TogglePause
            | Packet::RequestLobbyList
            | Packet::RequestClientList
            | Packet::Ping
            | Packet::Pong
            | Packet::LobbyLeft
            | Packet::MatchStarted => Vec::new(),
            Packet::Welcome { id, name } => vec![id.to_string(), name.clone()],
            Packet::DeliverBroadcast { from, text }
            | Packet::DeliverWhisper { from, text }
            | Packet::DeliverLobby { from, text } => vec![from.clone(), text.clone()],
            Packet::LobbyRejected { reason } => vec![reason.clone()],
            Packet::LobbyList { names } | Packet::ClientList { names } => {
                vec![names.join(&LIST_SEPARATOR.to_string())]
            }
            Packet::MatchStarting { level } => vec![level.clone()],
            Packet::PlayerInfo { id, name, color } => {
                vec![id.to_string(), name.clone(), color.to_string()]
            }
            Packet::CriticalBlocks { blocks } => vec![CriticalBlock::encode_list(blocks)],
            Packet::PositionUpdate { id, position } => {
                vec![id.to_string(), position.x.to_string(), position.y.to_string()]
            }
            Packet::BigUpdate {
                id,
                velocity,
                acceleration,
                jumping,
            } => vec![
                id.to_string(),
                velocity.x.to_string(),
                velocity.y.to_string(),
                acceleration.x.to_string(),
                acceleration.y.to_string(),
                jumping.to_string(),
            ],
            Packet::PlayerDied { id } | Packet::PlayerFinished { id } => vec![id.to_string()],
            Packet::CoinCollected { id, cell } => {
                vec![id.to_string(), cell.0.to_string(), cell.1.to_string()]
            }
            Packet::MatchPaused { paused } => vec![paused.to_string()],
            Packet::MatchFinished { ticks } => vec![ticks.to_string()],
        }
    }
}

/// ROT47 over `'!'..='~'`; every other character passes through.
///
/// Applying it twice yields the input.
pub fn obfuscate(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '!'..='~' => (b'!' + (c as u8 - b'!' + 47) % 94) as char,
            other => other,
        })
        .collect()
}

/// Plain (not obfuscated) line for `packet`, without terminator.
pub fn encode(packet: &Packet) -> Result<String, ProtocolError> {
    let kind = packet.kind();
    let arguments = packet.arguments();
    for argument in &arguments {
        if argument.contains([SEPARATOR, '\n', '\r']) {
            return Err(ProtocolError::ReservedCharacter(argument.clone()));
        }
    }
    if let Packet::LobbyList { names } | Packet::ClientList { names } = packet {
        if let Some(bad) = names.iter().find(|n| n.contains(LIST_SEPARATOR)) {
            return Err(ProtocolError::ReservedCharacter(bad.clone()));
        }
        // An empty entry would not survive the trip: "" decodes as no entries.
        if names.iter().any(String::is_empty) {
            return Err(ProtocolError::BadArgument {
                command: kind,
                argument: String::new(),
            });
        }
    }

    let mut line = kind.name().to_string();
    for argument in arguments {
        line.push(SEPARATOR);
        line.push_str(&argument);
    }
    Ok(line)
}

/// Parses a plain line into a packet, validating command and arity.
pub fn decode(line: &str) -> Result<Packet, ProtocolError> {
    if line.is_empty() {
        return Err(ProtocolError::Empty);
    }
    let mut tokens = line.split(SEPARATOR);
    let kind: CommandKind = tokens.next().unwrap_or_default().parse()?;
    let args: Vec<&str> = tokens.collect();
    if args.len() != kind.arity() {
        return Err(ProtocolError::Arity {
            command: kind,
            expected: kind.arity(),
            found: args.len(),
        });
    }

    let text = |i: usize| args[i].to_string();
    let parse = |i: usize| Parsed { kind, raw: args[i] };

    let packet = match kind {
        CommandKind::SetUsername => Packet::SetUsername { name: text(0) },
        CommandKind::ChatLobby => Packet::ChatLobby { text: text(0) },
        CommandKind::ChatBroadcast => Packet::ChatBroadcast { text: text(0) },
        CommandKind::ChatWhisper => Packet::ChatWhisper {
            target: text(0),
            text: text(1),
        },
        CommandKind::Logout => Packet::Logout,
        CommandKind::CreateLobby => Packet::CreateLobby {
            name: text(0),
            password: text(1),
        },
        CommandKind::JoinLobby => Packet::JoinLobby {
            name: text(0),
            password: text(1),
        },
        CommandKind::LeaveLobby => Packet::LeaveLobby,
        CommandKind::Ready => Packet::Ready,
        CommandKind::SpaceBarPressed => Packet::SpaceBarPressed,
        CommandKind::TogglePause => Packet::TogglePause,
        CommandKind::RequestLobbyList => Packet::RequestLobbyList,
        CommandKind::RequestClientList => Packet::RequestClientList,
        CommandKind::Ping => Packet::Ping,
        CommandKind::Pong => Packet::Pong,
        CommandKind::Welcome => Packet::Welcome {
            id: parse(0).value()?,
            name: text(1),
        },
        CommandKind::UsernameAccepted => Packet::UsernameAccepted { name: text(0) },
        CommandKind::UsernameTaken => Packet::UsernameTaken { name: text(0) },
        CommandKind::DeliverBroadcast => Packet::DeliverBroadcast {
            from: text(0),
            text: text(1),
        },
        CommandKind::DeliverWhisper => Packet::DeliverWhisper {
            from: text(0),
            text: text(1),
        },
        CommandKind::DeliverLobby => Packet::DeliverLobby {
            from: text(0),
            text: text(1),
        },
        CommandKind::ServerNotice => Packet::ServerNotice { text: text(0) },
        CommandKind::LobbyJoined => Packet::LobbyJoined { name: text(0) },
        CommandKind::LobbyRejected => Packet::LobbyRejected { reason: text(0) },
        CommandKind::LobbyLeft => Packet::LobbyLeft,
        CommandKind::LobbyList => Packet::LobbyList {
            names: split_list(args[0]),
        },
        CommandKind::ClientList => Packet::ClientList {
            names: split_list(args[0]),
        },
        CommandKind::MatchStarting => Packet::MatchStarting { level: text(0) },
        CommandKind::PlayerInfo => Packet::PlayerInfo {
            id: parse(0).value()?,
            name: text(1),
            color: parse(2).value()?,
        },
        CommandKind::CriticalBlocks => Packet::CriticalBlocks {
            blocks: CriticalBlock::decode_list(args[0]).map_err(|_| parse(0).error())?,
        },
        CommandKind::MatchStarted => Packet::MatchStarted,
        CommandKind::PositionUpdate => Packet::PositionUpdate {
            id: parse(0).value()?,
            position: Vector2D::new(parse(1).value()?, parse(2).value()?),
        },
        CommandKind::BigUpdate => Packet::BigUpdate {
            id: parse(0).value()?,
            velocity: Vector2D::new(parse(1).value()?, parse(2).value()?),
            acceleration: Vector2D::new(parse(3).value()?, parse(4).value()?),
            jumping: parse(5).value()?,
        },
        CommandKind::PlayerDied => Packet::PlayerDied {
            id: parse(0).value()?,
        },
        CommandKind::CoinCollected => Packet::CoinCollected {
            id: parse(0).value()?,
            cell: (parse(1).value()?, parse(2).value()?),
        },
        CommandKind::PlayerFinished => Packet::PlayerFinished {
            id: parse(0).value()?,
        },
        CommandKind::MatchPaused => Packet::MatchPaused {
            paused: parse(0).value()?,
        },
        CommandKind::MatchFinished => Packet::MatchFinished {
            ticks: parse(0).value()?,
        },
    };
    Ok(packet)
}

/// Obfuscated, newline-terminated frame ready for the socket.
pub fn encode_frame(packet: &Packet) -> Result<String, ProtocolError> {
    let mut frame = obfuscate(&encode(packet)?);
    frame.push('\n');
    Ok(frame)
}

/// Decodes one received line (terminator optional).
pub fn decode_frame(line: &str) -> Result<Packet, ProtocolError> {
    decode(&obfuscate(line.trim_end_matches(['\r', '\n'])))
}

struct Parsed<'a> {
    kind: CommandKind,
    raw: &'a str,
}

impl Parsed<'_> {
    fn value<T: FromStr>(&self) -> Result<T, ProtocolError> {
        self.raw.parse().map_err(|_| self.error())
    }

    fn error(&self) -> ProtocolError {
        ProtocolError::BadArgument {
            command: self.kind,
            argument: self.raw.to_string(),
        }
    }
}

fn split_list(raw: &str) -> Vec<String> {
    if raw.is_empty() {
        return Vec::new();
    }
    raw.split(LIST_SEPARATOR).map(str::to_string).collect()
}
