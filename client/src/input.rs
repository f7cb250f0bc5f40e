//! Chat-line input: slash commands map to protocol commands, anything else
//! is a lobby message.

use shared::Packet;

/// What a typed line asks the client to do.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    Send(Packet),
    Exit,
    /// The command exists but its arguments are missing.
    Usage(&'static str),
    Unknown(String),
    Nothing,
}

pub const HELP: &str = "\
/name <name>  /all <text>  /w <target> <text>
/create <lobby> [password]  /join <lobby> [password]  /leave
/ready  /jump  /pause  /lobbies  /clients  /exit";

pub fn parse_line(line: &str) -> Intent {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Intent::Nothing;
    }
    let Some(command) = line.strip_prefix('/') else {
        return Intent::Send(Packet::ChatLobby {
            text: line.to_string(),
        });
    };

    let (name, rest) = match command.split_once(' ') {
        Some((name, rest)) => (name, rest.trim()),
        None => (command, ""),
    };

    let packet = match name {
        "exit" => return Intent::Exit,
        "name" => {
            if rest.is_empty() {
                return Intent::Usage("/name <name>");
            }
            Packet::SetUsername {
                name: rest.to_string(),
            }
        }
        "all" => {
            if rest.is_empty() {
                return Intent::Usage("/all <text>");
            }
            Packet::ChatBroadcast {
                text: rest.to_string(),
            }
        }
        "w" => match rest.split_once(' ') {
            Some((target, text)) if !text.trim().is_empty() => Packet::ChatWhisper {
                target: target.to_string(),
                text: text.trim().to_string(),
            },
            _ => return Intent::Usage("/w <target> <text>"),
        },
        "create" | "join" => {
            let mut parts = rest.splitn(2, ' ');
            let lobby = parts.next().unwrap_or_default().to_string();
            let password = parts.next().unwrap_or_default().trim().to_string();
            if lobby.is_empty() {
                return Intent::Usage(if name == "create" {
                    "/create <lobby> [password]"
                } else {
                    "/join <lobby> [password]"
                });
            }
            if name == "create" {
                Packet::CreateLobby {
                    name: lobby,
                    password,
                }
            } else {
                Packet::JoinLobby {
                    name: lobby,
                    password,
                }
            }
        }
        "leave" => Packet::LeaveLobby,
        "ready" => Packet::Ready,
        "jump" => Packet::SpaceBarPressed,
        "pause" => Packet::TogglePause,
        "lobbies" => Packet::RequestLobbyList,
        "clients" => Packet::RequestClientList,
        other => return Intent::Unknown(other.to_string()),
    };
    Intent::Send(packet)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_lobby_chat() {
        assert_eq!(
            parse_line("hello there\n"),
            Intent::Send(Packet::ChatLobby {
                text: "hello there".into()
            })
        );
        assert_eq!(parse_line("   "), Intent::Nothing);
    }

    #[test]
    fn test_chat_commands() {
        assert_eq!(
            parse_line("/all hi everyone"),
            Intent::Send(Packet::ChatBroadcast {
                text: "hi everyone".into()
            })
        );
        assert_eq!(
            parse_line("/w bob see you at the goal"),
            Intent::Send(Packet::ChatWhisper {
                target: "bob".into(),
                text: "see you at the goal".into()
            })
        );
        assert_eq!(parse_line("/w bob"), Intent::Usage("/w <target> <text>"));
        assert_eq!(
            parse_line("/name ann"),
            Intent::Send(Packet::SetUsername { name: "ann".into() })
        );
        assert_eq!(parse_line("/name"), Intent::Usage("/name <name>"));
    }

    #[test]
    fn test_lobby_commands() {
        assert_eq!(
            parse_line("/create alpha secret"),
            Intent::Send(Packet::CreateLobby {
                name: "alpha".into(),
                password: "secret".into()
            })
        );
        assert_eq!(
            parse_line("/join alpha"),
            Intent::Send(Packet::JoinLobby {
                name: "alpha".into(),
                password: String::new()
            })
        );
        assert!(matches!(parse_line("/join"), Intent::Usage(_)));
        assert_eq!(parse_line("/leave"), Intent::Send(Packet::LeaveLobby));
        assert_eq!(parse_line("/ready"), Intent::Send(Packet::Ready));
    }

    #[test]
    fn test_game_and_meta_commands() {
        assert_eq!(parse_line("/jump"), Intent::Send(Packet::SpaceBarPressed));
        assert_eq!(parse_line("/pause"), Intent::Send(Packet::TogglePause));
        assert_eq!(parse_line("/lobbies"), Intent::Send(Packet::RequestLobbyList));
        assert_eq!(parse_line("/clients"), Intent::Send(Packet::RequestClientList));
        assert_eq!(parse_line("/exit"), Intent::Exit);
        assert_eq!(parse_line("/fly away"), Intent::Unknown("fly".into()));
    }
}
