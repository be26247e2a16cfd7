//! Text handshake run over reliable packets before a connection enters
//! its game phase.
//!
//! ```text
//! client                                  server
//!   on connect ── Request:ServerInfo ───►
//!              ◄── Response:ServerInfo ──
//!                  Name:<server>
//!   enter game ── Request:JoinGame ─────►
//!                 Name:<player>           enter game
//! ```

use crate::codec::{unpack, TextMessage};
use crate::error::{ConnectionError, ConnectionResult};

use super::Role;

const REQUEST: &str = "Request";
const RESPONSE: &str = "Response";
const NAME: &str = "Name";
const SERVER_INFO: &str = "ServerInfo";
const JOIN_GAME: &str = "JoinGame";

/// What to do after a handshake message.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HandshakeStep {
    /// Message to send back reliably.
    pub reply: Option<TextMessage>,
    /// Whether the connection moves to its game phase.
    pub enter_game: bool,
}

/// Handshake state of one connection.
#[derive(Clone, Debug)]
pub struct Handshake {
    role: Role,
    /// Server name on a server, player name on a client.
    local_name: String,
    /// Name the other end announced.
    remote_name: Option<String>,
}

impl Handshake {
    /// Creates the handshake for one end.
    #[must_use]
    pub fn new(role: Role, local_name: impl Into<String>) -> Self {
        Self {
            role,
            local_name: local_name.into(),
            remote_name: None,
        }
    }

    /// Name the other end announced, once known.
    #[must_use]
    pub fn remote_name(&self) -> Option<&str> {
        self.remote_name.as_deref()
    }

    /// Decodes a reliable packet.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Handshake`] for a packet that isn't a text
    /// message.
    pub fn decode(data: &[u8]) -> ConnectionResult<TextMessage> {
        let mut message = TextMessage::default();
        unpack(&mut message, data)
            .map_err(|error| ConnectionError::Handshake(format!("malformed message: {error}")))?;
        Ok(message)
    }

    /// First message, sent by the client as soon as the link is up.
    #[must_use]
    pub fn on_connect(&self) -> Option<TextMessage> {
        match self.role {
            Role::Client => Some(TextMessage::from_pairs([(REQUEST, SERVER_INFO)])),
            Role::Server => None,
        }
    }

    /// Handles one message from the other end.
    pub fn on_message(&mut self, message: &TextMessage) -> HandshakeStep {
        let tokens = message.tokens();
        let name = tokens.get(NAME).cloned();

        match self.role {
            Role::Server => match tokens.get(REQUEST).map(String::as_str) {
                Some(SERVER_INFO) => HandshakeStep {
                    reply: Some(TextMessage::from_pairs([
                        (RESPONSE, SERVER_INFO),
                        (NAME, self.local_name.as_str()),
                    ])),
                    enter_game: false,
                },
                Some(JOIN_GAME) => {
                    tracing::info!("{} joining", name.as_deref().unwrap_or("unnamed player"));
                    self.remote_name = name;
                    HandshakeStep {
                        reply: None,
                        enter_game: true,
                    }
                }
                other => {
                    tracing::debug!("Ignoring handshake request {:?}", other);
                    HandshakeStep::default()
                }
            },
            Role::Client => match tokens.get(RESPONSE).map(String::as_str) {
                Some(SERVER_INFO) => {
                    for (key, value) in &tokens {
                        tracing::debug!("{}:{}", key, value);
                    }
                    self.remote_name = name;
                    HandshakeStep {
                        reply: Some(TextMessage::from_pairs([
                            (REQUEST, JOIN_GAME),
                            (NAME, self.local_name.as_str()),
                        ])),
                        enter_game: true,
                    }
                }
                other => {
                    tracing::debug!("Ignoring handshake response {:?}", other);
                    HandshakeStep::default()
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::pack;

    #[test]
    fn test_full_exchange() {
        let mut server = Handshake::new(Role::Server, "arena-01");
        let mut client = Handshake::new(Role::Client, "Anonymous");
        assert_eq!(server.on_connect(), None);

        let request = client.on_connect().unwrap();
        assert_eq!(request.text, "Request:ServerInfo\n");

        let info = server.on_message(&request);
        assert!(!info.enter_game);
        let info = info.reply.unwrap();
        assert_eq!(info.text, "Response:ServerInfo\nName:arena-01\n");

        let join = client.on_message(&info);
        assert!(join.enter_game);
        assert_eq!(client.remote_name(), Some("arena-01"));
        let join = join.reply.unwrap();
        assert_eq!(join.text, "Request:JoinGame\nName:Anonymous\n");

        let done = server.on_message(&join);
        assert_eq!(
            done,
            HandshakeStep {
                reply: None,
                enter_game: true
            }
        );
        assert_eq!(server.remote_name(), Some("Anonymous"));
    }

    #[test]
    fn test_unexpected_messages_ignored() {
        let mut server = Handshake::new(Role::Server, "arena-01");
        let mut client = Handshake::new(Role::Client, "Anonymous");

        let response = TextMessage::from_pairs([(RESPONSE, SERVER_INFO)]);
        assert_eq!(server.on_message(&response), HandshakeStep::default());

        let request = TextMessage::from_pairs([(REQUEST, JOIN_GAME)]);
        assert_eq!(client.on_message(&request), HandshakeStep::default());

        let unknown = TextMessage::from_pairs([(REQUEST, "Teleport")]);
        assert_eq!(server.on_message(&unknown), HandshakeStep::default());
    }

    #[test]
    fn test_decode() {
        let mut message = TextMessage::from_pairs([(REQUEST, SERVER_INFO)]);
        let mut buffer = [0u8; 64];
        let len = pack(&mut message, &mut buffer).unwrap();
        assert_eq!(Handshake::decode(&buffer[..len]).unwrap(), message);

        assert!(matches!(Handshake::decode(&[0xFF]), Err(ConnectionError::Handshake(_))));
    }
}
