use std::io::BufReader;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use super::protocol::{read_message, write_message, Command, Message, ProtocolError};
use crate::config::RetrievalConfig;
use crate::error::{AuthFailure, RetrieveError};
use crate::retriever::status;
use crate::source::RetrievalSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    AuthenticatingUser,
    AuthenticatingPassword,
    Connected,
    Failed,
}

struct Session {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl Session {
    fn exchange(&mut self, message: &Message) -> Result<Message, ProtocolError> {
        write_message(&mut self.writer, message)?;
        read_message(&mut self.reader)
    }
}

/// One authenticated TCP session with an acquisition server.
///
/// Requests are strictly one at a time. A session that drops between
/// requests is re-established on the next request; only a failing
/// handshake surfaces as an error.
pub struct ProtocolClient {
    address: String,
    user: String,
    password: String,
    timeout: Duration,
    cooldown: Duration,
    state: SessionState,
    session: Option<Session>,
    /// When the last handshake failed and the status code it produced.
    last_failure: Option<(Instant, i32)>,
}

impl ProtocolClient {
    /// Build a client for `source`; no connection is made yet.
    pub fn new(source: &RetrievalSource, config: &RetrievalConfig) -> Result<Self, RetrieveError> {
        let machine = source
            .machine
            .as_deref()
            .filter(|m| !m.is_empty())
            .ok_or_else(|| RetrieveError::MalformedSource("no machine name".into()))?;
        Ok(ProtocolClient {
            address: format!("{machine}:{}", source.port_or(config.default_port)),
            user: source.user.clone().unwrap_or_else(|| config.user.clone()),
            password: source.password.clone().unwrap_or_else(|| config.password.clone()),
            timeout: config.timeout(),
            cooldown: config.reconnect_cooldown(),
            state: SessionState::Disconnected,
            session: None,
            last_failure: None,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    /// The sentinel describing why there is no session, or 0 when there is.
    pub fn status_code(&self) -> i32 {
        match self.state {
            SessionState::Connected => 0,
            SessionState::Failed => self
                .last_failure
                .map(|(_, code)| code)
                .unwrap_or(status::SERVER_DOWN),
            _ => status::NOT_CONNECTED,
        }
    }

    /// Open a fresh session and run the user/password handshake.
    pub fn connect(&mut self) -> Result<(), RetrieveError> {
        if let Some((at, code)) = self.last_failure {
            if at.elapsed() < self.cooldown {
                debug!("{}: handshake failed {:?} ago, not retrying yet", self.address, at.elapsed());
                return Err(RetrieveError::from_status(code));
            }
        }
        self.session = None;
        match self.handshake() {
            Ok(session) => {
                info!("{}: session established", self.address);
                self.session = Some(session);
                self.state = SessionState::Connected;
                self.last_failure = None;
                Ok(())
            }
            Err(e) => {
                warn!("{}: connection failed: {e}", self.address);
                self.state = SessionState::Failed;
                self.last_failure = Some((Instant::now(), e.status_code()));
                Err(e)
            }
        }
    }

    fn handshake(&mut self) -> Result<Session, RetrieveError> {
        self.state = SessionState::Connecting;
        let stream = self.open_stream()?;
        let mut session = Session {
            reader: BufReader::new(stream.try_clone()?),
            writer: stream,
        };

        self.state = SessionState::AuthenticatingUser;
        let reply = session
            .exchange(&Command::User(self.user.clone()).into())
            .map_err(transport)?;
        if reply != Message::Ok {
            debug!("{}: user refused with {}", self.address, reply.kind());
            return Err(RetrieveError::Auth(AuthFailure::BadUser));
        }

        self.state = SessionState::AuthenticatingPassword;
        let reply = session
            .exchange(&Command::Password(self.password.clone()).into())
            .map_err(transport)?;
        if reply != Message::Ok {
            debug!("{}: password refused with {}", self.address, reply.kind());
            return Err(RetrieveError::Auth(AuthFailure::BadPassword));
        }
        Ok(session)
    }

    fn open_stream(&self) -> Result<TcpStream, RetrieveError> {
        let addrs = self
            .address
            .to_socket_addrs()
            .map_err(|e| RetrieveError::Transport(format!("resolving {}: {e}", self.address)))?;
        let mut last_error = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(self.timeout))?;
                    stream.set_write_timeout(Some(self.timeout))?;
                    return Ok(stream);
                }
                Err(e) => last_error = Some(e),
            }
        }
        Err(RetrieveError::Transport(match last_error {
            Some(e) => format!("connecting to {}: {e}", self.address),
            None => format!("{} resolved to no address", self.address),
        }))
    }

    /// Send one command and wait for its reply.
    pub fn request(&mut self, command: Command) -> Result<Message, RetrieveError> {
        let message: Message = command.into();
        let reused = self.session.is_some();
        if !reused {
            self.connect()?;
        }
        match self.exchange(&message) {
            Ok(reply) => Ok(reply),
            Err(e) if reused => {
                info!("{}: session dropped ({e}), reconnecting", self.address);
                self.connect()?;
                self.exchange(&message).map_err(|e| self.lose_session(e))
            }
            Err(e) => Err(self.lose_session(e)),
        }
    }

    fn exchange(&mut self, message: &Message) -> Result<Message, ProtocolError> {
        let Some(session) = self.session.as_mut() else {
            return Err(ProtocolError::Closed);
        };
        if let Message::Command(text) = message {
            debug!("{} <- {text}", self.address);
        }
        let reply = session.exchange(message);
        match &reply {
            Ok(Message::Exit) => {
                self.session = None;
                return Err(ProtocolError::Closed);
            }
            Ok(reply) => debug!("{} -> {}", self.address, reply.kind()),
            Err(_) => self.session = None,
        }
        reply
    }

    fn lose_session(&mut self, e: ProtocolError) -> RetrieveError {
        self.session = None;
        self.state = SessionState::Failed;
        self.last_failure = None;
        transport(e)
    }

    /// Tell the server the session is over and close the stream.
    pub fn shutdown(&mut self) {
        if let Some(mut session) = self.session.take() {
            if let Err(e) = write_message(&mut session.writer, &Message::Exit) {
                debug!("{}: exit not delivered: {e}", self.address);
            }
            info!("{}: session closed", self.address);
        }
        self.state = SessionState::Disconnected;
    }
}

impl Drop for ProtocolClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn transport(e: ProtocolError) -> RetrieveError {
    RetrieveError::Transport(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn needs_a_machine() {
        let source = RetrievalSource::parse(";6088;me;pw;").unwrap();
        assert!(matches!(
            ProtocolClient::new(&source, &RetrievalConfig::default()),
            Err(RetrieveError::MalformedSource(_))
        ));
    }

    #[test]
    fn fills_in_defaults_and_starts_disconnected() {
        let source = RetrievalSource::parse("das.example;;;").unwrap();
        let client = ProtocolClient::new(&source, &RetrievalConfig::default()).unwrap();
        assert_eq!(client.address(), "das.example:6088");
        assert_eq!(client.state(), SessionState::Disconnected);
        assert_eq!(client.status_code(), status::NOT_CONNECTED);
    }
}
