//! One-shot handshake that connects a freshly started target to the front
//! end.
//!
//! The target asks a long-lived rendezvous server for the port of the
//! pending session (`get-session-port`), connects there, asks for its agent
//! settings (`get-debugger`) and then speaks the framed protocol on the same
//! socket.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{Ipv4Addr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::debugger::AgentSettings;
use crate::error::ProtocolError;
use crate::protocol::{encode, FramedReader};

pub const SESSION_PORT_REQUEST: &[u8] = b"get-session-port";
pub const DEBUGGER_REQUEST: &[u8] = b"get-debugger";
pub const NO_SESSION: &[u8] = b"no-session";

/// Longest rendezvous reply a target accepts.
const MAX_REPLY: usize = 128;
/// Pause between accept attempts while waiting for the target.
const ACCEPT_POLL: Duration = Duration::from_millis(20);

/// Long-lived server answering `get-session-port`.
///
/// Each offered session port is handed out once; later requests are told
/// `no-session` and run undebugged.
pub struct Rendezvous {
    port: u16,
    next_session: Arc<Mutex<Option<u16>>>,
}

impl Rendezvous {
    /// Listen on `port` (0 picks a free one) and serve requests on a
    /// background thread.
    pub fn start(port: u16) -> io::Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, port))?;
        let port = listener.local_addr()?.port();
        let next_session = Arc::new(Mutex::new(None));
        let pending = Arc::clone(&next_session);

        thread::spawn(move || {
            for stream in listener.incoming() {
                match stream {
                    Ok(stream) => {
                        if let Err(e) = answer_port_request(stream, &pending) {
                            warn!(error = %e, "Rendezvous request failed");
                        }
                    }
                    Err(e) => warn!(error = %e, "Rendezvous accept failed"),
                }
            }
        });
        info!(port, "Rendezvous server listening");

        Ok(Self { port, next_session })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Hand `session_port` to the next target that asks.
    pub fn offer(&self, session_port: u16) {
        *self
            .next_session
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(session_port);
    }
}

fn answer_port_request(mut stream: TcpStream, pending: &Mutex<Option<u16>>) -> io::Result<()> {
    let mut request = Vec::with_capacity(SESSION_PORT_REQUEST.len());
    (&stream)
        .take(SESSION_PORT_REQUEST.len() as u64)
        .read_to_end(&mut request)?;
    if request != SESSION_PORT_REQUEST {
        warn!(
            request = %String::from_utf8_lossy(&request),
            "Expected \"get-session-port\" request, ignoring"
        );
        return Ok(());
    }

    let port = pending
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
    match port {
        Some(port) => {
            debug!(port, "Starting debug session");
            stream.write_all(format!("{}\n", port).as_bytes())
        }
        None => {
            debug!("No debugging session active, telling target to continue");
            stream.write_all(NO_SESSION)
        }
    }
}

/// Listener for the agent connection of one session.
pub struct SessionListener {
    listener: TcpListener,
}

impl SessionListener {
    pub fn bind() -> io::Result<Self> {
        Ok(Self {
            listener: TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?,
        })
    }

    pub fn port(&self) -> io::Result<u16> {
        Ok(self.listener.local_addr()?.port())
    }

    /// Wait for the target, answer its `get-debugger` request with
    /// `settings` and return the socket ready for the framed protocol.
    /// Connections that open with anything else are dropped.
    ///
    /// `alive` is polled while no connection is pending. Its error ends the
    /// wait.
    pub fn accept<F>(
        &self,
        settings: &AgentSettings,
        mut alive: F,
    ) -> Result<TcpStream, ProtocolError>
    where
        F: FnMut() -> io::Result<()>,
    {
        self.listener.set_nonblocking(true)?;
        loop {
            let (mut stream, peer) = match self.listener.accept() {
                Ok(accepted) => accepted,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    alive()?;
                    thread::sleep(ACCEPT_POLL);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            stream.set_nonblocking(false)?;
            debug!(%peer, "Session listener accepted connection");

            let mut request = [0u8; DEBUGGER_REQUEST.len()];
            if let Err(e) = stream.read_exact(&mut request) {
                warn!(error = %e, "Connection closed before requesting the debugger");
                continue;
            }
            if request != DEBUGGER_REQUEST {
                warn!(
                    request = %String::from_utf8_lossy(&request),
                    "Expected \"get-debugger\" request, ignoring connection"
                );
                continue;
            }

            stream.write_all(&encode(settings)?)?;
            stream.flush()?;
            return Ok(stream);
        }
    }
}

/// Target side of a bootstrapped session.
pub struct AgentConnection {
    pub reader: FramedReader<TcpStream>,
    pub writer: TcpStream,
    pub settings: AgentSettings,
}

/// Run the target half of the handshake against the rendezvous server at
/// `port`. Every failure means "run without debugging" and yields `None`.
pub fn attach(port: u16) -> Option<AgentConnection> {
    let session_port = match request_session_port(port) {
        Ok(Some(session_port)) => session_port,
        Ok(None) => {
            info!("No debugging session active, continuing without debugging");
            return None;
        }
        Err(e) => {
            warn!(port, error = %e, "Couldn't get debugging session port, continuing without debugging");
            return None;
        }
    };

    match open_session(session_port) {
        Ok(connection) => Some(connection),
        Err(e) => {
            warn!(
                port = session_port,
                error = %e,
                "Couldn't connect to debugging session, continuing without debugging"
            );
            None
        }
    }
}

fn request_session_port(port: u16) -> io::Result<Option<u16>> {
    let mut socket = TcpStream::connect((Ipv4Addr::LOCALHOST, port))?;
    socket.write_all(SESSION_PORT_REQUEST)?;

    // The reply ends with a newline, or with the server closing the socket.
    let mut reply = Vec::new();
    BufReader::new((&socket).take(MAX_REPLY as u64)).read_until(b'\n', &mut reply)?;
    let text = String::from_utf8_lossy(&reply);
    let text = text.trim_end();
    if text.as_bytes() == NO_SESSION {
        return Ok(None);
    }
    text.parse::<u16>()
        .map(Some)
        .map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("invalid session port {:?}", text),
            )
        })
}

fn open_session(port: u16) -> io::Result<AgentConnection> {
    let mut writer = TcpStream::connect((Ipv4Addr::LOCALHOST, port))?;
    writer.write_all(DEBUGGER_REQUEST)?;
    let mut reader = FramedReader::new(writer.try_clone()?);

    let payload = reader.read_frame()?.ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "session closed before sending agent settings",
        )
    })?;
    let settings = match serde_json::from_slice(&payload) {
        Ok(settings) => settings,
        Err(e) => {
            warn!(error = %e, "Unreadable agent settings, using defaults");
            AgentSettings::default()
        }
    };
    info!(port, trace = settings.trace, "Attached to debug session");

    Ok(AgentConnection {
        reader,
        writer,
        settings,
    })
}
