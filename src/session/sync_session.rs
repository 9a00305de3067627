//! Blocking session variant. One dedicated OS thread per session; the read
//! deadline is the only thing that interrupts a blocking read, and it exists
//! solely to re-check the stop signal.

use std::io::{self, ErrorKind};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Instant;

use native_tls::TlsStream;
use tracing::debug;
use tungstenite::handshake::HandshakeError;
use tungstenite::{Message, WebSocket};

use super::{
    report_reconnect, ws_config, ConnectError, ConnectStage, SessionChannels, SessionConfig,
    CONNECT_DEADLINE, READ_DEADLINE, UA_SYNC,
};
use crate::backoff::Backoff;
use crate::stop::StopSignal;

type WsSocket = WebSocket<TlsStream<TcpStream>>;

enum ReadOutcome {
    Stopped,
    Failed(tungstenite::Error),
}

pub struct SyncSession {
    cfg: SessionConfig,
    chan: SessionChannels,
    stop: StopSignal,
    reconnects: u64,
}

impl SyncSession {
    pub fn new(cfg: SessionConfig, chan: SessionChannels, stop: StopSignal) -> Self {
        Self {
            cfg,
            chan,
            stop,
            reconnects: 0,
        }
    }

    pub fn run(mut self) {
        let mut backoff = Backoff::new();
        loop {
            if self.stop.is_stopped() {
                break;
            }

            match self.fast_connect() {
                Ok(mut ws) => {
                    backoff.reset();
                    match self.read_loop(&mut ws) {
                        ReadOutcome::Stopped => break,
                        ReadOutcome::Failed(e) => {
                            self.reconnects += 1;
                            report_reconnect(self.cfg.index, &format_args!("read error: {e}"));
                        }
                    }
                }
                Err(e) => {
                    self.reconnects += 1;
                    report_reconnect(self.cfg.index, &e);
                }
            }

            if !self.wait_backoff(backoff.next()) {
                break;
            }
        }

        debug!(
            session = self.cfg.index,
            reconnects = self.reconnects,
            raw_drops = self.chan.raw_drops(),
            latency_drops = self.chan.latency_drops(),
            "sync session finished"
        );
    }

    /// Same staged sequence as the async variant, with blocking primitives.
    /// Socket deadlines are generous during connect (a dead peer must not
    /// pin shutdown) and tighten to [`READ_DEADLINE`] for the read loop.
    fn fast_connect(&self) -> Result<WsSocket, ConnectError> {
        let addrs: Vec<_> = (self.cfg.host.as_str(), self.cfg.port)
            .to_socket_addrs()
            .map_err(|e| ConnectError::new(ConnectStage::Resolve, e))?
            .collect();

        let mut last_err: Option<io::Error> = None;
        let mut tcp = None;
        for addr in &addrs {
            match TcpStream::connect_timeout(addr, CONNECT_DEADLINE) {
                Ok(stream) => {
                    tcp = Some(stream);
                    break;
                }
                Err(e) => last_err = Some(e),
            }
        }
        let tcp = tcp.ok_or_else(|| {
            ConnectError::new(
                ConnectStage::Connect,
                last_err.unwrap_or_else(|| {
                    io::Error::new(ErrorKind::NotFound, "resolver returned no endpoints")
                }),
            )
        })?;

        tcp.set_read_timeout(Some(CONNECT_DEADLINE))
            .map_err(|e| ConnectError::new(ConnectStage::Connect, e))?;
        tcp.set_write_timeout(Some(CONNECT_DEADLINE))
            .map_err(|e| ConnectError::new(ConnectStage::Connect, e))?;

        let connector = native_tls::TlsConnector::new()
            .map_err(|e| ConnectError::new(ConnectStage::Sni, e))?;

        let _ = tcp.set_nodelay(true);

        let tls_stream = connector
            .connect(&self.cfg.host, tcp)
            .map_err(|e| match e {
                native_tls::HandshakeError::Failure(err) => {
                    ConnectError::new(ConnectStage::Handshake, err)
                }
                native_tls::HandshakeError::WouldBlock(_) => ConnectError::new(
                    ConnectStage::Handshake,
                    io::Error::new(ErrorKind::TimedOut, "TLS handshake timed out"),
                ),
            })?;

        let request = self.cfg.client_request(UA_SYNC)?;
        let (ws, _response) =
            tungstenite::client::client_with_config(request, tls_stream, Some(ws_config()))
                .map_err(|e| match e {
                    HandshakeError::Failure(err) => {
                        ConnectError::new(ConnectStage::WsHandshake, err)
                    }
                    HandshakeError::Interrupted(_) => ConnectError::new(
                        ConnectStage::WsHandshake,
                        io::Error::new(ErrorKind::TimedOut, "WebSocket handshake timed out"),
                    ),
                })?;

        // Deadline tightening reuses the configure tag: the taxonomy has no
        // post-handshake stage, and this is the only configure-tagged
        // failure that can occur after ws_handshake.
        ws.get_ref()
            .get_ref()
            .set_read_timeout(Some(READ_DEADLINE))
            .map_err(|e| ConnectError::new(ConnectStage::Configure, e))?;

        Ok(ws)
    }

    fn read_loop(&mut self, ws: &mut WsSocket) -> ReadOutcome {
        loop {
            if self.stop.is_stopped() {
                return ReadOutcome::Stopped;
            }
            match ws.read() {
                Ok(Message::Text(text)) => self.chan.on_payload(text.as_bytes()),
                Ok(Message::Binary(data)) => self.chan.on_payload(&data),
                Ok(Message::Ping(payload)) => {
                    if ws.send(Message::Pong(payload)).is_err() {
                        return ReadOutcome::Failed(tungstenite::Error::ConnectionClosed);
                    }
                }
                Ok(Message::Close(_)) => {
                    return ReadOutcome::Failed(tungstenite::Error::ConnectionClosed)
                }
                Ok(_) => {}
                // Deadline tick, not a failure: loop to re-check stop.
                Err(tungstenite::Error::Io(e))
                    if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {}
                Err(e) => return ReadOutcome::Failed(e),
            }
        }
    }

    /// Chunked, cancellable backoff sleep. Returns false once stopped.
    fn wait_backoff(&self, dur: std::time::Duration) -> bool {
        let deadline = Instant::now() + dur;
        loop {
            if self.stop.is_stopped() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep((deadline - now).min(std::time::Duration::from_millis(50)));
        }
    }
}
