//! Cooperative session variant. All async sessions run as tasks on the
//! shared reactor; every I/O primitive is a suspension point and the stop
//! token cancels pending work at any of them.

use std::io;
use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{lookup_host, TcpStream};
use tokio_native_tls::TlsStream;
use tokio_tungstenite::{client_async_with_config, WebSocketStream};
use tracing::debug;
use tungstenite::Message;

use super::{
    report_reconnect, ws_config, ConnectError, ConnectStage, SessionChannels, SessionConfig,
    UA_ASYNC,
};
use crate::backoff::Backoff;
use crate::stop::StopSignal;

type WsStream = WebSocketStream<TlsStream<TcpStream>>;

enum ReadOutcome {
    Stopped,
    Failed(tungstenite::Error),
}

pub struct AsyncSession {
    cfg: SessionConfig,
    chan: SessionChannels,
    stop: StopSignal,
    reconnects: u64,
}

impl AsyncSession {
    pub fn new(cfg: SessionConfig, chan: SessionChannels, stop: StopSignal) -> Self {
        Self {
            cfg,
            chan,
            stop,
            reconnects: 0,
        }
    }

    /// Connect / read / back off until stopped. Transient failures never
    /// escape; each one prints a single reconnect line.
    pub async fn run(mut self) {
        let mut backoff = Backoff::new();
        loop {
            if self.stop.is_stopped() {
                break;
            }

            let connected = tokio::select! {
                _ = self.stop.cancelled() => break,
                result = fast_connect(&self.cfg) => result,
            };

            match connected {
                Ok(ws) => {
                    backoff.reset();
                    match self.read_loop(ws).await {
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

            tokio::select! {
                _ = self.stop.cancelled() => break,
                _ = tokio::time::sleep(backoff.next()) => {}
            }
        }

        debug!(
            session = self.cfg.index,
            reconnects = self.reconnects,
            raw_drops = self.chan.raw_drops(),
            latency_drops = self.chan.latency_drops(),
            "async session finished"
        );
    }

    async fn read_loop(&mut self, ws: WsStream) -> ReadOutcome {
        let (mut sink, mut stream) = ws.split();
        loop {
            let item = tokio::select! {
                _ = self.stop.cancelled() => return ReadOutcome::Stopped,
                item = stream.next() => item,
            };
            match item {
                Some(Ok(Message::Text(text))) => self.chan.on_payload(text.as_bytes()),
                Some(Ok(Message::Binary(data))) => self.chan.on_payload(&data),
                Some(Ok(Message::Ping(payload))) => {
                    if sink.send(Message::Pong(payload)).await.is_err() {
                        return ReadOutcome::Failed(tungstenite::Error::ConnectionClosed);
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    return ReadOutcome::Failed(tungstenite::Error::ConnectionClosed)
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return ReadOutcome::Failed(e),
            }
        }
    }
}

/// The ordered low-latency connect sequence:
/// resolve -> TCP connect -> TLS/SNI setup -> TCP_NODELAY -> TLS handshake
/// -> WebSocket configure -> WebSocket handshake.
async fn fast_connect(cfg: &SessionConfig) -> Result<WsStream, ConnectError> {
    let addrs: Vec<SocketAddr> = lookup_host((cfg.host.as_str(), cfg.port))
        .await
        .map_err(|e| ConnectError::new(ConnectStage::Resolve, e))?
        .collect();

    let mut last_err: Option<io::Error> = None;
    let mut tcp = None;
    for addr in &addrs {
        match TcpStream::connect(addr).await {
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
                io::Error::new(io::ErrorKind::NotFound, "resolver returned no endpoints")
            }),
        )
    })?;

    // SNI comes from the host name; the connector verifies the peer against
    // the system trust store.
    let tls = native_tls::TlsConnector::new()
        .map_err(|e| ConnectError::new(ConnectStage::Sni, e))?;
    let connector = tokio_native_tls::TlsConnector::from(tls);

    let _ = tcp.set_nodelay(true);

    let tls_stream = connector
        .connect(&cfg.host, tcp)
        .await
        .map_err(|e| ConnectError::new(ConnectStage::Handshake, e))?;

    let request = cfg.client_request(UA_ASYNC)?;
    let (ws, _response) = client_async_with_config(request, tls_stream, Some(ws_config()))
        .await
        .map_err(|e| ConnectError::new(ConnectStage::WsHandshake, e))?;

    Ok(ws)
}
