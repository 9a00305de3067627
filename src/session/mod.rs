//! WebSocket session state machine: `Connecting -> Reading -> Backoff ->
//! Connecting`, until the stop signal trips.
//!
//! Two interchangeable schedulers exist over the same connect sequence and
//! ring contracts:
//! - [`async_session::AsyncSession`]: cooperative task on the shared
//!   reactor, suspending at every I/O primitive
//! - [`sync_session::SyncSession`]: dedicated thread, blocking I/O, a 200 ms
//!   read deadline used solely to re-check the stop signal
//!
//! The connect sequence is staged so a failure reports exactly where it
//! happened: resolve, TCP connect, SNI/TLS setup, TLS handshake, WebSocket
//! configuration, WebSocket handshake. TCP_NODELAY goes on before the TLS
//! handshake; the client request never offers permessage-deflate.

pub mod async_session;
pub mod sync_session;

use std::fmt;
use std::time::Duration;

use tracing::warn;
use tungstenite::client::IntoClientRequest;
use tungstenite::handshake::client::Request;
use tungstenite::http::header::USER_AGENT;
use tungstenite::http::HeaderValue;
use tungstenite::protocol::WebSocketConfig;

use crate::clock;
use crate::latency::LatencyEvent;
use crate::ring::RingProducer;
use crate::wire;

pub const UA_ASYNC: &str = concat!("tickfan/async/", env!("CARGO_PKG_VERSION"));
pub const UA_SYNC: &str = concat!("tickfan/sync/", env!("CARGO_PKG_VERSION"));

/// Initial byte capacity of a payload slot. A slot that sees a larger
/// message grows once and keeps the larger capacity through recycling.
pub const RAW_SLOT_BYTES: usize = 4_096;

/// Sync-variant read deadline inside the read loop.
pub const READ_DEADLINE: Duration = Duration::from_millis(200);

/// Sync-variant socket deadline during connect stages. Equal to the backoff
/// cap so a dead peer cannot pin shutdown.
pub const CONNECT_DEADLINE: Duration = Duration::from_secs(5);

/// Connect-sequence stages, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStage {
    Resolve,
    Connect,
    Sni,
    Handshake,
    Configure,
    WsHandshake,
}

impl ConnectStage {
    pub fn tag(self) -> &'static str {
        match self {
            Self::Resolve => "resolve",
            Self::Connect => "connect",
            Self::Sni => "sni",
            Self::Handshake => "handshake",
            Self::Configure => "configure",
            Self::WsHandshake => "ws_handshake",
        }
    }
}

impl fmt::Display for ConnectStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// A connect-sequence failure carrying the stage it happened in.
#[derive(Debug, thiserror::Error)]
#[error("{stage} error: {source}")]
pub struct ConnectError {
    pub stage: ConnectStage,
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
}

impl ConnectError {
    pub fn new(
        stage: ConnectStage,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            stage,
            source: source.into(),
        }
    }
}

/// Static per-session parameters.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub index: usize,
    pub host: String,
    pub port: u16,
    pub target: String,
}

impl SessionConfig {
    /// Builds the opening-handshake request: endpoint URI plus the fixed
    /// identification header. No extension headers, so compression is never
    /// negotiated.
    pub(crate) fn client_request(&self, user_agent: &'static str) -> Result<Request, ConnectError> {
        let endpoint = format!("wss://{}:{}{}", self.host, self.port, self.target);
        let mut request = endpoint
            .into_client_request()
            .map_err(|e| ConnectError::new(ConnectStage::Configure, e))?;
        request
            .headers_mut()
            .insert(USER_AGENT, HeaderValue::from_static(user_agent));
        Ok(request)
    }
}

/// Frame limits shared by both variants.
pub(crate) fn ws_config() -> WebSocketConfig {
    WebSocketConfig {
        max_message_size: Some(16 * 1024 * 1024),
        max_frame_size: Some(4 * 1024 * 1024),
        accept_unmasked_frames: false,
        ..Default::default()
    }
}

/// Producer ends owned by one session, plus its drop counters.
pub struct SessionChannels {
    pub raw: RingProducer<Vec<u8>>,
    pub latency: RingProducer<LatencyEvent>,
    raw_drops: u64,
    latency_drops: u64,
}

impl SessionChannels {
    pub fn new(raw: RingProducer<Vec<u8>>, latency: RingProducer<LatencyEvent>) -> Self {
        Self {
            raw,
            latency,
            raw_drops: 0,
            latency_drops: 0,
        }
    }

    /// Hot path for one received message: stamp arrival, record the latency
    /// pair, hand the payload to the merger. Ring-full never blocks; the
    /// message (or the latency pair) is dropped and counted.
    #[inline]
    pub fn on_payload(&mut self, bytes: &[u8]) {
        let arrival_ms = clock::epoch_ms_utc();
        let event_ms = wire::extract_event_ms(bytes);

        match self.latency.acquire() {
            Some(mut ev) => {
                ev.arrival_ms = arrival_ms;
                ev.event_ms = event_ms;
                self.latency.publish(ev);
            }
            None => self.latency_drops += 1,
        }

        match self.raw.acquire() {
            Some(mut slot) => {
                slot.clear();
                slot.extend_from_slice(bytes);
                if !self.raw.publish(slot) {
                    self.raw_drops += 1;
                }
            }
            None => self.raw_drops += 1,
        }
    }

    pub fn raw_drops(&self) -> u64 {
        self.raw_drops
    }

    pub fn latency_drops(&self) -> u64 {
        self.latency_drops
    }
}

/// One reconnect line on stderr per failure, exactly one per attempt.
pub(crate) fn report_reconnect(index: usize, err: &dyn fmt::Display) {
    warn!("[session {index}] {err}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::spsc_ring_with;

    #[test]
    fn stage_tags() {
        let tags: Vec<&str> = [
            ConnectStage::Resolve,
            ConnectStage::Connect,
            ConnectStage::Sni,
            ConnectStage::Handshake,
            ConnectStage::Configure,
            ConnectStage::WsHandshake,
        ]
        .iter()
        .map(|s| s.tag())
        .collect();
        assert_eq!(
            tags,
            vec!["resolve", "connect", "sni", "handshake", "configure", "ws_handshake"]
        );
    }

    #[test]
    fn connect_error_display() {
        let err = ConnectError::new(
            ConnectStage::Resolve,
            std::io::Error::new(std::io::ErrorKind::NotFound, "no such host"),
        );
        assert_eq!(err.to_string(), "resolve error: no such host");
    }

    #[test]
    fn client_request_sets_user_agent_and_no_extensions() {
        let cfg = SessionConfig {
            index: 0,
            host: "example.com".into(),
            port: 443,
            target: "/ws/btcusdt@bookTicker".into(),
        };
        let req = cfg.client_request(UA_ASYNC).unwrap();
        assert_eq!(req.uri().host(), Some("example.com"));
        assert_eq!(req.uri().path(), "/ws/btcusdt@bookTicker");
        assert_eq!(
            req.headers().get(USER_AGENT).and_then(|v| v.to_str().ok()),
            Some(UA_ASYNC)
        );
        assert!(req.headers().get("Sec-WebSocket-Extensions").is_none());
    }

    #[test]
    fn on_payload_publishes_payload_and_latency() {
        let (raw_tx, mut raw_rx) = spsc_ring_with(8, || Vec::with_capacity(RAW_SLOT_BYTES));
        let (lat_tx, mut lat_rx) = spsc_ring_with(8, LatencyEvent::default);
        let mut chan = SessionChannels::new(raw_tx, lat_tx);

        let payload = br#"{"u":7,"T":1700000000000,"s":"BTCUSDT"}"#;
        chan.on_payload(payload);

        let buf = raw_rx.consume().expect("payload published");
        assert_eq!(buf.as_slice(), payload);
        raw_rx.release(buf);

        let ev = lat_rx.consume().expect("latency published");
        assert_eq!(ev.event_ms, 1_700_000_000_000);
        assert!(ev.arrival_ms > 0);
        lat_rx.release(ev);

        assert_eq!(chan.raw_drops(), 0);
    }

    #[test]
    fn on_payload_drops_cleanly_when_ring_full() {
        let (raw_tx, _raw_rx) = spsc_ring_with(2, || Vec::with_capacity(64));
        let (lat_tx, _lat_rx) = spsc_ring_with(2, LatencyEvent::default);
        let mut chan = SessionChannels::new(raw_tx, lat_tx);

        for u in 0..10u64 {
            let payload = format!(r#"{{"u":{u},"T":1}}"#);
            chan.on_payload(payload.as_bytes());
        }
        assert_eq!(chan.raw_drops(), 8);
        assert_eq!(chan.latency_drops(), 8);
    }
}
