//! # Gateway Transport Binding
//!
//! The bridge core talks to the gateway through two narrow traits:
//!
//! - [`Connector`] opens a link to a [`ConnectTarget`] (serial device or TCP host) and
//!   wires it to a [`LinkChannels`] pair: a bounded channel for decoded inbound
//!   events and an unbounded channel for disconnect notices.
//! - [`GatewayConnection`] is the live handle returned by a successful connect. It can
//!   queue a command and return at once, or queue it and wait for the gateway to
//!   confirm transmission.
//!
//! The reference binding in [`link`] speaks the RFLink line protocol ([`protocol`])
//! over any async byte stream, framed by [`framer`].
//!
//! ```toml
//! [gateway]
//! port = "/dev/ttyACM0"
//! baud_rate = 57600
//! # host = "10.0.0.5"   # when set, `port` is a TCP port instead
//! ```

pub mod framer;
pub mod link;
pub mod protocol;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::bridge::event::Event;
use crate::error::{ConnectError, TransportError};

/// Where the gateway lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectTarget {
    Serial { path: String, baud_rate: u32 },
    Tcp { host: String, port: u16 },
}

impl fmt::Display for ConnectTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectTarget::Serial { path, baud_rate } => write!(f, "{} @ {} baud", path, baud_rate),
            ConnectTarget::Tcp { host, port } => write!(f, "tcp://{}:{}", host, port),
        }
    }
}

/// Sent by a binding when its link drops without being closed by us.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disconnect {
    /// Generation of the binding that dropped; stale generations are ignored.
    pub generation: u64,
    pub reason: String,
}

/// The two outbound channels a binding reports through.
#[derive(Debug, Clone)]
pub struct LinkChannels {
    pub generation: u64,
    pub events: mpsc::Sender<Event>,
    pub disconnects: mpsc::UnboundedSender<Disconnect>,
}

impl LinkChannels {
    pub fn notify_disconnect(&self, reason: impl Into<String>) {
        let _ = self.disconnects.send(Disconnect {
            generation: self.generation,
            reason: reason.into(),
        });
    }
}

/// A live, bound gateway connection.
#[async_trait]
pub trait GatewayConnection: Send + Sync {
    /// Queue a command for the device and return without waiting for the gateway.
    fn send_command(&self, device_id: &str, action: &str) -> Result<(), TransportError>;

    /// Queue a command and wait until the gateway confirms it went out.
    async fn send_command_ack(&self, device_id: &str, action: &str) -> Result<(), TransportError>;

    /// Tear the link down. A closed link never reports a [`Disconnect`].
    fn close(&self);
}

/// Opens gateway links.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        target: &ConnectTarget,
        channels: LinkChannels,
    ) -> Result<Arc<dyn GatewayConnection>, ConnectError>;
}

/// Device ids dropped at the transport layer. Patterns may use `*` and `?`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IgnoreList {
    patterns: Vec<String>,
}

impl IgnoreList {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            patterns: patterns.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn matches(&self, device_id: &str) -> bool {
        self.patterns
            .iter()
            .any(|p| wildcard_match(p.as_bytes(), device_id.as_bytes()))
    }
}

fn wildcard_match(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while t < text.len() {
        if p < pattern.len() && (pattern[p] == b'?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == b'*' {
            star = Some((p, t));
            p += 1;
        } else if let Some((sp, st)) = star {
            p = sp + 1;
            t = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|&c| c == b'*')
}
