//! Reference gateway binding: RFLink lines over a byte stream.
//!
//! A [`GatewayLink`] owns two tasks, following the reader/writer split used for
//! every device link in this crate:
//!
//! - the **reader** frames incoming bytes into lines, decodes them, forwards
//!   acknowledgments to the writer and decoded events to the router channel, and
//!   reports a [`Disconnect`](super::Disconnect) when the stream ends on its own;
//! - the **writer** drains the outbound queue, and for acknowledged commands waits for
//!   the gateway's `OK` before taking the next frame, so at most one acknowledged
//!   command is ever outstanding.
//!
//! TCP targets use `tokio::net::TcpStream` directly. Serial targets (feature `serial`)
//! open the port with `serialport` and pump it through an in-memory duplex pipe from
//! two blocking threads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, trace, warn};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};

use super::framer::LineFramer;
use super::protocol::{self, Packet};
use super::{ConnectTarget, Connector, GatewayConnection, IgnoreList, LinkChannels};
use crate::error::{ConnectError, TransportError};
use crate::logutil::escape_log;

/// Tuning for links opened by [`LinkConnector`].
#[derive(Debug, Clone)]
pub struct LinkSettings {
    /// How long an acknowledged command waits for the gateway's `OK`.
    pub ack_timeout: Duration,
    /// Device ids never forwarded to the router.
    pub ignore: IgnoreList,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_secs(5),
            ignore: IgnoreList::default(),
        }
    }
}

type AckResult = Result<(), String>;

struct OutboundFrame {
    line: String,
    ack: Option<oneshot::Sender<Result<(), TransportError>>>,
}

pub struct GatewayLink {
    outgoing: mpsc::UnboundedSender<OutboundFrame>,
    closed: Arc<AtomicBool>,
    close_tx: watch::Sender<bool>,
}

impl GatewayLink {
    /// Spawn reader and writer tasks over `stream` and return the handle.
    pub fn start<S>(stream: S, channels: LinkChannels, settings: LinkSettings) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (ack_tx, ack_rx) = mpsc::unbounded_channel();
        let (close_tx, close_rx) = watch::channel(false);
        let closed = Arc::new(AtomicBool::new(false));

        tokio::spawn(read_loop(
            reader,
            channels,
            ack_tx,
            settings.ignore.clone(),
            close_rx.clone(),
            closed.clone(),
        ));
        tokio::spawn(write_loop(writer, out_rx, ack_rx, settings.ack_timeout, close_rx));

        Arc::new(Self {
            outgoing: out_tx,
            closed,
            close_tx,
        })
    }

    fn enqueue(
        &self,
        device_id: &str,
        action: &str,
        ack: Option<oneshot::Sender<Result<(), TransportError>>>,
    ) -> Result<(), TransportError> {
        let line = protocol::encode_command(device_id, action)
            .map_err(|e| TransportError::Encode(e.to_string()))?;
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.outgoing
            .send(OutboundFrame { line, ack })
            .map_err(|_| TransportError::Closed)
    }
}

#[async_trait]
impl GatewayConnection for GatewayLink {
    fn send_command(&self, device_id: &str, action: &str) -> Result<(), TransportError> {
        self.enqueue(device_id, action, None)
    }

    async fn send_command_ack(&self, device_id: &str, action: &str) -> Result<(), TransportError> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(device_id, action, Some(tx))?;
        rx.await.map_err(|_| TransportError::Closed)?
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!("closing gateway link");
            let _ = self.close_tx.send(true);
        }
    }
}

async fn read_loop<R>(
    mut reader: R,
    channels: LinkChannels,
    ack_tx: mpsc::UnboundedSender<AckResult>,
    ignore: IgnoreList,
    mut close_rx: watch::Receiver<bool>,
    closed: Arc<AtomicBool>,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 512];
    let mut framer = LineFramer::new();
    let reason = 'read: loop {
        tokio::select! {
            _ = close_rx.changed() => break None,
            res = reader.read(&mut buf) => match res {
                Ok(0) => break Some("connection closed by gateway".to_string()),
                Ok(n) => {
                    framer.push(&buf[..n]);
                    while let Some(line) = framer.next_line() {
                        trace!("gateway rx: {}", escape_log(&line));
                        match protocol::parse_line(&line) {
                            Ok(Packet::Ack) => {
                                let _ = ack_tx.send(Ok(()));
                            }
                            Ok(Packet::Nack(msg)) => {
                                let _ = ack_tx.send(Err(msg));
                            }
                            Ok(Packet::Events(events)) => {
                                for event in events {
                                    if event.id().is_some_and(|id| ignore.matches(id)) {
                                        trace!("ignoring event for {:?}", event.id());
                                        continue;
                                    }
                                    if channels.events.send(event).await.is_err() {
                                        break 'read None;
                                    }
                                }
                            }
                            Err(e) => debug!("skipping gateway line {}: {}", escape_log(&line), e),
                        }
                    }
                }
                Err(e) => break Some(format!("read error: {}", e)),
            }
        }
    };

    match reason {
        Some(reason) if !closed.load(Ordering::SeqCst) => {
            warn!("gateway link lost: {}", reason);
            channels.notify_disconnect(reason);
        }
        _ => debug!("gateway reader stopped"),
    }
}

async fn write_loop<W>(
    mut writer: W,
    mut outgoing: mpsc::UnboundedReceiver<OutboundFrame>,
    mut acks: mpsc::UnboundedReceiver<AckResult>,
    ack_timeout: Duration,
    mut close_rx: watch::Receiver<bool>,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        let frame = tokio::select! {
            _ = close_rx.changed() => break,
            frame = outgoing.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        // Replies to earlier fire-and-forget commands must not satisfy this one.
        while acks.try_recv().is_ok() {}

        trace!("gateway tx: {}", escape_log(frame.line.trim_end()));
        let written = match writer.write_all(frame.line.as_bytes()).await {
            Ok(()) => writer.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            warn!("gateway write failed: {}", e);
            if let Some(ack) = frame.ack {
                let _ = ack.send(Err(TransportError::Io(e)));
            }
            break;
        }

        if let Some(ack) = frame.ack {
            let result = match tokio::time::timeout(ack_timeout, acks.recv()).await {
                Ok(Some(Ok(()))) => Ok(()),
                Ok(Some(Err(msg))) => Err(TransportError::Rejected(msg)),
                Ok(None) => Err(TransportError::Closed),
                Err(_) => Err(TransportError::AckTimeout(ack_timeout)),
            };
            let _ = ack.send(result);
        }
    }
    let _ = writer.shutdown().await;
    debug!("gateway writer stopped");
}

/// Opens [`GatewayLink`]s over TCP or serial.
#[derive(Debug, Clone, Default)]
pub struct LinkConnector {
    settings: LinkSettings,
}

impl LinkConnector {
    pub fn new(settings: LinkSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl Connector for LinkConnector {
    async fn connect(
        &self,
        target: &ConnectTarget,
        channels: LinkChannels,
    ) -> Result<Arc<dyn GatewayConnection>, ConnectError> {
        info!("opening gateway link to {}", target);
        match target {
            ConnectTarget::Tcp { host, port } => {
                let stream = TcpStream::connect((host.as_str(), *port))
                    .await
                    .map_err(|e| match e.kind() {
                        std::io::ErrorKind::ConnectionRefused => {
                            ConnectError::Refused(format!("{}:{}", host, port))
                        }
                        std::io::ErrorKind::TimedOut => ConnectError::Timeout(Duration::ZERO),
                        _ => ConnectError::Io(e),
                    })?;
                let _ = stream.set_nodelay(true);
                Ok(GatewayLink::start(stream, channels, self.settings.clone()))
            }
            ConnectTarget::Serial { path, baud_rate } => {
                let stream = open_serial(path, *baud_rate)?;
                Ok(GatewayLink::start(stream, channels, self.settings.clone()))
            }
        }
    }
}

#[cfg(feature = "serial")]
fn open_serial(path: &str, baud_rate: u32) -> Result<tokio::io::DuplexStream, ConnectError> {
    use std::io::{Read, Write};

    let port = serialport::new(path, baud_rate)
        .timeout(Duration::from_millis(100))
        .data_bits(serialport::DataBits::Eight)
        .stop_bits(serialport::StopBits::One)
        .parity(serialport::Parity::None)
        .open()
        .map_err(|e| ConnectError::Link(format!("failed to open serial port {}: {}", path, e)))?;
    let mut read_port = port
        .try_clone()
        .map_err(|e| ConnectError::Link(format!("failed to clone serial port {}: {}", path, e)))?;
    let mut write_port = port;

    let (ours, theirs) = tokio::io::duplex(4096);
    let (mut pipe_rd, mut pipe_wr) = tokio::io::split(theirs);
    let stop = Arc::new(AtomicBool::new(false));
    let handle = tokio::runtime::Handle::current();

    // serial -> pipe
    let rt = handle.clone();
    let stop_rd = stop.clone();
    let label = path.to_string();
    tokio::task::spawn_blocking(move || {
        let mut buf = [0u8; 256];
        while !stop_rd.load(Ordering::SeqCst) {
            match read_port.read(&mut buf) {
                Ok(0) => {}
                Ok(n) => {
                    if rt.block_on(pipe_wr.write_all(&buf[..n])).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => {
                    warn!("serial read error on {}: {}", label, e);
                    break;
                }
            }
        }
        let _ = rt.block_on(pipe_wr.shutdown());
    });

    // pipe -> serial
    tokio::task::spawn_blocking(move || {
        let mut buf = [0u8; 256];
        loop {
            match handle.block_on(pipe_rd.read(&mut buf)) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if let Err(e) = write_port.write_all(&buf[..n]).and_then(|_| write_port.flush()) {
                        warn!("serial write error: {}", e);
                        break;
                    }
                }
            }
        }
        stop.store(true, Ordering::SeqCst);
    });

    Ok(ours)
}

#[cfg(not(feature = "serial"))]
fn open_serial(path: &str, _baud_rate: u32) -> Result<tokio::io::DuplexStream, ConnectError> {
    Err(ConnectError::Link(format!(
        "serial support not compiled in, cannot open {}",
        path
    )))
}
