//! This module is responsible for getting averages off the box.
//!
//! Each average goes out as a small JSON message, `{"id":3,"value":1.25,"time":...}`,
//! where `time` is when we sent it (ms since the Unix epoch). Whoever is on the
//! other end echoes the message back and the echo shows up on the ack channel,
//! which [`crate::monitoring`] turns into round-trip times.

use std::{
    net::{SocketAddr, UdpSocket},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::JoinHandle,
    time::Duration,
};

use chrono::Utc;
use crossbeam_channel::{bounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::{error::Error, monitoring::CommMetrics, Result};

// Plenty for one message
const DATAGRAM_SIZE: usize = 512;
const LISTENER_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: usize,
    pub value: f32,
    /// Origin timestamp, ms since the Unix epoch
    pub time: i64,
}

impl Message {
    /// Stamp a message with the current time
    pub fn now(id: usize, value: f32) -> Self {
        Self {
            id,
            value,
            time: now_ms(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(Error::Encode)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(Error::MalformedAck)
    }
}

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Something that can deliver a message to the remote peer
pub trait Transport: Send {
    /// Returns the number of bytes put on the wire
    fn publish(&mut self, message: &Message) -> Result<usize>;
}

/// In-process peer that acknowledges everything immediately
pub struct Loopback {
    acks: Sender<Vec<u8>>,
}

impl Loopback {
    pub fn new(capacity: usize) -> Result<(Self, Receiver<Vec<u8>>)> {
        if capacity == 0 {
            return Err(Error::QueueAllocation {
                queue: "acknowledgement",
                capacity,
            });
        }
        let (acks, receiver) = bounded(capacity);
        Ok((Self { acks }, receiver))
    }
}

impl Transport for Loopback {
    fn publish(&mut self, message: &Message) -> Result<usize> {
        let bytes = message.encode()?;
        let len = bytes.len();
        // Nobody listening for acks isn't the sender's problem
        if self.acks.send(bytes).is_err() {
            debug!(id = message.id, "Ack receiver gone, not echoing");
        }
        Ok(len)
    }
}

/// JSON over UDP to a peer running [`crate::echo::serve`] (or anything that echoes)
pub struct UdpTransport {
    socket: UdpSocket,
    peer: SocketAddr,
}

/// Background thread forwarding datagrams from the peer onto the ack channel
pub struct AckListener {
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl AckListener {
    /// Stop forwarding and wait for the thread to exit
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::Relaxed);
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| Error::TaskPanicked("udp-listener")),
            None => Ok(()),
        }
    }
}

impl Drop for AckListener {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

impl UdpTransport {
    pub fn connect(
        bind: SocketAddr,
        peer: SocketAddr,
        capacity: usize,
    ) -> Result<(Self, Receiver<Vec<u8>>, AckListener)> {
        if capacity == 0 {
            return Err(Error::QueueAllocation {
                queue: "acknowledgement",
                capacity,
            });
        }
        let socket = UdpSocket::bind(bind)?;
        let listen_socket = socket.try_clone()?;
        listen_socket.set_read_timeout(Some(LISTENER_POLL))?;
        info!(local = %socket.local_addr()?, %peer, "UDP transport ready");

        let (tx, rx) = bounded(capacity);
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = shutdown.clone();
        let handle = std::thread::Builder::new()
            .name("udp-listener".into())
            .spawn(move || listen(listen_socket, peer, tx, &flag))
            .map_err(|source| Error::Spawn {
                task: "udp-listener",
                source,
            })?;
        Ok((
            Self { socket, peer },
            rx,
            AckListener {
                shutdown,
                handle: Some(handle),
            },
        ))
    }
}

impl Transport for UdpTransport {
    fn publish(&mut self, message: &Message) -> Result<usize> {
        let bytes = message.encode()?;
        let sent = self.socket.send_to(&bytes, self.peer)?;
        if sent != bytes.len() {
            return Err(Error::Publish(format!(
                "short send, {sent} of {} bytes",
                bytes.len()
            )));
        }
        Ok(sent)
    }
}

fn listen(socket: UdpSocket, peer: SocketAddr, acks: Sender<Vec<u8>>, shutdown: &AtomicBool) {
    let mut buf = [0u8; DATAGRAM_SIZE];
    while !shutdown.load(Ordering::Relaxed) {
        match socket.recv_from(&mut buf) {
            Ok((n, from)) => {
                if from != peer {
                    debug!(%from, "Ignoring datagram from stranger");
                    continue;
                }
                if acks.send(buf[..n].to_vec()).is_err() {
                    // Ack task is done (or aborted)
                    break;
                }
            }
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                continue
            }
            Err(e) => {
                error!(%e, "UDP receive failed, listener exiting");
                break;
            }
        }
    }
    debug!("UDP listener stopped");
}

/// Publish every average that comes out of the aggregator, in order.
///
/// Waits on the averages channel for as long as it takes, there's nothing else
/// for this task to do. Stops after `expected` messages or when the aggregator
/// hangs up. Failed publishes are logged and skipped, never retried.
pub fn transmit<T: Transport>(
    averages: Receiver<f32>,
    mut transport: T,
    expected: usize,
) -> CommMetrics {
    let mut metrics = CommMetrics::start();
    for id in 0..expected {
        let Ok(value) = averages.recv() else {
            warn!(sent = id, expected, "Averages channel closed early");
            break;
        };
        let message = Message::now(id, value);
        match transport.publish(&message) {
            Ok(bytes) => {
                metrics.sent += 1;
                metrics.bytes += bytes;
                debug!(id, value, bytes, "Published average");
            }
            Err(e) => {
                metrics.failed += 1;
                error!(id, value, %e, "Failed to publish average");
            }
        }
    }
    metrics.finish();
    info!(
        sent = metrics.sent,
        failed = metrics.failed,
        "Communication task finished"
    );
    metrics
}
