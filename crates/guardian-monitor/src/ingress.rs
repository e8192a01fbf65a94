//! UDP ingress for wearable sensor datagrams.
//!
//! A single worker thread owns the listening socket. It blocks on receive
//! with a short timeout so that [`IngressListener::stop`] is honoured within
//! one timeout period, decodes each datagram and forwards accepted samples
//! into the processing channel with `try_send`. Malformed datagrams and a
//! full channel are counted and dropped; neither stops the worker.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::config::ListenerConfig;
use crate::decoder::SampleDecoder;
use crate::error::TransportError;
use crate::events::{EventBus, MonitorEvent};
use crate::peer::PeerTracker;
use crate::sample::Sample;

/// A decoded sample together with where and when it arrived.
#[derive(Debug, Clone, Copy)]
pub struct InboundSample {
    /// Decoded reading
    pub sample: Sample,
    /// Datagram source
    pub source: SocketAddr,
    /// Arrival time, used as the processing clock
    pub received_at: Instant,
}

/// Point-in-time copy of the ingress counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressStats {
    /// Datagrams read from the socket
    pub received: u64,
    /// Samples handed to the processing channel
    pub accepted: u64,
    /// Datagrams that failed to decode
    pub malformed: u64,
    /// Samples dropped because the processing channel was full
    pub dropped: u64,
    /// Receive errors other than timeouts
    pub receive_errors: u64,
}

#[derive(Debug, Default)]
struct IngressCounters {
    received: AtomicU64,
    accepted: AtomicU64,
    malformed: AtomicU64,
    dropped: AtomicU64,
    receive_errors: AtomicU64,
}

impl IngressCounters {
    fn snapshot(&self) -> IngressStats {
        IngressStats {
            received: self.received.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            receive_errors: self.receive_errors.load(Ordering::Relaxed),
        }
    }
}

/// Per-datagram handling, independent of the socket.
///
/// `T` is the processing channel's item type; anything constructible from an
/// [`InboundSample`] works, so samples can share a channel with other inputs.
pub struct DatagramHandler<T> {
    peers: PeerTracker,
    bus: EventBus,
    tx: SyncSender<T>,
    counters: Arc<IngressCounters>,
}

impl<T: From<InboundSample>> DatagramHandler<T> {
    /// Create a handler forwarding into `tx`.
    pub fn new(peers: PeerTracker, bus: EventBus, tx: SyncSender<T>) -> Self {
        Self {
            peers,
            bus,
            tx,
            counters: Arc::new(IngressCounters::default()),
        }
    }

    /// Handle a single UDP datagram. Public for unit testing.
    ///
    /// Returns `true` when a sample was forwarded.
    pub fn handle_datagram(&self, data: &[u8], src: SocketAddr) -> bool {
        self.counters.received.fetch_add(1, Ordering::Relaxed);

        if self.peers.observe(src) {
            tracing::info!(peer = %src, "New device connected");
            self.bus.publish(MonitorEvent::NewDeviceConnected {
                addr: src,
                timestamp: Utc::now(),
            });
        }

        let sample = match SampleDecoder::decode(data) {
            Ok(sample) => sample,
            Err(e) => {
                self.counters.malformed.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(peer = %src, bytes = data.len(), error = %e, "Dropping malformed datagram");
                return false;
            }
        };

        let inbound = InboundSample {
            sample,
            source: src,
            received_at: Instant::now(),
        };
        match self.tx.try_send(T::from(inbound)) {
            Ok(()) => {
                self.counters.accepted.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(peer = %src, "Processing channel full, sample dropped");
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Current counters.
    pub fn stats(&self) -> IngressStats {
        self.counters.snapshot()
    }
}

/// Running UDP listener.
///
/// The worker owns the socket, so joining the worker is what closes it.
pub struct IngressListener {
    local_addr: SocketAddr,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    counters: Arc<IngressCounters>,
}

impl IngressListener {
    /// Bind the configured address and start the receive worker.
    ///
    /// On error nothing is left running.
    pub fn start<T>(
        config: &ListenerConfig,
        peers: PeerTracker,
        bus: EventBus,
        tx: SyncSender<T>,
    ) -> Result<Self, TransportError>
    where
        T: From<InboundSample> + Send + 'static,
    {
        let addr = config.socket_addr();
        let socket = UdpSocket::bind(&addr).map_err(|source| TransportError::Bind {
            addr: addr.clone(),
            source,
        })?;
        socket
            .set_read_timeout(Some(config.recv_timeout()))
            .map_err(|source| TransportError::Configure { source })?;
        let local_addr = socket
            .local_addr()
            .map_err(|source| TransportError::Configure { source })?;

        let handler = DatagramHandler::new(peers, bus, tx);
        let counters = Arc::clone(&handler.counters);
        let stop = Arc::new(AtomicBool::new(false));
        let worker_stop = Arc::clone(&stop);
        let buf_len = config.max_datagram_bytes.max(1);

        let worker = thread::Builder::new()
            .name("guardian-ingress".to_string())
            .spawn(move || receive_loop(socket, handler, worker_stop, buf_len))
            .map_err(|source| TransportError::WorkerSpawn { source })?;

        tracing::info!(addr = %local_addr, "Listening for sensor datagrams");

        Ok(Self {
            local_addr,
            stop,
            worker: Some(worker),
            counters,
        })
    }

    /// Address actually bound (resolves port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Current counters.
    pub fn stats(&self) -> IngressStats {
        self.counters.snapshot()
    }

    /// Whether the worker is still running.
    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Stop the worker and close the socket. Safe to call more than once.
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        self.stop.store(true, Ordering::SeqCst);
        if worker.join().is_err() {
            tracing::error!(addr = %self.local_addr, "Ingress worker panicked");
        }
        tracing::info!(addr = %self.local_addr, "Listener stopped");
    }
}

impl Drop for IngressListener {
    fn drop(&mut self) {
        self.stop();
    }
}

fn receive_loop<T: From<InboundSample>>(
    socket: UdpSocket,
    handler: DatagramHandler<T>,
    stop: Arc<AtomicBool>,
    buf_len: usize,
) {
    let mut buf = vec![0u8; buf_len];
    while !stop.load(Ordering::SeqCst) {
        match socket.recv_from(&mut buf) {
            Ok((n, src)) => {
                handler.handle_datagram(&buf[..n], src);
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {}
            Err(e) => {
                handler.counters.receive_errors.fetch_add(1, Ordering::Relaxed);
                let err = TransportError::Receive { source: e };
                tracing::warn!(error = %err, "Receive failed");
            }
        }
    }
}
