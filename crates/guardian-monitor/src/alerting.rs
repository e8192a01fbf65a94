//! Alert dispatching to the wearable and to event subscribers.
//!
//! Every alarm transition produces two independent outputs:
//!
//! 1. a plain ASCII command datagram (`ALERT` or `SAFE`) sent to the last
//!    known peer on the device's command port, and
//! 2. a typed [`MonitorEvent`] published on the [`EventBus`].
//!
//! Sending is best-effort. A missing peer or a socket error is logged and
//! swallowed; nothing is retried or queued.

use std::net::{SocketAddr, UdpSocket};

use chrono::Utc;

use crate::detection::{Transition, TransitionReason};
use crate::error::TransportError;
use crate::events::{EventBus, MonitorEvent};
use crate::peer::PeerTracker;
use crate::sample::GeoPoint;

/// Command understood by the wearable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertCommand {
    /// Start the on-device alarm
    Alert,
    /// Stop the on-device alarm
    Safe,
}

impl AlertCommand {
    /// Wire text.
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertCommand::Alert => "ALERT",
            AlertCommand::Safe => "SAFE",
        }
    }

    /// Wire bytes.
    pub fn as_bytes(&self) -> &'static [u8] {
        self.as_str().as_bytes()
    }
}

/// Outbound transport for alert commands.
pub trait CommandSink: Send {
    /// Sink name for logs
    fn name(&self) -> &str;

    /// Deliver one command to `to`
    fn send(&self, command: AlertCommand, to: SocketAddr) -> Result<(), TransportError>;
}

/// Sends commands from a dedicated ephemeral UDP socket.
///
/// The listening socket is never shared, so stopping the listener releases
/// its port even while a dispatcher is still alive.
pub struct UdpCommandSink {
    socket: UdpSocket,
}

impl UdpCommandSink {
    /// Bind an unspecified-address, OS-assigned port in non-blocking mode.
    pub fn bind_ephemeral() -> Result<Self, TransportError> {
        let socket = UdpSocket::bind("0.0.0.0:0").map_err(|source| TransportError::Bind {
            addr: "0.0.0.0:0".to_string(),
            source,
        })?;
        Self::from_socket(socket)
    }

    /// Wrap an existing socket (for testing).
    pub fn from_socket(socket: UdpSocket) -> Result<Self, TransportError> {
        socket
            .set_nonblocking(true)
            .map_err(|source| TransportError::Configure { source })?;
        Ok(Self { socket })
    }
}

impl CommandSink for UdpCommandSink {
    fn name(&self) -> &str {
        "udp"
    }

    fn send(&self, command: AlertCommand, to: SocketAddr) -> Result<(), TransportError> {
        self.socket
            .send_to(command.as_bytes(), to)
            .map(|_| ())
            .map_err(|source| TransportError::Send { addr: to, source })
    }
}

/// Counters describing dispatcher activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Commands handed to the sink successfully
    pub sent: u64,
    /// Commands skipped because no peer was known
    pub skipped_no_peer: u64,
    /// Commands the sink failed to deliver
    pub failed: u64,
}

/// Converts state-machine transitions into commands and events.
pub struct AlertDispatcher {
    sink: Box<dyn CommandSink>,
    peers: PeerTracker,
    command_port: u16,
    bus: EventBus,
    stats: DispatchStats,
}

impl AlertDispatcher {
    /// Create a dispatcher.
    pub fn new(sink: Box<dyn CommandSink>, peers: PeerTracker, command_port: u16, bus: EventBus) -> Self {
        Self {
            sink,
            peers,
            command_port,
            bus,
            stats: DispatchStats::default(),
        }
    }

    /// Handle one transition. `location` is attached to alarm events only
    /// when it is a valid fix; it never gates the send or the event.
    pub fn dispatch(&mut self, transition: &Transition, location: Option<GeoPoint>) {
        let timestamp = Utc::now();
        let (command, event) = match transition.reason {
            TransitionReason::Impact { svm } | TransitionReason::ImpactRepeat { svm } => {
                let repeat = matches!(transition.reason, TransitionReason::ImpactRepeat { .. });
                tracing::warn!(svm, repeat, "Fall detected");
                (
                    AlertCommand::Alert,
                    MonitorEvent::FallDetected {
                        svm,
                        repeat,
                        location,
                        timestamp,
                    },
                )
            }
            TransitionReason::SosRaised => {
                tracing::warn!(from = transition.from.as_str(), "SOS raised by device");
                (AlertCommand::Alert, MonitorEvent::SosRaised { location, timestamp })
            }
            TransitionReason::FalsePositiveAck => {
                tracing::info!(from = transition.from.as_str(), "False positive acknowledged by device");
                (AlertCommand::Safe, MonitorEvent::FalsePositiveCleared { timestamp })
            }
            TransitionReason::ManualReset => {
                tracing::info!(from = transition.from.as_str(), "Alarm cleared by operator");
                (AlertCommand::Safe, MonitorEvent::ManualCleared { timestamp })
            }
        };

        self.send(command);
        self.bus.publish(event);
    }

    /// Publish a non-alarm event.
    pub fn notify(&self, event: MonitorEvent) {
        self.bus.publish(event);
    }

    fn send(&mut self, command: AlertCommand) {
        let Some(peer) = self.peers.current() else {
            self.stats.skipped_no_peer += 1;
            tracing::debug!(command = command.as_str(), "No peer known, command not sent");
            return;
        };
        let to = SocketAddr::new(peer.ip(), self.command_port);
        match self.sink.send(command, to) {
            Ok(()) => {
                self.stats.sent += 1;
                tracing::debug!(command = command.as_str(), peer = %to, "Command sent");
            }
            Err(e) => {
                self.stats.failed += 1;
                tracing::warn!(
                    command = command.as_str(),
                    sink = %self.sink.name(),
                    error = %e,
                    "Command send failed"
                );
            }
        }
    }

    /// Activity counters.
    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    /// The peer commands are currently addressed to.
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peers.current()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingSink;
    use super::*;
    use crate::detection::DetectionState;
    use std::time::{Duration, Instant};

    fn transition(reason: TransitionReason, from: DetectionState, to: DetectionState) -> Transition {
        Transition {
            from,
            to,
            reason,
            at: Instant::now(),
        }
    }

    fn setup(fail: bool) -> (AlertDispatcher, RecordingSink, PeerTracker, EventBus) {
        let sink = RecordingSink {
            fail,
            ..RecordingSink::default()
        };
        let peers = PeerTracker::new();
        let bus = EventBus::new();
        let dispatcher = AlertDispatcher::new(Box::new(sink.clone()), peers.clone(), 5556, bus.clone());
        (dispatcher, sink, peers, bus)
    }

    #[test]
    fn command_wire_text() {
        assert_eq!(AlertCommand::Alert.as_bytes(), b"ALERT");
        assert_eq!(AlertCommand::Safe.as_bytes(), b"SAFE");
    }

    #[test]
    fn alert_goes_to_peer_ip_on_command_port() {
        let (mut d, sink, peers, bus) = setup(false);
        let events = bus.subscribe(8);
        peers.observe("192.168.0.42:38211".parse().unwrap());

        let t = transition(
            TransitionReason::Impact { svm: 31.0 },
            DetectionState::Normal,
            DetectionState::Impact,
        );
        d.dispatch(&t, None);

        let sent = sink.sent.lock().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, AlertCommand::Alert);
        assert_eq!(sent[0].1, "192.168.0.42:5556".parse().unwrap());

        match events.try_recv().unwrap() {
            MonitorEvent::FallDetected { svm, repeat, location, .. } => {
                assert_eq!(svm, 31.0);
                assert!(!repeat);
                assert!(location.is_none());
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn clearances_send_safe() {
        let (mut d, sink, peers, bus) = setup(false);
        let events = bus.subscribe(8);
        peers.observe("10.0.0.2:1234".parse().unwrap());

        d.dispatch(
            &transition(TransitionReason::FalsePositiveAck, DetectionState::Sos, DetectionState::Normal),
            None,
        );
        d.dispatch(
            &transition(TransitionReason::ManualReset, DetectionState::Impact, DetectionState::Normal),
            None,
        );

        assert_eq!(sink.commands(), vec![AlertCommand::Safe, AlertCommand::Safe]);
        let kinds: Vec<_> = events.try_iter().map(|e| e.event_type()).collect();
        assert_eq!(kinds, vec!["FalsePositiveCleared", "ManualCleared"]);
    }

    #[test]
    fn no_peer_skips_send_but_still_emits_event() {
        let (mut d, sink, _peers, bus) = setup(false);
        let events = bus.subscribe(8);
        let fix = GeoPoint::new(51.5, -0.12);

        d.dispatch(
            &transition(TransitionReason::SosRaised, DetectionState::Normal, DetectionState::Sos),
            fix,
        );

        assert!(sink.commands().is_empty());
        assert_eq!(d.stats().skipped_no_peer, 1);
        assert_eq!(events.try_recv().unwrap().location(), fix);
    }

    #[test]
    fn send_failure_is_swallowed() {
        let (mut d, _sink, peers, bus) = setup(true);
        let events = bus.subscribe(8);
        peers.observe("10.0.0.2:1234".parse().unwrap());

        d.dispatch(
            &transition(
                TransitionReason::ImpactRepeat { svm: 9.8 },
                DetectionState::Impact,
                DetectionState::Impact,
            ),
            None,
        );

        assert_eq!(d.stats().failed, 1);
        assert!(matches!(
            events.try_recv().unwrap(),
            MonitorEvent::FallDetected { repeat: true, .. }
        ));
    }

    #[test]
    fn udp_sink_delivers_over_loopback() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let port = receiver.local_addr().unwrap().port();

        let sink = UdpCommandSink::from_socket(UdpSocket::bind("127.0.0.1:0").unwrap()).unwrap();
        let peers = PeerTracker::new();
        peers.observe("127.0.0.1:9".parse().unwrap());
        let mut d = AlertDispatcher::new(Box::new(sink), peers, port, EventBus::new());

        d.dispatch(
            &transition(TransitionReason::SosRaised, DetectionState::Normal, DetectionState::Sos),
            None,
        );

        let mut buf = [0u8; 16];
        let (n, _) = receiver.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ALERT");
        assert_eq!(d.stats().sent, 1);
    }
}
