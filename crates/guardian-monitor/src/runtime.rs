//! Threaded runtime wiring the listener to the session.
//!
//! ```text
//! guardian-ingress thread ──┐
//!                           ├─ sync_channel<MonitorInput> ─> guardian-process thread ─> MonitorSession
//! MonitorHandle (operator) ─┘
//! ```
//!
//! Samples and operator commands share one bounded channel, so they are
//! applied strictly in arrival order by a single owner of the session.

use std::net::SocketAddr;
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crate::alerting::{AlertDispatcher, CommandSink, UdpCommandSink};
use crate::config::{parse_step_target, MonitorConfig};
use crate::error::{MonitorError, Result, TransportError};
use crate::events::{EventBus, MonitorEvent};
use crate::ingress::{InboundSample, IngressListener, IngressStats};
use crate::peer::PeerTracker;
use crate::session::{MonitorSession, RecordSink, SessionSnapshot, SnapshotHandle};

/// Operator command applied by the processing thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// Clear any alarm
    ManualReset,
    /// Zero the step counter
    ResetSteps,
    /// Replace the step target
    SetStepTarget(u64),
}

/// Item carried by the processing channel.
#[derive(Debug)]
pub enum MonitorInput {
    /// A decoded datagram
    Sample(InboundSample),
    /// An operator command
    Control(ControlCommand),
}

impl From<InboundSample> for MonitorInput {
    fn from(inbound: InboundSample) -> Self {
        MonitorInput::Sample(inbound)
    }
}

/// Builder for a running monitor.
pub struct Monitor {
    config: MonitorConfig,
    command_sink: Option<Box<dyn CommandSink>>,
    record_sinks: Vec<Box<dyn RecordSink>>,
}

impl Monitor {
    /// Builder with the default UDP command sink and no record sinks.
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            config,
            command_sink: None,
            record_sinks: Vec::new(),
        }
    }

    /// Replace the UDP command sink.
    pub fn with_command_sink(mut self, sink: Box<dyn CommandSink>) -> Self {
        self.command_sink = Some(sink);
        self
    }

    /// Attach a record consumer.
    pub fn with_record_sink(mut self, sink: Box<dyn RecordSink>) -> Self {
        self.record_sinks.push(sink);
        self
    }

    /// Validate configuration and start with defaults for everything else.
    pub fn start(config: MonitorConfig) -> Result<MonitorHandle> {
        Self::new(config).spawn()
    }

    /// Validate configuration, bind the listener and start processing.
    ///
    /// # Errors
    ///
    /// Fails with [`MonitorError::InvalidConfiguration`] before anything is
    /// bound, or with [`MonitorError::Transport`] if a socket or thread cannot
    /// be created. Nothing is left running on error.
    pub fn spawn(self) -> Result<MonitorHandle> {
        let Monitor {
            config,
            command_sink,
            record_sinks,
        } = self;
        config.validate()?;

        let bus = EventBus::new();
        let peers = PeerTracker::new();
        let sink: Box<dyn CommandSink> = match command_sink {
            Some(sink) => sink,
            None => Box::new(UdpCommandSink::bind_ephemeral()?),
        };
        let dispatcher = AlertDispatcher::new(sink, peers.clone(), config.alert.command_port, bus.clone());
        let mut session = MonitorSession::new(&config, dispatcher, Instant::now());
        for record_sink in record_sinks {
            session.add_record_sink(record_sink);
        }
        let snapshots = session.snapshot_handle();

        let (tx, rx) = mpsc::sync_channel::<MonitorInput>(config.listener.channel_capacity);
        let listener = IngressListener::start(&config.listener, peers, bus.clone(), tx.clone())?;

        let processor = thread::Builder::new()
            .name("guardian-process".to_string())
            .spawn(move || process_loop(session, rx))
            .map_err(|source| TransportError::WorkerSpawn { source })?;

        tracing::info!(
            addr = %listener.local_addr(),
            command_port = config.alert.command_port,
            "Monitor started"
        );

        Ok(MonitorHandle {
            config,
            bus,
            snapshots,
            listener,
            control: Some(tx),
            processor: Some(processor),
        })
    }
}

fn process_loop(mut session: MonitorSession, rx: Receiver<MonitorInput>) {
    while let Ok(input) = rx.recv() {
        match input {
            MonitorInput::Sample(inbound) => {
                tracing::trace!(peer = %inbound.source, "Processing sample");
                session.process(&inbound.sample, inbound.received_at);
            }
            MonitorInput::Control(ControlCommand::ManualReset) => {
                session.manual_reset(Instant::now());
            }
            MonitorInput::Control(ControlCommand::ResetSteps) => session.reset_steps(),
            MonitorInput::Control(ControlCommand::SetStepTarget(target)) => session.set_step_target(target),
        }
    }
    tracing::debug!("Processing loop finished");
}

/// Handle to a running monitor. Dropping it stops everything.
pub struct MonitorHandle {
    config: MonitorConfig,
    bus: EventBus,
    snapshots: SnapshotHandle,
    listener: IngressListener,
    control: Option<SyncSender<MonitorInput>>,
    processor: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    /// Subscribe to events with a queue of `capacity`.
    pub fn subscribe(&self, capacity: usize) -> Receiver<MonitorEvent> {
        self.bus.subscribe(capacity)
    }

    /// Subscribe with the configured default queue size.
    pub fn events(&self) -> Receiver<MonitorEvent> {
        self.bus.subscribe(self.config.events.subscriber_capacity)
    }

    /// Latest session snapshot.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.get()
    }

    /// Snapshot reader that can be moved to another thread.
    pub fn snapshots(&self) -> SnapshotHandle {
        self.snapshots.clone()
    }

    /// Listener counters.
    pub fn ingress_stats(&self) -> IngressStats {
        self.listener.stats()
    }

    /// Bound listener address.
    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    /// Configuration the monitor was started with.
    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Whether the processing thread is still owned by this handle.
    pub fn is_running(&self) -> bool {
        self.processor.is_some()
    }

    /// Clear any active alarm.
    pub fn manual_reset(&self) -> Result<()> {
        self.send(ControlCommand::ManualReset)
    }

    /// Zero the step counter.
    pub fn reset_steps(&self) -> Result<()> {
        self.send(ControlCommand::ResetSteps)
    }

    /// Parse and queue a new step target. Invalid input is rejected here
    /// and the current target stays in effect.
    pub fn set_step_target(&self, input: &str) -> Result<u64> {
        let target = parse_step_target(input)?;
        self.send(ControlCommand::SetStepTarget(target))?;
        Ok(target)
    }

    fn send(&self, command: ControlCommand) -> Result<()> {
        let tx = self.control.as_ref().ok_or(MonitorError::NotRunning)?;
        tx.send(MonitorInput::Control(command))
            .map_err(|_| MonitorError::NotRunning)
    }

    /// Stop the listener, drain the channel and join the processor.
    /// Safe to call more than once.
    pub fn stop(&mut self) {
        self.listener.stop();
        self.control = None;
        if let Some(processor) = self.processor.take() {
            if processor.join().is_err() {
                tracing::error!("Processing thread panicked");
            }
            tracing::info!("Monitor stopped");
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
