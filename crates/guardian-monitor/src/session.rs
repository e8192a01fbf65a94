//! The single-owner monitoring session.
//!
//! [`MonitorSession`] holds every piece of mutable per-session state (axis
//! filters, history, classifier, detector) and runs the per-sample pipeline:
//!
//! ```text
//! Sample -> AxisFilters -> SVM -> MotionHistory
//!                            |-> FallDetector -> AlertDispatcher
//!                            '-> MotionClassifier -> notices -> EventBus
//! ```
//!
//! Other threads never touch the live state. They read a [`SessionSnapshot`]
//! through a [`SnapshotHandle`], refreshed after every operation.

use std::net::SocketAddr;
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::alerting::AlertDispatcher;
use crate::config::{parse_step_target, MonitorConfig};
use crate::detection::{DetectionState, FallDetector, Transition};
use crate::error::ConfigError;
use crate::events::MonitorEvent;
use crate::filter::AxisFilters;
use crate::history::{HistorySnapshot, MotionHistory};
use crate::motion::{signal_vector_magnitude, ActivityLevel, MotionClassifier, MotionNotice};
use crate::sample::{GeoPoint, Sample};

/// Everything derived from one processed sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedRecord {
    /// Wall-clock processing time
    pub timestamp: DateTime<Utc>,
    /// Filtered acceleration `[x, y, z]`
    pub filtered: [f64; 3],
    /// Magnitude of the filtered acceleration
    pub svm: f64,
    /// Raw angular rate `[x, y, z]`
    pub gyro: [f64; 3],
    /// Ambient light reading
    pub light: f64,
    /// Battery percentage
    pub battery: i32,
    /// Raw SOS flag
    pub sos: i32,
    /// This sample's fix, if valid
    pub location: Option<GeoPoint>,
    /// Activity level after this sample
    pub activity: ActivityLevel,
    /// Detection state after this sample
    pub state: DetectionState,
    /// Step count after this sample
    pub steps: u64,
    /// Whether this sample counted a step
    pub step_counted: bool,
}

/// Consumer of processed records (persistence, export).
pub trait RecordSink: Send {
    /// Sink name for logs
    fn name(&self) -> &str;

    /// Accept one record. Must not block.
    fn record(&mut self, record: &ProcessedRecord);
}

/// Forwards records into a bounded channel, dropping when it is full.
pub struct ChannelRecordSink {
    tx: SyncSender<ProcessedRecord>,
    dropped: u64,
}

impl ChannelRecordSink {
    /// Create the sink and the receiving end.
    pub fn new(capacity: usize) -> (Self, Receiver<ProcessedRecord>) {
        let (tx, rx) = mpsc::sync_channel(capacity.max(1));
        (Self { tx, dropped: 0 }, rx)
    }

    /// Records dropped so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl RecordSink for ChannelRecordSink {
    fn name(&self) -> &str {
        "channel"
    }

    fn record(&mut self, record: &ProcessedRecord) {
        match self.tx.try_send(record.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => self.dropped += 1,
        }
    }
}

/// Read-only view of the session for other threads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// `None` until the first sample or command
    pub updated_at: Option<DateTime<Utc>>,
    /// Detection state, once a sample has been processed
    pub state: Option<DetectionState>,
    /// Latest activity level
    pub activity: Option<ActivityLevel>,
    /// Steps counted so far
    pub steps: u64,
    /// Active step target
    pub step_target: Option<u64>,
    /// Most recent filtered magnitude
    pub latest_svm: Option<f64>,
    /// Last valid fix seen this session
    pub last_location: Option<GeoPoint>,
    /// Device that sent the latest datagram
    pub peer: Option<SocketAddr>,
    /// Latest battery percentage
    pub battery: Option<i32>,
    /// Samples processed since start
    pub samples_processed: u64,
    /// Signal buffers for presentation
    pub history: HistorySnapshot,
}

/// Shared, clone-on-read access to the latest [`SessionSnapshot`].
#[derive(Debug, Clone, Default)]
pub struct SnapshotHandle {
    inner: Arc<RwLock<SessionSnapshot>>,
}

impl SnapshotHandle {
    /// Empty snapshot, as seen before the first sample.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the latest snapshot.
    pub fn get(&self) -> SessionSnapshot {
        self.inner.read().clone()
    }

    fn publish(&self, snapshot: SessionSnapshot) {
        *self.inner.write() = snapshot;
    }
}

/// Per-session pipeline state.
pub struct MonitorSession {
    filters: AxisFilters,
    history: MotionHistory,
    classifier: MotionClassifier,
    detector: FallDetector,
    dispatcher: AlertDispatcher,
    record_sinks: Vec<Box<dyn RecordSink>>,
    last_location: Option<GeoPoint>,
    last_battery: Option<i32>,
    samples_processed: u64,
    snapshots: SnapshotHandle,
}

impl MonitorSession {
    /// Build a session from validated configuration.
    ///
    /// `started_at` seeds the detector's settle window.
    pub fn new(config: &MonitorConfig, dispatcher: AlertDispatcher, started_at: Instant) -> Self {
        Self {
            filters: AxisFilters::new(&config.filter),
            history: MotionHistory::new(config.history),
            classifier: MotionClassifier::new(config.motion.clone()),
            detector: FallDetector::new(config.detection, started_at),
            dispatcher,
            record_sinks: Vec::new(),
            last_location: None,
            last_battery: None,
            samples_processed: 0,
            snapshots: SnapshotHandle::new(),
        }
    }

    /// Attach a record consumer.
    pub fn add_record_sink(&mut self, sink: Box<dyn RecordSink>) {
        tracing::debug!(sink = sink.name(), "Record sink attached");
        self.record_sinks.push(sink);
    }

    /// Handle through which other threads read snapshots.
    pub fn snapshot_handle(&self) -> SnapshotHandle {
        self.snapshots.clone()
    }

    /// Run the full pipeline for one sample received at `now`.
    pub fn process(&mut self, sample: &Sample, now: Instant) -> ProcessedRecord {
        self.samples_processed += 1;
        self.last_battery = Some(sample.battery);

        let filtered = self.filters.update(sample.accel());
        let svm = signal_vector_magnitude(filtered);
        self.history.push(filtered, svm);

        let location = sample.location();
        if location.is_some() {
            self.last_location = location;
        }

        if let Some(transition) = self.detector.evaluate(svm, sample.sos_flag(), now) {
            self.on_transition(&transition);
        }

        let previous_activity = self.classifier.activity();
        let alarm_clear = !self.detector.state().is_alarm();
        let classification = self.classifier.classify(filtered, now, alarm_clear);

        if previous_activity != Some(classification.activity) {
            tracing::debug!(
                from = previous_activity.map(|a| a.as_str()),
                to = classification.activity.as_str(),
                svm,
                "Activity changed"
            );
        }
        for notice in &classification.notices {
            self.on_notice(notice);
        }

        let record = ProcessedRecord {
            timestamp: Utc::now(),
            filtered,
            svm,
            gyro: sample.gyro(),
            light: sample.light,
            battery: sample.battery,
            sos: sample.sos,
            location,
            activity: classification.activity,
            state: self.detector.state(),
            steps: self.classifier.steps(),
            step_counted: classification.step_counted,
        };
        for sink in &mut self.record_sinks {
            sink.record(&record);
        }

        self.publish_snapshot();
        record
    }

    /// Operator clear, allowed from any state.
    pub fn manual_reset(&mut self, now: Instant) -> Transition {
        let transition = self.detector.reset(now);
        self.on_transition(&transition);
        self.publish_snapshot();
        transition
    }

    /// Zero the step counter.
    pub fn reset_steps(&mut self) {
        let previous = self.classifier.steps();
        self.classifier.reset_steps();
        tracing::info!(previous, "Step counter reset");
        self.publish_snapshot();
    }

    /// Replace the step target.
    pub fn set_step_target(&mut self, target: u64) {
        self.classifier.set_step_target(Some(target));
        tracing::info!(target, "Step target updated");
        self.publish_snapshot();
    }

    /// Parse and apply an operator-typed step target. On error the current
    /// target is kept.
    pub fn apply_step_target(&mut self, input: &str) -> Result<u64, ConfigError> {
        match parse_step_target(input) {
            Ok(target) => {
                self.set_step_target(target);
                Ok(target)
            }
            Err(e) => {
                tracing::warn!(
                    input,
                    current = self.classifier.step_target(),
                    error = %e,
                    "Rejected step target"
                );
                Err(e)
            }
        }
    }

    /// Current detection state.
    pub fn state(&self) -> DetectionState {
        self.detector.state()
    }

    /// Steps counted so far.
    pub fn steps(&self) -> u64 {
        self.classifier.steps()
    }

    /// Active step target, if any.
    pub fn step_target(&self) -> Option<u64> {
        self.classifier.step_target()
    }

    /// Latest activity level, if classified yet.
    pub fn activity(&self) -> Option<ActivityLevel> {
        self.classifier.activity()
    }

    /// Signal buffers and spectrum.
    pub fn history(&self) -> &MotionHistory {
        &self.history
    }

    /// Alert dispatcher, for its counters and peer.
    pub fn dispatcher(&self) -> &AlertDispatcher {
        &self.dispatcher
    }

    fn on_transition(&mut self, transition: &Transition) {
        if transition.from != transition.to {
            tracing::info!(
                from = transition.from.as_str(),
                to = transition.to.as_str(),
                "Detection state changed"
            );
        }
        self.dispatcher.dispatch(transition, self.last_location);
    }

    fn on_notice(&self, notice: &MotionNotice) {
        let timestamp = Utc::now();
        let event = match *notice {
            MotionNotice::ProlongedInactivity { idle_for } => {
                tracing::info!(idle_secs = idle_for.as_secs(), "Prolonged inactivity");
                MonitorEvent::ProlongedInactivity {
                    idle_secs: idle_for.as_secs(),
                    timestamp,
                }
            }
            MotionNotice::StepTargetReached { steps } => {
                tracing::info!(steps, "Step target reached");
                MonitorEvent::StepTargetReached { steps, timestamp }
            }
        };
        self.dispatcher.notify(event);
    }

    fn publish_snapshot(&self) {
        self.snapshots.publish(SessionSnapshot {
            updated_at: Some(Utc::now()),
            state: Some(self.detector.state()),
            activity: self.classifier.activity(),
            steps: self.classifier.steps(),
            step_target: self.classifier.step_target(),
            latest_svm: self.history.latest_svm(),
            last_location: self.last_location,
            peer: self.dispatcher.peer(),
            battery: self.last_battery,
            samples_processed: self.samples_processed,
            history: self.history.snapshot(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerting::testing::RecordingSink;
    use crate::alerting::AlertCommand;
    use crate::events::EventBus;
    use crate::peer::PeerTracker;
    use approx::assert_abs_diff_eq;
    use std::time::Duration;

    struct Fixture {
        session: MonitorSession,
        sink: RecordingSink,
        events: Receiver<MonitorEvent>,
        t0: Instant,
    }

    fn fixture() -> Fixture {
        let config = MonitorConfig::default();
        let sink = RecordingSink::default();
        let peers = PeerTracker::new();
        peers.observe("10.1.1.7:50000".parse().unwrap());
        let bus = EventBus::new();
        let events = bus.subscribe(64);
        let dispatcher = AlertDispatcher::new(Box::new(sink.clone()), peers, 5556, bus);
        let t0 = Instant::now();
        Fixture {
            session: MonitorSession::new(&config, dispatcher, t0),
            sink,
            events,
            t0,
        }
    }

    fn resting(sos: i32) -> Sample {
        Sample {
            ax: 0.0,
            ay: 0.0,
            az: 9.8,
            gx: 0.0,
            gy: 0.0,
            gz: 0.0,
            light: 300.0,
            battery: 77,
            sos,
            lat: 0.0,
            lon: 0.0,
        }
    }

    fn at(t0: Instant, ms: u64) -> Instant {
        t0 + Duration::from_millis(ms)
    }

    #[test]
    fn resting_stream_stays_normal() {
        let mut f = fixture();
        let mut last = None;
        for i in 0..90 {
            last = Some(f.session.process(&resting(0), at(f.t0, i * 33)));
        }
        let record = last.unwrap();
        assert_eq!(record.state, DetectionState::Normal);
        assert_eq!(record.activity, ActivityLevel::Resting);
        assert_abs_diff_eq!(record.svm, 9.8, epsilon = 0.05);
        assert!(f.sink.commands().is_empty());
    }

    #[test]
    fn spike_after_settle_raises_one_fall_alert() {
        let mut f = fixture();
        for i in 0..90 {
            f.session.process(&resting(0), at(f.t0, i * 33));
        }
        let spike = Sample {
            az: 1000.0,
            ..resting(0)
        };
        let record = f.session.process(&spike, at(f.t0, 3000));
        assert!(record.svm > 25.0);
        assert_eq!(record.state, DetectionState::Impact);
        assert_eq!(f.sink.commands(), vec![AlertCommand::Alert]);

        let falls = f
            .events
            .try_iter()
            .filter(|e| matches!(e, MonitorEvent::FallDetected { .. }))
            .count();
        assert_eq!(falls, 1);
    }

    #[test]
    fn sos_takes_priority_and_clears_on_ack() {
        let mut f = fixture();
        for i in 0..90 {
            f.session.process(&resting(0), at(f.t0, i * 33));
        }
        let sos_spike = Sample {
            az: 1000.0,
            ..resting(1)
        };
        assert_eq!(f.session.process(&sos_spike, at(f.t0, 3000)).state, DetectionState::Sos);
        assert_eq!(f.session.process(&resting(1), at(f.t0, 3033)).state, DetectionState::Sos);
        assert_eq!(f.session.process(&resting(2), at(f.t0, 3066)).state, DetectionState::Normal);

        assert_eq!(f.sink.commands(), vec![AlertCommand::Alert, AlertCommand::Safe]);
        let kinds: Vec<_> = f.events.try_iter().map(|e| e.event_type()).collect();
        assert_eq!(kinds, vec!["SosRaised", "FalsePositiveCleared"]);
    }

    #[test]
    fn manual_reset_stops_realerts() {
        let mut f = fixture();
        for i in 0..90 {
            f.session.process(&resting(0), at(f.t0, i * 33));
        }
        let spike = Sample {
            az: 1000.0,
            ..resting(0)
        };
        f.session.process(&spike, at(f.t0, 3000));
        let t = f.session.manual_reset(at(f.t0, 3100));
        assert_eq!(t.to, DetectionState::Normal);

        // the filtered magnitude is still high but the settle window restarted
        f.session.process(&resting(0), at(f.t0, 4000));
        assert_eq!(f.session.state(), DetectionState::Normal);
        assert_eq!(f.sink.commands(), vec![AlertCommand::Alert, AlertCommand::Safe]);
    }

    #[test]
    fn alarm_carries_last_valid_fix() {
        let mut f = fixture();
        let with_fix = Sample {
            lat: 48.85,
            lon: 2.35,
            ..resting(0)
        };
        f.session.process(&with_fix, at(f.t0, 0));
        f.session.process(&resting(1), at(f.t0, 33));

        let sos = f
            .events
            .try_iter()
            .find(|e| e.event_type() == "SosRaised")
            .unwrap();
        assert_eq!(sos.location(), GeoPoint::new(48.85, 2.35));
    }

    #[test]
    fn invalid_step_target_keeps_previous() {
        let mut f = fixture();
        assert_eq!(f.session.step_target(), Some(100));
        assert!(f.session.apply_step_target("lots").is_err());
        assert!(f.session.apply_step_target("0").is_err());
        assert_eq!(f.session.step_target(), Some(100));
        assert_eq!(f.session.apply_step_target(" 250 ").unwrap(), 250);
        assert_eq!(f.session.step_target(), Some(250));
    }

    #[test]
    fn snapshot_and_records_follow_processing() {
        let mut f = fixture();
        let (records, rx) = ChannelRecordSink::new(4);
        f.session.add_record_sink(Box::new(records));
        let handle = f.session.snapshot_handle();
        assert_eq!(handle.get().samples_processed, 0);

        for i in 0..6 {
            f.session.process(&resting(0), at(f.t0, i * 33));
        }

        let snap = handle.get();
        assert_eq!(snap.samples_processed, 6);
        assert_eq!(snap.state, Some(DetectionState::Normal));
        assert_eq!(snap.battery, Some(77));
        assert_eq!(snap.history.svm.len(), 6);
        assert_eq!(snap.peer, Some("10.1.1.7:50000".parse().unwrap()));

        // bounded at 4, the rest were dropped
        assert_eq!(rx.try_iter().count(), 4);
    }
}
