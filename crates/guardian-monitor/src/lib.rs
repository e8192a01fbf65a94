//! # Guardian Monitor
//!
//! Real-time fall, SOS and activity monitoring for a wearable that streams
//! inertial and ambient readings over UDP.
//!
//! ## Pipeline
//!
//! ```text
//! UDP datagram ─> SampleDecoder ─> AxisFilters (x3 Kalman) ─> SVM
//!                                                              │
//!        ┌─────────────────────────────┬───────────────────────┤
//!        ▼                             ▼                       ▼
//!  FallDetector                MotionClassifier          MotionHistory
//!  (NORMAL/IMPACT/SOS)         (activity, steps)         (buffers, FFT)
//!        │                             │
//!        ▼                             ▼
//!  AlertDispatcher ─> "ALERT"/"SAFE" datagram to the device
//!        └──────────> MonitorEvent ─> EventBus subscribers
//! ```
//!
//! - **Ingress**: one worker thread owns the listening socket and hands
//!   decoded samples to the processing thread over a bounded channel.
//! - **Session**: a single owner applies samples and operator commands in
//!   arrival order; other threads read snapshots.
//! - **Events**: fire-and-forget, bounded per subscriber, dropped when full.
//!
//! ## Example
//!
//! ```rust,no_run
//! use guardian_monitor::{Monitor, MonitorConfig, MonitorEvent};
//!
//! fn main() -> guardian_monitor::Result<()> {
//!     let handle = Monitor::start(MonitorConfig::default())?;
//!     let events = handle.events();
//!
//!     for event in events.iter() {
//!         if let MonitorEvent::FallDetected { svm, .. } = event {
//!             println!("fall detected, svm = {svm:.1}");
//!             handle.manual_reset()?;
//!         }
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

pub mod alerting;
pub mod config;
pub mod decoder;
pub mod detection;
pub mod error;
pub mod events;
pub mod filter;
pub mod history;
pub mod ingress;
pub mod motion;
pub mod peer;
pub mod runtime;
pub mod sample;
pub mod session;

pub use alerting::{AlertCommand, AlertDispatcher, CommandSink, DispatchStats, UdpCommandSink};
pub use config::{
    parse_port, parse_step_target, AlertConfig, DetectionConfig, EventConfig, FilterConfig,
    HistoryConfig, ListenerConfig, MonitorConfig, MotionConfig,
};
pub use decoder::SampleDecoder;
pub use detection::{DetectionState, FallDetector, Transition, TransitionReason};
pub use error::{ConfigError, DecodeError, MonitorError, Result, TransportError};
pub use events::{EventBus, MonitorEvent};
pub use filter::{AxisFilters, ScalarKalman};
pub use history::{HistorySnapshot, MotionHistory, Spectrum};
pub use ingress::{DatagramHandler, InboundSample, IngressListener, IngressStats};
pub use motion::{signal_vector_magnitude, ActivityLevel, Classification, MotionClassifier, MotionNotice};
pub use peer::PeerTracker;
pub use runtime::{ControlCommand, Monitor, MonitorHandle, MonitorInput};
pub use sample::{GeoPoint, Sample, SosFlag};
pub use session::{
    ChannelRecordSink, MonitorSession, ProcessedRecord, RecordSink, SessionSnapshot, SnapshotHandle,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
