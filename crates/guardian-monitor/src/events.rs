//! Events published to external consumers (logging, voice, map, UI).
//!
//! Delivery is fire-and-forget: every subscriber owns a bounded queue, a full
//! queue drops the event, and a subscriber that hung up is pruned on the next
//! publish. Publishing never blocks the processing path.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::sample::GeoPoint;

/// Everything the monitor reports outward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MonitorEvent {
    /// Datagrams started arriving from a new address
    NewDeviceConnected {
        /// Source address of the device
        addr: SocketAddr,
        /// When the first datagram arrived
        timestamp: DateTime<Utc>,
    },

    /// Fall alarm raised or repeated
    FallDetected {
        /// Filtered magnitude at the time of the alert
        svm: f64,
        /// `true` for the periodic repeats while still in IMPACT
        repeat: bool,
        /// Last valid fix, if any
        location: Option<GeoPoint>,
        /// When the alert was sent
        timestamp: DateTime<Utc>,
    },

    /// Wearer raised SOS
    SosRaised {
        /// Last valid fix, if any
        location: Option<GeoPoint>,
        /// When the alert was sent
        timestamp: DateTime<Utc>,
    },

    /// Device acknowledged a false alarm
    FalsePositiveCleared {
        /// When the alarm was cleared
        timestamp: DateTime<Utc>,
    },

    /// Operator cleared the alarm
    ManualCleared {
        /// When the alarm was cleared
        timestamp: DateTime<Utc>,
    },

    /// Wearer has been resting for a long time
    ProlongedInactivity {
        /// Seconds spent resting so far
        idle_secs: u64,
        /// When the notice was raised
        timestamp: DateTime<Utc>,
    },

    /// Step count reached the configured target
    StepTargetReached {
        /// Step count at the crossing
        steps: u64,
        /// When the target was reached
        timestamp: DateTime<Utc>,
    },
}

impl MonitorEvent {
    /// Get the timestamp
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::NewDeviceConnected { timestamp, .. } => *timestamp,
            Self::FallDetected { timestamp, .. } => *timestamp,
            Self::SosRaised { timestamp, .. } => *timestamp,
            Self::FalsePositiveCleared { timestamp } => *timestamp,
            Self::ManualCleared { timestamp } => *timestamp,
            Self::ProlongedInactivity { timestamp, .. } => *timestamp,
            Self::StepTargetReached { timestamp, .. } => *timestamp,
        }
    }

    /// Get the event type name
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::NewDeviceConnected { .. } => "NewDeviceConnected",
            Self::FallDetected { .. } => "FallDetected",
            Self::SosRaised { .. } => "SosRaised",
            Self::FalsePositiveCleared { .. } => "FalsePositiveCleared",
            Self::ManualCleared { .. } => "ManualCleared",
            Self::ProlongedInactivity { .. } => "ProlongedInactivity",
            Self::StepTargetReached { .. } => "StepTargetReached",
        }
    }

    /// Location that should be revealed on a map, if the event carries one.
    pub fn location(&self) -> Option<GeoPoint> {
        match self {
            Self::FallDetected { location, .. } | Self::SosRaised { location, .. } => *location,
            _ => None,
        }
    }
}

/// Fan-out of [`MonitorEvent`]s to bounded subscriber queues.
///
/// Cloning yields another handle to the same subscriber list.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

#[derive(Default)]
struct BusInner {
    subscribers: Mutex<Vec<SyncSender<MonitorEvent>>>,
    dropped: AtomicU64,
}

impl EventBus {
    /// Create a bus with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber with a queue of `capacity` events.
    pub fn subscribe(&self, capacity: usize) -> Receiver<MonitorEvent> {
        let (tx, rx) = mpsc::sync_channel(capacity.max(1));
        self.inner.subscribers.lock().push(tx);
        rx
    }

    /// Deliver an event to every live subscriber without blocking.
    pub fn publish(&self, event: MonitorEvent) {
        let mut subscribers = self.inner.subscribers.lock();
        subscribers.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(event = event.event_type(), "subscriber queue full, event dropped");
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }

    /// Events dropped because a subscriber queue was full.
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .field("dropped", &self.dropped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cleared() -> MonitorEvent {
        MonitorEvent::ManualCleared {
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn every_subscriber_gets_a_copy() {
        let bus = EventBus::new();
        let a = bus.subscribe(4);
        let b = bus.subscribe(4);
        bus.publish(cleared());
        assert_eq!(a.try_recv().unwrap().event_type(), "ManualCleared");
        assert_eq!(b.try_recv().unwrap().event_type(), "ManualCleared");
    }

    #[test]
    fn full_queue_drops_instead_of_blocking() {
        let bus = EventBus::new();
        let rx = bus.subscribe(2);
        for _ in 0..5 {
            bus.publish(cleared());
        }
        assert_eq!(bus.dropped(), 3);
        assert_eq!(rx.try_iter().count(), 2);
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn disconnected_subscribers_are_pruned() {
        let bus = EventBus::new();
        let rx = bus.subscribe(2);
        drop(rx);
        let _keep = bus.subscribe(2);
        bus.publish(cleared());
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn json_carries_type_tag() {
        let event = MonitorEvent::SosRaised {
            location: GeoPoint::new(39.9, 116.4),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "SosRaised");
        assert_eq!(json["location"]["lat"], 39.9);
        assert_eq!(event.location().unwrap().lon, 116.4);
    }
}
