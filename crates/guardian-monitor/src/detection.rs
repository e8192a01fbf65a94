//! Fall / SOS detection state machine.
//!
//! ```text
//! From      Condition                                  To       Alert
//! ------    -----------------------------------------  -------  ------
//! NORMAL    svm > impact_threshold, settle elapsed     IMPACT   fall
//! IMPACT    realert interval elapsed                   IMPACT   fall
//! any≠SOS   flag = 1                                   SOS      sos
//! any≠NORM  flag = 2                                   NORMAL   safe
//! any       manual reset                               NORMAL   safe
//! ```
//!
//! SOS has priority: while in SOS, fall evaluation is skipped entirely and
//! only a false-positive acknowledgement or a manual reset leaves it. The
//! machine is a pure function of `(svm, flag, now)` and its own state.

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::config::DetectionConfig;
use crate::sample::SosFlag;

/// Alarm state of the monitored person.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DetectionState {
    /// No alarm
    Normal,
    /// A fall-level impact was detected
    Impact,
    /// The wearer raised SOS
    Sos,
}

impl DetectionState {
    /// Uppercase name for logs and displays.
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionState::Normal => "NORMAL",
            DetectionState::Impact => "IMPACT",
            DetectionState::Sos => "SOS",
        }
    }

    /// Whether an alarm is active.
    pub fn is_alarm(&self) -> bool {
        !matches!(self, DetectionState::Normal)
    }
}

/// Why a transition happened.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TransitionReason {
    /// First impact above threshold
    Impact {
        /// Magnitude that triggered the alarm
        svm: f64,
    },
    /// Periodic re-alert while still in IMPACT
    ImpactRepeat {
        /// Magnitude at the time of the repeat
        svm: f64,
    },
    /// Device reported SOS
    SosRaised,
    /// Device acknowledged a false positive
    FalsePositiveAck,
    /// Operator cleared the alarm
    ManualReset,
}

/// A state change (or repeat alert) produced by the machine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transition {
    /// State before
    pub from: DetectionState,
    /// State after
    pub to: DetectionState,
    /// Cause
    pub reason: TransitionReason,
    /// When it happened
    pub at: Instant,
}

impl Transition {
    /// Whether this transition should raise an alert on the device.
    pub fn is_alert(&self) -> bool {
        matches!(
            self.reason,
            TransitionReason::Impact { .. }
                | TransitionReason::ImpactRepeat { .. }
                | TransitionReason::SosRaised
        )
    }
}

/// The fall / SOS state machine.
#[derive(Debug, Clone)]
pub struct FallDetector {
    config: DetectionConfig,
    state: DetectionState,
    last_transition: Instant,
    last_alert: Option<Instant>,
}

impl FallDetector {
    /// Start in NORMAL; `started_at` counts as the last transition, so no
    /// impact is accepted during the first settle window.
    pub fn new(config: DetectionConfig, started_at: Instant) -> Self {
        Self {
            config,
            state: DetectionState::Normal,
            last_transition: started_at,
            last_alert: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> DetectionState {
        self.state
    }

    /// Time of the last alert (entry or repeat), if any.
    pub fn last_alert(&self) -> Option<Instant> {
        self.last_alert
    }

    /// Evaluate one sample.
    pub fn evaluate(&mut self, svm: f64, flag: SosFlag, now: Instant) -> Option<Transition> {
        match flag {
            SosFlag::FalsePositiveAck if self.state != DetectionState::Normal => {
                Some(self.enter(DetectionState::Normal, TransitionReason::FalsePositiveAck, now))
            }
            SosFlag::Raised => {
                if self.state == DetectionState::Sos {
                    return None;
                }
                let t = self.enter(DetectionState::Sos, TransitionReason::SosRaised, now);
                self.last_alert = Some(now);
                Some(t)
            }
            _ => self.evaluate_fall(svm, now),
        }
    }

    fn evaluate_fall(&mut self, svm: f64, now: Instant) -> Option<Transition> {
        match self.state {
            DetectionState::Sos => None,
            DetectionState::Normal => {
                let settled =
                    now.saturating_duration_since(self.last_transition) >= self.config.settle();
                if svm > self.config.impact_threshold && settled {
                    let t = self.enter(DetectionState::Impact, TransitionReason::Impact { svm }, now);
                    self.last_alert = Some(now);
                    Some(t)
                } else {
                    None
                }
            }
            DetectionState::Impact => {
                let due = match self.last_alert {
                    Some(last) => now.saturating_duration_since(last) >= self.config.realert(),
                    None => true,
                };
                if !due {
                    return None;
                }
                self.last_alert = Some(now);
                Some(Transition {
                    from: DetectionState::Impact,
                    to: DetectionState::Impact,
                    reason: TransitionReason::ImpactRepeat { svm },
                    at: now,
                })
            }
        }
    }

    /// Operator clear. Always allowed, from any state.
    pub fn reset(&mut self, now: Instant) -> Transition {
        self.enter(DetectionState::Normal, TransitionReason::ManualReset, now)
    }

    fn enter(&mut self, to: DetectionState, reason: TransitionReason, now: Instant) -> Transition {
        let from = self.state;
        self.state = to;
        self.last_transition = now;
        if to == DetectionState::Normal {
            self.last_alert = None;
        }
        Transition {
            from,
            to,
            reason,
            at: now,
        }
    }
}
