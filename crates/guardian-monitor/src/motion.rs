//! Activity classification and step counting.
//!
//! The classifier reads the filtered acceleration vector once per sample,
//! reduces it to its Euclidean norm (SVM) and derives:
//!
//! - an activity level from the distance between SVM and gravity,
//! - a step count from threshold crossings separated by a refractory gap,
//! - notifications for prolonged rest and for reaching the step target.
//!
//! Thresholds are fixed bands, not adaptive. Time is passed in explicitly.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::config::MotionConfig;

/// Coarse activity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActivityLevel {
    /// SVM within the resting band around gravity
    Resting,
    /// Between the resting and vigorous bands
    Active,
    /// SVM far from gravity
    Vigorous,
}

impl ActivityLevel {
    /// Lowercase name for logs and displays.
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityLevel::Resting => "resting",
            ActivityLevel::Active => "active",
            ActivityLevel::Vigorous => "vigorous",
        }
    }
}

/// Notification raised by the classifier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MotionNotice {
    /// Resting for longer than the inactivity limit.
    ProlongedInactivity {
        /// Time spent resting so far
        idle_for: Duration,
    },
    /// Step count just reached the configured target.
    StepTargetReached {
        /// Count at the moment of reaching the target
        steps: u64,
    },
}

/// Result of classifying one sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    /// Signal vector magnitude of the filtered axes
    pub svm: f64,
    /// Activity level after this sample
    pub activity: ActivityLevel,
    /// Whether this sample counted a step
    pub step_counted: bool,
    /// Notifications raised by this sample
    pub notices: Vec<MotionNotice>,
}

/// Stateful activity classifier and pedometer.
#[derive(Debug, Clone)]
pub struct MotionClassifier {
    config: MotionConfig,
    activity: Option<ActivityLevel>,
    last_activity_change: Option<Instant>,
    steps: u64,
    last_step: Option<Instant>,
    last_inactivity_notice: Option<Instant>,
}

/// Euclidean norm of a 3-vector.
pub fn signal_vector_magnitude(v: [f64; 3]) -> f64 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}

impl MotionClassifier {
    /// Create a classifier with no activity history and zero steps.
    pub fn new(config: MotionConfig) -> Self {
        Self {
            config,
            activity: None,
            last_activity_change: None,
            steps: 0,
            last_step: None,
            last_inactivity_notice: None,
        }
    }

    /// Map an SVM value onto an activity level.
    pub fn activity_for(&self, svm: f64) -> ActivityLevel {
        let deviation = (svm - self.config.gravity).abs();
        if deviation < self.config.resting_band {
            ActivityLevel::Resting
        } else if deviation > self.config.vigorous_band {
            ActivityLevel::Vigorous
        } else {
            ActivityLevel::Active
        }
    }

    /// Step threshold for the given activity level.
    pub fn step_threshold(&self, activity: ActivityLevel) -> f64 {
        match activity {
            ActivityLevel::Active => self.config.step_threshold_active,
            ActivityLevel::Resting | ActivityLevel::Vigorous => self.config.step_threshold_idle,
        }
    }

    /// Classify one filtered sample.
    ///
    /// `alarm_clear` is true while the detection state is NORMAL; inactivity
    /// is only reported then.
    pub fn classify(&mut self, filtered: [f64; 3], now: Instant, alarm_clear: bool) -> Classification {
        let svm = signal_vector_magnitude(filtered);
        let mut notices = Vec::new();

        let activity = self.activity_for(svm);
        if self.activity != Some(activity) {
            self.activity = Some(activity);
            self.last_activity_change = Some(now);
        }

        if let Some(idle_for) = self.check_inactivity(activity, now, alarm_clear) {
            notices.push(MotionNotice::ProlongedInactivity { idle_for });
        }

        let step_counted = self.check_step(svm, activity, now);
        if step_counted && self.config.step_target == Some(self.steps) {
            notices.push(MotionNotice::StepTargetReached { steps: self.steps });
        }

        Classification {
            svm,
            activity,
            step_counted,
            notices,
        }
    }

    fn check_inactivity(&mut self, activity: ActivityLevel, now: Instant, alarm_clear: bool) -> Option<Duration> {
        if !alarm_clear || activity != ActivityLevel::Resting {
            return None;
        }
        let since = self.last_activity_change?;
        let idle_for = now.saturating_duration_since(since);
        if idle_for <= Duration::from_secs(self.config.inactivity_after_secs) {
            return None;
        }
        let cooldown = Duration::from_secs(self.config.inactivity_cooldown_secs);
        if let Some(last) = self.last_inactivity_notice {
            if now.saturating_duration_since(last) < cooldown {
                return None;
            }
        }
        self.last_inactivity_notice = Some(now);
        Some(idle_for)
    }

    fn check_step(&mut self, svm: f64, activity: ActivityLevel, now: Instant) -> bool {
        if svm <= self.step_threshold(activity) {
            return false;
        }
        let refractory = Duration::from_millis(self.config.step_refractory_ms);
        if let Some(last) = self.last_step {
            if now.saturating_duration_since(last) < refractory {
                return false;
            }
        }
        self.steps += 1;
        self.last_step = Some(now);
        true
    }

    /// Steps counted since creation or the last reset.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Current activity level, `None` before the first sample.
    pub fn activity(&self) -> Option<ActivityLevel> {
        self.activity
    }

    /// Zero the step counter.
    pub fn reset_steps(&mut self) {
        self.steps = 0;
        self.last_step = None;
    }

    /// Configured step target.
    pub fn step_target(&self) -> Option<u64> {
        self.config.step_target
    }

    /// Replace the step target. Counting is unaffected.
    pub fn set_step_target(&mut self, target: Option<u64>) {
        self.config.step_target = target;
    }
}
