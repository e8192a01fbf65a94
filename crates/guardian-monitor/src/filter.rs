//! Per-axis noise filtering.
//!
//! Each acceleration axis runs its own scalar Kalman filter with a
//! random-walk state model and no control input:
//!
//! ```text
//! predict:  p ← p + q
//! gain:     k = p / (p + r)
//! correct:  x ← x + k·(z − x)
//!           p ← (1 − k)·p
//! ```
//!
//! With `q ≥ 0` and `r > 0` the gain stays in `[0, 1)`, so `p` never goes
//! negative.

use crate::config::FilterConfig;

/// Scalar Kalman filter state for one axis.
#[derive(Debug, Clone)]
pub struct ScalarKalman {
    /// Current estimate
    x: f64,
    /// Error covariance
    p: f64,
    /// Process noise
    q: f64,
    /// Measurement noise
    r: f64,
}

impl ScalarKalman {
    /// Create a filter with estimate 0 and the configured covariance.
    pub fn new(config: &FilterConfig) -> Self {
        Self {
            x: 0.0,
            p: config.initial_error.max(0.0),
            q: config.process_noise.max(0.0),
            r: config.measurement_noise,
        }
    }

    /// Fold one measurement into the estimate and return the new estimate.
    pub fn update(&mut self, measurement: f64) -> f64 {
        self.p += self.q;
        let denom = self.p + self.r;
        let k = if denom > 0.0 { self.p / denom } else { 0.0 };
        self.x += k * (measurement - self.x);
        self.p *= 1.0 - k;
        self.x
    }

    /// Current estimate.
    pub fn estimate(&self) -> f64 {
        self.x
    }

    /// Current error covariance.
    pub fn covariance(&self) -> f64 {
        self.p
    }
}

/// Three independent filters, one per spatial axis.
#[derive(Debug, Clone)]
pub struct AxisFilters {
    axes: [ScalarKalman; 3],
}

impl AxisFilters {
    /// Create three identically tuned filters.
    pub fn new(config: &FilterConfig) -> Self {
        Self {
            axes: [
                ScalarKalman::new(config),
                ScalarKalman::new(config),
                ScalarKalman::new(config),
            ],
        }
    }

    /// Filter one raw `[x, y, z]` measurement.
    pub fn update(&mut self, raw: [f64; 3]) -> [f64; 3] {
        [
            self.axes[0].update(raw[0]),
            self.axes[1].update(raw[1]),
            self.axes[2].update(raw[2]),
        ]
    }

    /// Current `[x, y, z]` estimates.
    pub fn estimates(&self) -> [f64; 3] {
        [
            self.axes[0].estimate(),
            self.axes[1].estimate(),
            self.axes[2].estimate(),
        ]
    }
}
