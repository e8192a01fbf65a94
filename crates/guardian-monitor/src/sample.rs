//! Sensor sample types.
//!
//! A [`Sample`] is the decoded form of one inbound datagram. It is consumed
//! once by the session and then dropped; only derived state outlives it.

use serde::{Deserialize, Serialize};

/// Coordinates closer than this to zero (in degrees) mean "no fix".
const NO_FIX_EPSILON_DEG: f64 = 0.1;

/// One decoded sensor reading from the wearable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Acceleration X (m/s²)
    pub ax: f64,
    /// Acceleration Y (m/s²)
    pub ay: f64,
    /// Acceleration Z (m/s²)
    pub az: f64,
    /// Angular rate X (rad/s)
    pub gx: f64,
    /// Angular rate Y (rad/s)
    pub gy: f64,
    /// Angular rate Z (rad/s)
    pub gz: f64,
    /// Ambient light (lux)
    pub light: f64,
    /// Battery level (percent)
    pub battery: i32,
    /// Raw SOS flag as sent by the device
    pub sos: i32,
    /// Latitude (degrees)
    pub lat: f64,
    /// Longitude (degrees)
    pub lon: f64,
}

impl Sample {
    /// Raw acceleration vector `[ax, ay, az]`.
    pub fn accel(&self) -> [f64; 3] {
        [self.ax, self.ay, self.az]
    }

    /// Raw angular rate vector `[gx, gy, gz]`.
    pub fn gyro(&self) -> [f64; 3] {
        [self.gx, self.gy, self.gz]
    }

    /// Interpreted SOS flag.
    pub fn sos_flag(&self) -> SosFlag {
        SosFlag::from_raw(self.sos)
    }

    /// GPS position, or `None` when the device has no fix.
    pub fn location(&self) -> Option<GeoPoint> {
        GeoPoint::new(self.lat, self.lon)
    }

    /// Render in the comma-separated wire format.
    pub fn to_wire(&self) -> String {
        format!(
            "{},{},{},{},{},{},{},{},{},{},{}",
            self.ax,
            self.ay,
            self.az,
            self.gx,
            self.gy,
            self.gz,
            self.light,
            self.battery,
            self.sos,
            self.lat,
            self.lon,
        )
    }
}

/// Device-reported emergency flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SosFlag {
    /// No emergency (0, or any unrecognised value)
    Clear,
    /// Wearer pressed SOS (1)
    Raised,
    /// Wearer confirmed the last alarm was false (2)
    FalsePositiveAck,
}

impl SosFlag {
    /// Map the wire integer onto a flag.
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            1 => SosFlag::Raised,
            2 => SosFlag::FalsePositiveAck,
            _ => SosFlag::Clear,
        }
    }
}

/// A valid GPS fix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Latitude (degrees)
    pub lat: f64,
    /// Longitude (degrees)
    pub lon: f64,
}

impl GeoPoint {
    /// Build a fix, rejecting non-finite values and the near-zero "no fix"
    /// pair reported by devices without satellite lock.
    pub fn new(lat: f64, lon: f64) -> Option<Self> {
        if !lat.is_finite() || !lon.is_finite() {
            return None;
        }
        if lat.abs() < NO_FIX_EPSILON_DEG && lon.abs() < NO_FIX_EPSILON_DEG {
            return None;
        }
        Some(Self { lat, lon })
    }
}
