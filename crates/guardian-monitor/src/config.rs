//! Monitor configuration.
//!
//! [`MonitorConfig`] collects every tunable the pipeline reads: the listening
//! socket, the outbound command port, filter noise constants, detection
//! thresholds, step counting parameters and history sizes. It is supplied at
//! startup and stays immutable for the session; the only runtime change is
//! the step target, which goes through [`parse_step_target`].
//!
//! # Example
//!
//! ```rust
//! use guardian_monitor::config::MonitorConfig;
//!
//! let cfg = MonitorConfig::default();
//! cfg.validate().expect("default config is valid");
//!
//! assert_eq!(cfg.listener.port, 5555);
//! assert_eq!(cfg.alert.command_port, 5556);
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;

// ---------------------------------------------------------------------------
// MonitorConfig
// ---------------------------------------------------------------------------

/// Complete configuration for a monitoring session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct MonitorConfig {
    /// Inbound datagram socket.
    pub listener: ListenerConfig,
    /// Outbound alert commands.
    pub alert: AlertConfig,
    /// Per-axis noise filter tuning.
    pub filter: FilterConfig,
    /// Fall / SOS thresholds.
    pub detection: DetectionConfig,
    /// Activity classification and step counting.
    pub motion: MotionConfig,
    /// Signal history buffers.
    pub history: HistoryConfig,
    /// Event fan-out.
    pub events: EventConfig,
}

/// Inbound UDP listener settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Address to bind the UDP socket to. Default: **0.0.0.0**.
    pub bind_addr: String,
    /// Port to listen on; 0 lets the OS pick one. Default: **5555**.
    pub port: u16,
    /// Receive timeout that bounds shutdown latency. Default: **500 ms**.
    pub recv_timeout_ms: u64,
    /// Receive buffer size. Larger datagrams are truncated. Default: **1024**.
    pub max_datagram_bytes: usize,
    /// Capacity of the sample hand-off channel. Default: **256**.
    pub channel_capacity: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: 5555,
            recv_timeout_ms: 500,
            max_datagram_bytes: 1024,
            channel_capacity: 256,
        }
    }
}

impl ListenerConfig {
    /// `bind_addr:port` as a string suitable for `UdpSocket::bind`.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }

    /// Receive timeout as a [`Duration`].
    pub fn recv_timeout(&self) -> Duration {
        Duration::from_millis(self.recv_timeout_ms)
    }
}

/// Outbound command settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Port the device listens on for `ALERT` / `SAFE`. Default: **5556**.
    pub command_port: u16,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self { command_port: 5556 }
    }
}

/// Scalar Kalman filter tuning, shared by all three axes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Process noise `q`. Default: **1e-4**.
    pub process_noise: f64,
    /// Measurement noise `r`. Default: **5e-2**.
    pub measurement_noise: f64,
    /// Initial error covariance `p`. Default: **1.0**.
    pub initial_error: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            process_noise: 1e-4,
            measurement_noise: 5e-2,
            initial_error: 1.0,
        }
    }
}

/// Fall / SOS state machine thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// SVM above which a fall is declared. Default: **25.0**.
    pub impact_threshold: f64,
    /// Minimum time since the last transition before a new impact counts.
    /// Default: **2.0 s**.
    pub settle_secs: f64,
    /// Interval between repeated fall alerts while in IMPACT. Default: **3.0 s**.
    pub realert_secs: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            impact_threshold: 25.0,
            settle_secs: 2.0,
            realert_secs: 3.0,
        }
    }
}

/// Upper bound for the settle and re-alert windows.
pub const MAX_DETECTION_WINDOW_SECS: f64 = 3600.0;

impl DetectionConfig {
    /// Settle window as a [`Duration`].
    pub fn settle(&self) -> Duration {
        window(self.settle_secs)
    }

    /// Re-alert interval as a [`Duration`].
    pub fn realert(&self) -> Duration {
        window(self.realert_secs)
    }
}

// Saturates instead of panicking on values `validate` would reject.
fn window(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs.clamp(0.0, MAX_DETECTION_WINDOW_SECS)).unwrap_or_default()
}

/// Activity classification and step counting parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    /// Reference magnitude at rest. Default: **9.8**.
    pub gravity: f64,
    /// `|svm - gravity|` below this is RESTING. Default: **0.8**.
    pub resting_band: f64,
    /// `|svm - gravity|` above this is VIGOROUS. Default: **5.0**.
    pub vigorous_band: f64,
    /// Step threshold while ACTIVE. Default: **10.6**.
    pub step_threshold_active: f64,
    /// Step threshold while RESTING or VIGOROUS. Default: **11.2**.
    pub step_threshold_idle: f64,
    /// Minimum gap between two counted steps. Default: **300 ms**.
    pub step_refractory_ms: u64,
    /// RESTING duration before inactivity is reported. Default: **30 s**.
    pub inactivity_after_secs: u64,
    /// Minimum gap between two inactivity reports. Default: **10 s**.
    pub inactivity_cooldown_secs: u64,
    /// Step count that triggers a target-reached event. Default: **100**.
    pub step_target: Option<u64>,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            gravity: 9.8,
            resting_band: 0.8,
            vigorous_band: 5.0,
            step_threshold_active: 10.6,
            step_threshold_idle: 11.2,
            step_refractory_ms: 300,
            inactivity_after_secs: 30,
            inactivity_cooldown_secs: 10,
            step_target: Some(100),
        }
    }
}

/// Ring buffer sizes and spectrum parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Samples retained per signal. Default: **300**.
    pub capacity: usize,
    /// Poincaré lag pairs retained. Default: **100**.
    pub lag_capacity: usize,
    /// Samples per spectrum window. Default: **128**.
    pub spectrum_window: usize,
    /// Nominal device sample rate used for bin frequencies. Default: **30 Hz**.
    pub sample_rate_hz: f64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            capacity: 300,
            lag_capacity: 100,
            spectrum_window: 128,
            sample_rate_hz: 30.0,
        }
    }
}

/// Event fan-out settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventConfig {
    /// Default queue depth for a new subscriber. Default: **64**.
    pub subscriber_capacity: usize,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            subscriber_capacity: 64,
        }
    }
}

impl MonitorConfig {
    /// Load configuration from a JSON file and validate it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::FileRead`] if the file cannot be opened,
    /// [`ConfigError::ParseError`] if the JSON is malformed, and
    /// [`ConfigError::InvalidValue`] if a field fails validation.
    pub fn from_json(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        let cfg: MonitorConfig =
            serde_json::from_str(&contents).map_err(|source| ConfigError::ParseError {
                path: path.to_path_buf(),
                source,
            })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Write this configuration as pretty-printed JSON.
    pub fn to_json(&self, path: &Path) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::invalid_value("(serialization)", e.to_string()))?;
        std::fs::write(path, json).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Check every field for consistency.
    ///
    /// Returns the first violation found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Listener
        if self.listener.bind_addr.trim().is_empty() {
            return Err(ConfigError::invalid_value("listener.bind_addr", "must not be empty"));
        }
        if self.listener.recv_timeout_ms == 0 {
            return Err(ConfigError::invalid_value(
                "listener.recv_timeout_ms",
                "must be > 0 so the worker can observe shutdown",
            ));
        }
        if self.listener.max_datagram_bytes < 64 {
            return Err(ConfigError::invalid_value(
                "listener.max_datagram_bytes",
                "must be >= 64",
            ));
        }
        if self.listener.channel_capacity == 0 {
            return Err(ConfigError::invalid_value("listener.channel_capacity", "must be > 0"));
        }

        // Alert
        if self.alert.command_port == 0 {
            return Err(ConfigError::invalid_value("alert.command_port", "must be > 0"));
        }

        // Filter
        let f = &self.filter;
        if !f.process_noise.is_finite() || f.process_noise < 0.0 {
            return Err(ConfigError::invalid_value("filter.process_noise", "must be finite and >= 0"));
        }
        if !f.measurement_noise.is_finite() || f.measurement_noise <= 0.0 {
            return Err(ConfigError::invalid_value(
                "filter.measurement_noise",
                "must be finite and > 0",
            ));
        }
        if !f.initial_error.is_finite() || f.initial_error < 0.0 {
            return Err(ConfigError::invalid_value("filter.initial_error", "must be finite and >= 0"));
        }

        // Detection
        let d = &self.detection;
        if !d.impact_threshold.is_finite() || d.impact_threshold <= 0.0 {
            return Err(ConfigError::invalid_value("detection.impact_threshold", "must be > 0"));
        }
        for (field, value) in [
            ("detection.settle_secs", d.settle_secs),
            ("detection.realert_secs", d.realert_secs),
        ] {
            if !(0.0..=MAX_DETECTION_WINDOW_SECS).contains(&value) {
                return Err(ConfigError::invalid_value(
                    field,
                    format!("must be in [0, {MAX_DETECTION_WINDOW_SECS}]"),
                ));
            }
        }

        // Motion
        let m = &self.motion;
        for (field, value) in [
            ("motion.gravity", m.gravity),
            ("motion.resting_band", m.resting_band),
            ("motion.vigorous_band", m.vigorous_band),
            ("motion.step_threshold_active", m.step_threshold_active),
            ("motion.step_threshold_idle", m.step_threshold_idle),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::invalid_value(field, "must be finite and > 0"));
            }
        }
        if m.resting_band >= m.vigorous_band {
            return Err(ConfigError::invalid_value(
                "motion.resting_band",
                format!("must be below vigorous_band ({})", m.vigorous_band),
            ));
        }
        if m.step_target == Some(0) {
            return Err(ConfigError::invalid_value("motion.step_target", "must be > 0 when set"));
        }

        // History
        let h = &self.history;
        if h.capacity == 0 {
            return Err(ConfigError::invalid_value("history.capacity", "must be > 0"));
        }
        if h.lag_capacity == 0 {
            return Err(ConfigError::invalid_value("history.lag_capacity", "must be > 0"));
        }
        if h.spectrum_window < 4 || h.spectrum_window > h.capacity {
            return Err(ConfigError::invalid_value(
                "history.spectrum_window",
                format!("must be in [4, {}]", h.capacity),
            ));
        }
        if !h.sample_rate_hz.is_finite() || h.sample_rate_hz <= 0.0 {
            return Err(ConfigError::invalid_value("history.sample_rate_hz", "must be > 0"));
        }

        if self.events.subscriber_capacity == 0 {
            return Err(ConfigError::invalid_value("events.subscriber_capacity", "must be > 0"));
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Operator input
// ---------------------------------------------------------------------------

/// Parse a port typed by an operator.
pub fn parse_port(input: &str) -> Result<u16, ConfigError> {
    match input.trim().parse::<u16>() {
        Ok(0) => Err(ConfigError::invalid_value("port", "must be > 0")),
        Ok(port) => Ok(port),
        Err(e) => Err(ConfigError::invalid_value("port", format!("{input:?}: {e}"))),
    }
}

/// Parse a step target typed by an operator.
pub fn parse_step_target(input: &str) -> Result<u64, ConfigError> {
    match input.trim().parse::<u64>() {
        Ok(0) => Err(ConfigError::invalid_value("step_target", "must be > 0")),
        Ok(target) => Ok(target),
        Err(e) => Err(ConfigError::invalid_value("step_target", format!("{input:?}: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_config_is_valid() {
        MonitorConfig::default().validate().unwrap();
    }

    #[test]
    fn json_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("monitor.json");

        let mut original = MonitorConfig::default();
        original.listener.port = 6000;
        original.motion.step_target = Some(250);
        original.to_json(&path).unwrap();

        let loaded = MonitorConfig::from_json(&path).unwrap();
        assert_eq!(loaded, original);
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("partial.json");
        std::fs::write(&path, r#"{ "detection": { "impact_threshold": 30.0 } }"#).unwrap();

        let loaded = MonitorConfig::from_json(&path).unwrap();
        assert_eq!(loaded.detection.impact_threshold, 30.0);
        assert_eq!(loaded.detection.settle_secs, 2.0);
        assert_eq!(loaded.listener.port, 5555);
    }

    #[test]
    fn malformed_json_is_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = MonitorConfig::from_json(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn missing_file_is_file_read_error() {
        let err = MonitorConfig::from_json(Path::new("/nonexistent/monitor.json")).unwrap_err();
        assert!(matches!(err, ConfigError::FileRead { .. }));
    }

    #[test]
    fn zero_command_port_is_invalid() {
        let mut cfg = MonitorConfig::default();
        cfg.alert.command_port = 0;
        assert!(cfg.validate().is_err());

        // an OS-assigned listener port is fine
        let mut cfg = MonitorConfig::default();
        cfg.listener.port = 0;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn non_positive_measurement_noise_is_invalid() {
        let mut cfg = MonitorConfig::default();
        cfg.filter.measurement_noise = 0.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn overlapping_activity_bands_are_invalid() {
        let mut cfg = MonitorConfig::default();
        cfg.motion.resting_band = 6.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn oversized_detection_windows_are_invalid() {
        let mut cfg = MonitorConfig::default();
        cfg.detection.settle_secs = 1e20;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidValue { field: "detection.settle_secs", .. })
        ));

        let mut cfg = MonitorConfig::default();
        cfg.detection.realert_secs = MAX_DETECTION_WINDOW_SECS + 1.0;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidValue { field: "detection.realert_secs", .. })
        ));

        let mut cfg = MonitorConfig::default();
        cfg.detection.settle_secs = MAX_DETECTION_WINDOW_SECS;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn window_conversion_saturates() {
        let cfg = DetectionConfig {
            settle_secs: 1e20,
            realert_secs: f64::NAN,
            ..DetectionConfig::default()
        };
        assert_eq!(cfg.settle(), Duration::from_secs(3600));
        assert_eq!(cfg.realert(), Duration::ZERO);
    }

    #[test]
    fn spectrum_window_larger_than_history_is_invalid() {
        let mut cfg = MonitorConfig::default();
        cfg.history.spectrum_window = 512;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn operator_port_input() {
        assert_eq!(parse_port(" 5555 ").unwrap(), 5555);
        assert!(parse_port("abc").is_err());
        assert!(parse_port("0").is_err());
        assert!(parse_port("70000").is_err());
    }

    #[test]
    fn operator_step_target_input() {
        assert_eq!(parse_step_target("120").unwrap(), 120);
        assert!(parse_step_target("").is_err());
        assert!(parse_step_target("12.5").is_err());
        assert!(parse_step_target("0").is_err());
    }
}
