//! Bounded signal history for presentation consumers.
//!
//! Keeps the most recent filtered axes and SVM values in fixed-capacity ring
//! buffers (oldest evicted first), the Poincaré lag pairs `(svm[n-1], svm[n])`,
//! and computes an amplitude spectrum of the SVM on demand. The detection
//! logic never reads from here; it only appends.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use rustfft::num_complex::Complex64;
use rustfft::{Fft, FftPlanner};
use serde::{Deserialize, Serialize};

use crate::config::HistoryConfig;

/// Ring buffers of derived signals.
#[derive(Debug, Clone)]
pub struct MotionHistory {
    x: VecDeque<f64>,
    y: VecDeque<f64>,
    z: VecDeque<f64>,
    svm: VecDeque<f64>,
    lag_pairs: VecDeque<(f64, f64)>,
    plan: SpectrumPlan,
    config: HistoryConfig,
}

/// Forward FFT planned once for the configured window.
#[derive(Clone)]
struct SpectrumPlan(Option<Arc<dyn Fft<f64>>>);

impl SpectrumPlan {
    fn new(len: usize) -> Self {
        if len == 0 {
            return Self(None);
        }
        Self(Some(FftPlanner::new().plan_fft_forward(len)))
    }
}

impl fmt::Debug for SpectrumPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SpectrumPlan").field(&self.0.is_some()).finish()
    }
}

/// Single-sided amplitude spectrum of the SVM signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spectrum {
    /// Bin centre frequencies in Hz (DC excluded)
    pub frequencies: Vec<f64>,
    /// Amplitude per bin
    pub amplitudes: Vec<f64>,
}

impl Spectrum {
    /// Frequency of the strongest bin, if any.
    pub fn dominant_frequency(&self) -> Option<f64> {
        self.amplitudes
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| self.frequencies[i])
    }
}

/// Owned copy of the history for rendering on another thread.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistorySnapshot {
    /// Filtered X, oldest first
    pub x: Vec<f64>,
    /// Filtered Y, oldest first
    pub y: Vec<f64>,
    /// Filtered Z, oldest first
    pub z: Vec<f64>,
    /// SVM, oldest first
    pub svm: Vec<f64>,
    /// Poincaré points `(svm[n-1], svm[n])`
    pub lag_pairs: Vec<(f64, f64)>,
    /// Spectrum of the latest window, once enough samples exist
    pub spectrum: Option<Spectrum>,
}

impl MotionHistory {
    /// Create empty buffers sized from `config`.
    pub fn new(config: HistoryConfig) -> Self {
        Self {
            x: VecDeque::with_capacity(config.capacity),
            y: VecDeque::with_capacity(config.capacity),
            z: VecDeque::with_capacity(config.capacity),
            svm: VecDeque::with_capacity(config.capacity),
            lag_pairs: VecDeque::with_capacity(config.lag_capacity),
            plan: SpectrumPlan::new(config.spectrum_window),
            config,
        }
    }

    /// Append one filtered sample and its SVM.
    pub fn push(&mut self, filtered: [f64; 3], svm: f64) {
        let cap = self.config.capacity;
        push_bounded(&mut self.x, filtered[0], cap);
        push_bounded(&mut self.y, filtered[1], cap);
        push_bounded(&mut self.z, filtered[2], cap);
        push_bounded(&mut self.svm, svm, cap);

        if let Some(pair) = self.last_two_svm() {
            push_bounded(&mut self.lag_pairs, pair, self.config.lag_capacity);
        }
    }

    /// Number of samples currently held.
    pub fn len(&self) -> usize {
        self.svm.len()
    }

    /// Whether nothing has been pushed yet.
    pub fn is_empty(&self) -> bool {
        self.svm.is_empty()
    }

    /// Most recent SVM value.
    pub fn latest_svm(&self) -> Option<f64> {
        self.svm.back().copied()
    }

    /// The two most recent SVM values as `(previous, current)`.
    pub fn last_two_svm(&self) -> Option<(f64, f64)> {
        let n = self.svm.len();
        if n < 2 {
            return None;
        }
        Some((self.svm[n - 2], self.svm[n - 1]))
    }

    /// Amplitude spectrum of the latest `spectrum_window` SVM values.
    ///
    /// The window mean is removed first, amplitudes are scaled by `2/N`, and
    /// the DC bin is dropped. Returns `None` until the window is full.
    pub fn spectrum(&self) -> Option<Spectrum> {
        let n = self.config.spectrum_window;
        let fft = self.plan.0.as_ref()?;
        if self.svm.len() < n {
            return None;
        }

        let window: Vec<f64> = self.svm.iter().skip(self.svm.len() - n).copied().collect();
        let mean = window.iter().sum::<f64>() / n as f64;
        let mut buffer: Vec<Complex64> = window
            .iter()
            .map(|v| Complex64::new(v - mean, 0.0))
            .collect();

        fft.process(&mut buffer);

        let resolution = self.config.sample_rate_hz / n as f64;
        let bins = 1..=n / 2;
        let frequencies = bins.clone().map(|k| k as f64 * resolution).collect();
        let amplitudes = bins.map(|k| buffer[k].norm() * 2.0 / n as f64).collect();

        Some(Spectrum {
            frequencies,
            amplitudes,
        })
    }

    /// Copy the buffers (and the current spectrum) out.
    pub fn snapshot(&self) -> HistorySnapshot {
        HistorySnapshot {
            x: self.x.iter().copied().collect(),
            y: self.y.iter().copied().collect(),
            z: self.z.iter().copied().collect(),
            svm: self.svm.iter().copied().collect(),
            lag_pairs: self.lag_pairs.iter().copied().collect(),
            spectrum: self.spectrum(),
        }
    }
}

fn push_bounded<T>(buf: &mut VecDeque<T>, value: T, capacity: usize) {
    if buf.len() >= capacity {
        buf.pop_front();
    }
    buf.push_back(value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn small_config() -> HistoryConfig {
        HistoryConfig {
            capacity: 4,
            lag_capacity: 2,
            spectrum_window: 4,
            sample_rate_hz: 30.0,
        }
    }

    #[test]
    fn evicts_oldest_at_capacity() {
        let mut h = MotionHistory::new(small_config());
        for i in 0..6 {
            h.push([i as f64, 0.0, 0.0], i as f64);
        }
        let snap = h.snapshot();
        assert_eq!(snap.x, vec![2.0, 3.0, 4.0, 5.0]);
        assert_eq!(snap.svm, vec![2.0, 3.0, 4.0, 5.0]);
        assert_eq!(h.len(), 4);
    }

    #[test]
    fn lag_pairs_track_consecutive_svm() {
        let mut h = MotionHistory::new(small_config());
        h.push([0.0; 3], 1.0);
        assert!(h.last_two_svm().is_none());
        h.push([0.0; 3], 2.0);
        h.push([0.0; 3], 3.0);
        h.push([0.0; 3], 4.0);

        assert_eq!(h.last_two_svm(), Some((3.0, 4.0)));
        // lag buffer holds only the latest two pairs
        assert_eq!(h.snapshot().lag_pairs, vec![(2.0, 3.0), (3.0, 4.0)]);
    }

    #[test]
    fn spectrum_needs_full_window() {
        let mut h = MotionHistory::new(HistoryConfig::default());
        for _ in 0..127 {
            h.push([0.0, 0.0, 9.8], 9.8);
        }
        assert!(h.spectrum().is_none());
        h.push([0.0, 0.0, 9.8], 9.8);
        let spec = h.spectrum().unwrap();
        assert_eq!(spec.frequencies.len(), 64);
        // constant signal has no energy once the mean is removed
        assert!(spec.amplitudes.iter().all(|a| *a < 1e-9));
    }

    #[test]
    fn planned_fft_is_reused_across_calls_and_clones() {
        let mut h = MotionHistory::new(small_config());
        for v in [9.0, 11.0, 9.0, 11.0] {
            h.push([0.0; 3], v);
        }
        let first = h.spectrum().unwrap();
        assert_eq!(h.spectrum().unwrap(), first);
        assert_eq!(h.clone().spectrum().unwrap(), first);
        // Nyquist bin carries the alternating component
        assert_abs_diff_eq!(first.amplitudes[1], 2.0, epsilon = 1e-9);

        let empty = MotionHistory::new(HistoryConfig {
            spectrum_window: 0,
            ..small_config()
        });
        assert!(empty.spectrum().is_none());
    }

    #[test]
    fn spectrum_finds_walking_cadence() {
        let cfg = HistoryConfig::default();
        let mut h = MotionHistory::new(cfg);
        // 1.875 Hz sits exactly on bin 8 for N=128 at 30 Hz.
        let f = 1.875;
        for i in 0..cfg.spectrum_window {
            let t = i as f64 / cfg.sample_rate_hz;
            h.push([0.0; 3], 9.8 + 2.0 * (2.0 * std::f64::consts::PI * f * t).sin());
        }
        let spec = h.spectrum().unwrap();
        assert_abs_diff_eq!(spec.dominant_frequency().unwrap(), f, epsilon = 1e-9);
        assert_abs_diff_eq!(spec.amplitudes[7], 2.0, epsilon = 1e-6);
    }
}
