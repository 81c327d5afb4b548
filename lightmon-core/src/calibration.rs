//! Threshold calibration.
//!
//! A calibration takes one sample and moves the failure threshold to
//! `sample + margin`. A failed read leaves the previous threshold in place.

use serde::{Deserialize, Serialize};

/// Threshold used until the first calibration after boot.
pub const DEFAULT_THRESHOLD: u16 = 3500;

/// Headroom added above the calibration sample.
pub const DEFAULT_MARGIN: u16 = 50;

/// Failure threshold for test samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Calibration {
    threshold: u16,
    margin: u16,
}

impl Calibration {
    /// Create with an explicit starting threshold and margin.
    pub fn new(threshold: u16, margin: u16) -> Self {
        Self { threshold, margin }
    }

    /// Current threshold.
    pub fn threshold(&self) -> u16 {
        self.threshold
    }

    /// Margin applied on calibration.
    pub fn margin(&self) -> u16 {
        self.margin
    }

    /// Recalibrate from a fresh sample. Returns the new threshold.
    pub fn apply(&mut self, sample: u16) -> u16 {
        self.threshold = sample.saturating_add(self.margin);
        self.threshold
    }

    /// True when a sample is judged as a failure.
    pub fn is_failure(&self, sample: u16) -> bool {
        sample > self.threshold
    }
}

impl Default for Calibration {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD, DEFAULT_MARGIN)
    }
}
