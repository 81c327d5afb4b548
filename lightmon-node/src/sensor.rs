//! Light sensor and test indicator.
//!
//! The protocol only needs a raw 16-bit reading and an on/off indicator.
//! Hardware specifics live behind the [`Sensor`] and [`Indicator`] traits.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tracing::info;

/// Sensor errors.
#[derive(Debug, Error)]
pub enum SensorError {
    /// No reading available.
    #[error("no reading available")]
    NoReading,

    /// Source produced something that is not a reading.
    #[error("invalid reading: {0}")]
    Invalid(String),

    /// Reading the source failed.
    #[error("sensor i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Source of raw light readings.
pub trait Sensor: Send {
    /// Take one reading.
    fn read(&mut self) -> Result<u16, SensorError>;
}

/// Physical test indicator (the lamp under test).
pub trait Indicator: Send {
    /// Switch the indicator on or off.
    fn set(&mut self, on: bool);
}

impl<S: Sensor + ?Sized> Sensor for Box<S> {
    fn read(&mut self) -> Result<u16, SensorError> {
        (**self).read()
    }
}

impl<I: Indicator + ?Sized> Indicator for Box<I> {
    fn set(&mut self, on: bool) {
        (**self).set(on)
    }
}

/// Always returns the same value.
#[derive(Debug, Clone, Copy)]
pub struct FixedSensor(pub u16);

impl Sensor for FixedSensor {
    fn read(&mut self) -> Result<u16, SensorError> {
        Ok(self.0)
    }
}

/// Reads an integer from a text file on every sample.
///
/// Fits Linux IIO ADC channels such as
/// `/sys/bus/iio/devices/iio:device0/in_voltage0_raw`.
#[derive(Debug, Clone)]
pub struct FileSensor {
    path: PathBuf,
}

impl FileSensor {
    /// Read from `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Sensor for FileSensor {
    fn read(&mut self) -> Result<u16, SensorError> {
        let text = std::fs::read_to_string(&self.path)?;
        let trimmed = text.trim();
        trimmed
            .parse::<u16>()
            .map_err(|_| SensorError::Invalid(trimmed.to_string()))
    }
}

/// Converts raw ADC counts from a light-dependent resistor divider into
/// resistance in ohms.
///
/// The divider is a 10 kΩ resistor against a 3.3 V rail read by an ADC
/// with 5000 counts full scale. Results are saturated into `u16`.
#[derive(Debug, Clone)]
pub struct LdrSensor<S> {
    inner: S,
}

impl<S: Sensor> LdrSensor<S> {
    /// Wrap a raw ADC source.
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    /// Resistance for one ADC reading.
    pub fn resistance(adc: u16) -> u16 {
        const RAIL_VOLTS: f64 = 3.3;
        const FULL_SCALE: f64 = 5000.0;
        const FIXED_OHMS: f64 = 10_000.0;

        let volts = f64::from(adc) * RAIL_VOLTS / FULL_SCALE;
        if volts >= RAIL_VOLTS {
            return u16::MAX;
        }
        let ohms = FIXED_OHMS * volts / (RAIL_VOLTS - volts);
        // `as` saturates float-to-int casts
        ohms.round() as u16
    }
}

impl<S: Sensor> Sensor for LdrSensor<S> {
    fn read(&mut self) -> Result<u16, SensorError> {
        self.inner.read().map(Self::resistance)
    }
}

/// Plays back a script of readings; shared so tests can append while a
/// runtime owns the sensor.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSensor {
    inner: Arc<Mutex<ScriptInner>>,
}

#[derive(Debug, Default)]
struct ScriptInner {
    queue: VecDeque<Result<u16, String>>,
    fallback: Option<u16>,
}

impl ScriptedSensor {
    /// Create an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reading.
    pub fn push(&self, value: u16) {
        self.lock().queue.push_back(Ok(value));
    }

    /// Queue a failed read.
    pub fn push_failure(&self, error: &str) {
        self.lock().queue.push_back(Err(error.to_string()));
    }

    /// Value returned once the queue is empty.
    pub fn set_fallback(&self, value: u16) {
        self.lock().fallback = Some(value);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ScriptInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Sensor for ScriptedSensor {
    fn read(&mut self) -> Result<u16, SensorError> {
        let mut inner = self.lock();
        match inner.queue.pop_front() {
            Some(Ok(value)) => Ok(value),
            Some(Err(error)) => Err(SensorError::Invalid(error)),
            None => inner.fallback.ok_or(SensorError::NoReading),
        }
    }
}

/// Indicator that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingIndicator;

impl Indicator for LoggingIndicator {
    fn set(&mut self, on: bool) {
        info!(on, "test indicator");
    }
}

/// Indicator that records every change; clones share the record.
#[derive(Debug, Clone, Default)]
pub struct RecordingIndicator {
    changes: Arc<Mutex<Vec<bool>>>,
}

impl RecordingIndicator {
    /// Create an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every state set so far.
    pub fn changes(&self) -> Vec<bool> {
        self.changes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Latest state (off if never set).
    pub fn is_on(&self) -> bool {
        self.changes().last().copied().unwrap_or(false)
    }
}

impl Indicator for RecordingIndicator {
    fn set(&mut self, on: bool) {
        self.changes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(on);
    }
}
