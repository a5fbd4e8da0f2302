//! Cooperative polling loop with an external stop token.

use crate::error::Result;
use crate::protocol::Measurement;
use crate::session::Session;
use crate::transport::MeterTransport;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::debug;

/// Longest uninterrupted sleep between stop-token checks.
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Cancellation token shared between the polling loop and whoever stops it.
#[derive(Debug, Clone, Default)]
pub struct StopToken(Arc<AtomicBool>);

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Loop timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    /// Pause between captures.
    pub interval: Duration,
    /// Total timeout for each capture response.
    pub capture_timeout: Duration,
    /// Stop after this many readings.
    pub max_readings: Option<u64>,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            capture_timeout: Duration::from_millis(500),
            max_readings: None,
        }
    }
}

/// A measurement with the UTC time it was decoded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub timestamp: DateTime<Utc>,
    pub measurement: Measurement,
}

impl Reading {
    pub fn now(measurement: Measurement) -> Self {
        Self {
            timestamp: Utc::now(),
            measurement,
        }
    }

    /// Flat output record.
    pub fn record(&self) -> ReadingRecord {
        let m = &self.measurement;
        ReadingRecord {
            timestamp: self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            level_db: m.level_db(),
            weighting: m.weighting.label(),
            speed: m.speed.label(),
            range: m.range_label(),
            hold_max: m.hold_max,
        }
    }
}

impl std::fmt::Display for Reading {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}  {}",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.measurement
        )
    }
}

/// Serializable form of a [`Reading`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadingRecord {
    pub timestamp: String,
    pub level_db: f64,
    pub weighting: &'static str,
    pub speed: &'static str,
    pub range: &'static str,
    pub hold_max: bool,
}

/// Poll the meter until `stop` is set or `max_readings` is reached.
///
/// Each cycle captures once, hands a successful reading to `sink`, then
/// sleeps for the interval. Capture timeouts are skipped; any other error
/// ends the loop and is returned. Returns the number of readings delivered.
pub fn run<T, F>(
    session: &mut Session<T>,
    opts: &PollOptions,
    stop: &StopToken,
    mut sink: F,
) -> Result<u64>
where
    T: MeterTransport,
    F: FnMut(&Reading),
{
    let mut delivered = 0u64;

    while !stop.is_stopped() {
        match session.capture(opts.capture_timeout) {
            Ok(measurement) => {
                let reading = Reading::now(measurement);
                sink(&reading);
                delivered += 1;
                if opts.max_readings.is_some_and(|max| delivered >= max) {
                    break;
                }
            }
            Err(e) if e.is_recoverable() => {
                debug!("Skipping poll cycle: {e}");
            }
            Err(e) => return Err(e),
        }

        sleep_unless_stopped(opts.interval, stop);
    }

    debug!(delivered, "Polling loop finished");
    Ok(delivered)
}

/// Sleep for `total`, waking early once `stop` is set.
fn sleep_unless_stopped(total: Duration, stop: &StopToken) {
    let mut left = total;
    while !left.is_zero() && !stop.is_stopped() {
        let step = left.min(SLEEP_SLICE);
        thread::sleep(step);
        left -= step;
    }
}
