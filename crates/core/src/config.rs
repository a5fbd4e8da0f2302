//! Run settings: built-in defaults layered with TOML config files.
//!
//! Files are applied in order, each overriding only the keys it sets:
//!
//! ```toml
//! vendor_id = 0x64bd
//! product_id = 0x74e3
//! serial = "0123456789"
//! range = "50-100"
//! fast = true
//! dbc = false
//! interval_ms = 500
//! timeout_ms = 500
//! ```

use crate::error::{Error, Result};
use crate::monitor::PollOptions;
use crate::protocol::{ConfigRequest, Range, Speed, Weighting};
use crate::{METER_PID, METER_VID};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Upper bound for interval and timeout values, in milliseconds.
pub const MAX_PERIOD_MS: u64 = 60 * 60 * 1000;

/// Fully resolved settings for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub vendor_id: u16,
    pub product_id: u16,
    /// Required serial number; `None` accepts any single device.
    pub serial: Option<String>,
    pub range: Range,
    pub fast: bool,
    pub dbc: bool,
    pub interval: Duration,
    pub capture_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            vendor_id: METER_VID,
            product_id: METER_PID,
            serial: None,
            range: Range::R50To100,
            fast: true,
            dbc: false,
            interval: Duration::from_millis(500),
            capture_timeout: Duration::from_millis(500),
        }
    }
}

/// One config file. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
    pub serial: Option<String>,
    pub range: Option<Range>,
    pub fast: Option<bool>,
    pub dbc: Option<bool>,
    pub interval_ms: Option<u64>,
    pub timeout_ms: Option<u64>,
}

impl ConfigFile {
    /// Parse TOML text.
    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    /// Read and parse a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("reading {}: {e}", path.display())))?;
        Self::parse(&text).map_err(|e| match e {
            Error::Config(msg) => Error::Config(format!("{}: {msg}", path.display())),
            other => other,
        })
    }
}

impl Settings {
    /// Apply the keys set in `file` on top of these settings.
    pub fn merge(&mut self, file: ConfigFile) -> Result<()> {
        if let Some(v) = file.vendor_id {
            self.vendor_id = v;
        }
        if let Some(p) = file.product_id {
            self.product_id = p;
        }
        if let Some(s) = file.serial {
            self.serial = (!s.is_empty()).then_some(s);
        }
        if let Some(r) = file.range {
            self.range = r;
        }
        if let Some(f) = file.fast {
            self.fast = f;
        }
        if let Some(d) = file.dbc {
            self.dbc = d;
        }
        if let Some(ms) = file.interval_ms {
            self.interval = period("interval_ms", ms)?;
        }
        if let Some(ms) = file.timeout_ms {
            self.capture_timeout = period("timeout_ms", ms)?;
        }
        Ok(())
    }

    /// Defaults, then each file in order.
    pub fn load<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let mut settings = Self::default();
        for path in paths {
            let path = path.as_ref();
            settings.merge(ConfigFile::load(path)?)?;
            debug!(path = %path.display(), "Configuration added");
        }
        Ok(settings)
    }

    /// Set the capture interval from milliseconds.
    pub fn set_interval_ms(&mut self, ms: u64) -> Result<()> {
        self.interval = period("interval_ms", ms)?;
        Ok(())
    }

    /// Set the capture timeout from milliseconds.
    pub fn set_timeout_ms(&mut self, ms: u64) -> Result<()> {
        self.capture_timeout = period("timeout_ms", ms)?;
        Ok(())
    }

    pub fn config_request(&self) -> ConfigRequest {
        ConfigRequest {
            range: self.range,
            speed: if self.fast { Speed::Fast } else { Speed::Slow },
            weighting: if self.dbc { Weighting::C } else { Weighting::A },
        }
    }

    pub fn poll_options(&self) -> PollOptions {
        PollOptions {
            interval: self.interval,
            capture_timeout: self.capture_timeout,
            max_readings: None,
        }
    }
}

fn period(field: &'static str, ms: u64) -> Result<Duration> {
    if !(1..=MAX_PERIOD_MS).contains(&ms) {
        return Err(Error::OutOfRange {
            field,
            value: ms,
            min: 1,
            max: MAX_PERIOD_MS,
        });
    }
    Ok(Duration::from_millis(ms))
}
