//! Meter wire protocol: 8-byte HID reports in both directions.
//!
//! Commands (host → device):
//! - Configure: `[0x56, range | FAST? | DBC?, 0, 0, 0, 0, 0, 0]`
//! - Capture:   `[0xB3, 0, 0, 0, 0, 0, 0, 0]`
//!
//! Capture response (device → host):
//! - bytes 0..1: level in tenths of a dB, big-endian
//! - byte 2: flags (bits 0-3 range, bit 4 dB(C), bit 5 hold max, bit 6 fast)
//!
//! The configure acknowledgement is a full 8-byte report whose content is
//! not interpreted.

use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// Every report, inbound and outbound, is exactly this long.
pub const REPORT_LEN: usize = 8;

/// Opcode for the configure command.
pub const CMD_CONFIGURE: u8 = 0x56;
/// Opcode for the capture command.
pub const CMD_CAPTURE: u8 = 0xB3;

/// Fast response mode flag.
pub const FLAG_FAST: u8 = 0x40;
/// Max-hold display mode flag. Reported by the device, never configured.
pub const FLAG_HOLD_MAX: u8 = 0x20;
/// dB(C) weighting flag. Cleared means dB(A).
pub const FLAG_DBC: u8 = 0x10;
/// Mask of the range index within the flags byte.
pub const RANGE_MASK: u8 = 0x0F;

/// A raw 8-byte HID report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Report([u8; REPORT_LEN]);

impl Report {
    pub fn new(bytes: [u8; REPORT_LEN]) -> Self {
        Self(bytes)
    }

    /// Build a report from a slice, rejecting anything that is not 8 bytes.
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        let bytes: [u8; REPORT_LEN] = data.try_into().map_err(|_| {
            Error::Protocol(format!(
                "report must be {REPORT_LEN} bytes, got {}",
                data.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; REPORT_LEN] {
        &self.0
    }

    /// The capture command report.
    pub fn capture() -> Self {
        let mut bytes = [0u8; REPORT_LEN];
        bytes[0] = CMD_CAPTURE;
        Self(bytes)
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x} - {:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]
        )
    }
}

/// Measurement range presets supported by the meter firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Deserialize)]
#[serde(try_from = "String")]
#[repr(u8)]
pub enum Range {
    R30To130 = 0,
    R30To80 = 1,
    R50To100 = 2,
    R60To110 = 3,
    R80To130 = 4,
}

impl Range {
    /// All ranges, ordered by wire index.
    pub const ALL: &'static [Range] = &[
        Range::R30To130,
        Range::R30To80,
        Range::R50To100,
        Range::R60To110,
        Range::R80To130,
    ];

    /// Look up a range by its wire index (0-4).
    pub fn from_index(index: u8) -> Result<Self> {
        Self::ALL
            .get(index as usize)
            .copied()
            .ok_or(Error::OutOfRange {
                field: "range",
                value: index as u64,
                min: 0,
                max: (Self::ALL.len() - 1) as u64,
            })
    }

    /// Wire index of this range.
    pub fn index(&self) -> u8 {
        *self as u8
    }

    /// Short label, as accepted on the command line and in config files.
    pub fn label(&self) -> &'static str {
        match self {
            Self::R30To130 => "30-130",
            Self::R30To80 => "30-80",
            Self::R50To100 => "50-100",
            Self::R60To110 => "60-110",
            Self::R80To130 => "80-130",
        }
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} dB", self.label())
    }
}

impl FromStr for Range {
    type Err = Error;

    /// Accepts "50-100" as well as "50-100 dB" / "50-100dB".
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let label = trimmed
            .strip_suffix("dB")
            .or_else(|| trimmed.strip_suffix("db"))
            .unwrap_or(trimmed)
            .trim_end();
        Self::ALL
            .iter()
            .copied()
            .find(|r| r.label() == label)
            .ok_or_else(|| {
                let valid: Vec<&str> = Self::ALL.iter().map(|r| r.label()).collect();
                Error::Protocol(format!(
                    "unknown range '{s}' (expected one of: {})",
                    valid.join(", ")
                ))
            })
    }
}

impl TryFrom<String> for Range {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

/// Frequency weighting curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Weighting {
    A,
    C,
}

impl Weighting {
    pub fn label(&self) -> &'static str {
        match self {
            Self::A => "A",
            Self::C => "C",
        }
    }
}

/// Device-side averaging speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Speed {
    Fast,
    Slow,
}

impl Speed {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Slow => "slow",
        }
    }
}

/// Settings sent with the configure command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigRequest {
    pub range: Range,
    pub speed: Speed,
    pub weighting: Weighting,
}

impl ConfigRequest {
    /// Encode into the configure command report.
    pub fn encode(&self) -> Report {
        let mut flags = self.range.index();
        if self.speed == Speed::Fast {
            flags |= FLAG_FAST;
        }
        if self.weighting == Weighting::C {
            flags |= FLAG_DBC;
        }

        let mut bytes = [0u8; REPORT_LEN];
        bytes[0] = CMD_CONFIGURE;
        bytes[1] = flags;
        Report(bytes)
    }
}

/// A decoded capture response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Measurement {
    /// Sound pressure level in tenths of a dB (712 = 71.2 dB).
    pub level_decibel: u16,
    pub weighting: Weighting,
    pub speed: Speed,
    /// `None` when the device reported a range index outside 0-4.
    pub range: Option<Range>,
    /// The meter is holding its maximum reading.
    pub hold_max: bool,
}

impl Measurement {
    /// Decode a capture response report.
    pub fn decode(report: &Report) -> Self {
        let b = report.as_bytes();
        let level_decibel = u16::from_be_bytes([b[0], b[1]]);
        let flags = b[2];

        Self {
            level_decibel,
            weighting: if flags & FLAG_DBC != 0 {
                Weighting::C
            } else {
                Weighting::A
            },
            speed: if flags & FLAG_FAST != 0 {
                Speed::Fast
            } else {
                Speed::Slow
            },
            range: Range::from_index(flags & RANGE_MASK).ok(),
            hold_max: flags & FLAG_HOLD_MAX != 0,
        }
    }

    /// Level in dB.
    pub fn level_db(&self) -> f64 {
        f64::from(self.level_decibel) / 10.0
    }

    /// Range label, or "unknown" for out-of-domain range indices.
    pub fn range_label(&self) -> &'static str {
        self.range.map(|r| r.label()).unwrap_or("unknown")
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.1} dB({})  {}  range {}",
            self.level_db(),
            self.weighting.label(),
            self.speed.label(),
            match self.range {
                Some(r) => r.to_string(),
                None => "unknown".to_string(),
            }
        )
    }
}
