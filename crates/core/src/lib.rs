//! spl-meter-core: device discovery, HID session protocol, and measurement decoding.
//!
//! This crate talks to GM1356-family USB HID sound level meters: it locates a
//! single meter, configures its range, speed and weighting, and polls it for
//! sound pressure level readings over fixed 8-byte reports.

pub mod config;
pub mod device;
pub mod error;
pub mod monitor;
pub mod protocol;
pub mod session;
pub mod transport;

/// USB vendor ID of the supported meter family.
pub const METER_VID: u16 = 0x64BD;

/// USB product ID of the supported meter family.
pub const METER_PID: u16 = 0x74E3;
