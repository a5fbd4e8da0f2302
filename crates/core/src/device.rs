//! Device locator: discovery, selection, and opening of a single meter.

use crate::error::{Error, Result};
use crate::transport::MeterTransport;
use std::ffi::CString;
use tracing::{debug, error, info};

/// Information about a discovered HID device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub vid: u16,
    pub pid: u16,
    pub path: String,
    pub serial: Option<String>,
}

/// Source of devices: enumerate by vendor/product and open one of them.
pub trait DeviceBackend {
    type Device: MeterTransport;

    /// List devices matching the vendor/product pair.
    fn enumerate(&self, vid: u16, pid: u16) -> Result<Vec<DeviceDescriptor>>;

    /// Open a previously enumerated device.
    fn open(&self, device: &DeviceDescriptor) -> Result<Self::Device>;
}

/// Pick exactly one device from the candidates.
///
/// With a serial filter, only devices whose serial equals it exactly
/// (case-sensitive) are kept. More than one survivor is
/// [`Error::AmbiguousMatch`]; the caller has to supply a serial.
pub fn select_device<'a>(
    candidates: &'a [DeviceDescriptor],
    serial: Option<&str>,
) -> Result<&'a DeviceDescriptor> {
    if candidates.is_empty() {
        return Err(Error::NotFound("no matching devices connected".into()));
    }

    let survivors: Vec<&DeviceDescriptor> = match serial {
        Some(wanted) => candidates
            .iter()
            .filter(|d| d.serial.as_deref() == Some(wanted))
            .collect(),
        None => candidates.iter().collect(),
    };

    match survivors.as_slice() {
        [] => Err(Error::NotFound(format!(
            "no device with serial '{}'",
            serial.unwrap_or_default()
        ))),
        [one] => Ok(*one),
        many => Err(Error::AmbiguousMatch { count: many.len() }),
    }
}

/// Enumerate, select and open one device through `backend`.
pub fn locate<B: DeviceBackend>(
    backend: &B,
    vid: u16,
    pid: u16,
    serial: Option<&str>,
) -> Result<B::Device> {
    let candidates = backend.enumerate(vid, pid)?;
    for dev in &candidates {
        info!(
            vid = format_args!("0x{:04X}", dev.vid),
            pid = format_args!("0x{:04X}", dev.pid),
            path = %dev.path,
            serial = dev.serial.as_deref().unwrap_or("-"),
            "Found meter"
        );
    }

    let selected = select_device(&candidates, serial).inspect_err(|e| {
        error!(
            vid = format_args!("0x{:04X}", vid),
            pid = format_args!("0x{:04X}", pid),
            "Device selection failed: {e}"
        );
    })?;

    let device = backend.open(selected).inspect_err(|e| {
        error!(path = %selected.path, "Failed to open device: {e}");
    })?;
    debug!(path = %selected.path, "Device opened");
    Ok(device)
}

/// hidapi-backed device source.
///
/// The `HidApi` context lives only as long as the backend, so enumeration
/// state is released when the backend is dropped, on every exit path.
pub struct HidBackend {
    api: hidapi::HidApi,
}

impl HidBackend {
    pub fn new() -> Result<Self> {
        let api = hidapi::HidApi::new().map_err(|e| Error::Hid(format!("hidapi init: {e}")))?;
        Ok(Self { api })
    }
}

impl DeviceBackend for HidBackend {
    type Device = HidMeter;

    fn enumerate(&self, vid: u16, pid: u16) -> Result<Vec<DeviceDescriptor>> {
        debug!(
            vid = format_args!("0x{:04X}", vid),
            pid = format_args!("0x{:04X}", pid),
            "Starting HID device enumeration"
        );

        let devices: Vec<DeviceDescriptor> = self
            .api
            .device_list()
            .filter(|info| info.vendor_id() == vid && info.product_id() == pid)
            .map(|info| DeviceDescriptor {
                vid: info.vendor_id(),
                pid: info.product_id(),
                path: info.path().to_string_lossy().into_owned(),
                serial: info.serial_number().map(|s| s.to_string()),
            })
            .collect();

        debug!(count = devices.len(), "Device enumeration complete");
        Ok(devices)
    }

    fn open(&self, device: &DeviceDescriptor) -> Result<HidMeter> {
        let open_failed = |reason: String| Error::OpenFailed {
            path: device.path.clone(),
            reason,
        };
        let path = CString::new(device.path.as_str()).map_err(|e| open_failed(e.to_string()))?;
        let hid = self
            .api
            .open_path(&path)
            .map_err(|e| open_failed(e.to_string()))?;
        Ok(HidMeter {
            device: hid,
            path: device.path.clone(),
        })
    }
}

/// An open meter; closes the HID handle on drop.
pub struct HidMeter {
    device: hidapi::HidDevice,
    path: String,
}

impl HidMeter {
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl MeterTransport for HidMeter {
    fn write(&self, data: &[u8]) -> Result<usize> {
        self.device
            .write(data)
            .map_err(|e| Error::WriteFailed(format!("hid_write: {e}")))
    }

    fn read_timeout(&self, buf: &mut [u8], timeout_ms: i32) -> Result<usize> {
        self.device
            .read_timeout(buf, timeout_ms)
            .map_err(|e| Error::ReadFailed(format!("hid_read_timeout: {e}")))
    }
}

/// List connected meters matching the vendor/product pair.
pub fn enumerate(vid: u16, pid: u16) -> Result<Vec<DeviceDescriptor>> {
    HidBackend::new()?.enumerate(vid, pid)
}

/// Find and open exactly one meter.
pub fn find(vid: u16, pid: u16, serial: Option<&str>) -> Result<HidMeter> {
    let backend = HidBackend::new()?;
    locate(&backend, vid, pid, serial)
}


#[cfg(test)]
mod tests {
    use super::mock::{descriptor, MockBackend};
    use super::*;
    use crate::{METER_PID, METER_VID};

    #[test]
    fn select_from_empty_is_not_found() {
        assert!(matches!(select_device(&[], None), Err(Error::NotFound(_))));
        assert!(matches!(
            select_device(&[], Some("A1")),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn select_single_without_filter() {
        let devs = [descriptor("/dev/hidraw0", None)];
        assert_eq!(select_device(&devs, None).unwrap().path, "/dev/hidraw0");
    }

    #[test]
    fn select_multiple_without_filter_is_ambiguous() {
        let devs = [
            descriptor("/dev/hidraw0", Some("A1")),
            descriptor("/dev/hidraw1", Some("B2")),
        ];
        assert!(matches!(
            select_device(&devs, None),
            Err(Error::AmbiguousMatch { count: 2 })
        ));
    }

    #[test]
    fn select_by_serial_among_many() {
        let devs = [
            descriptor("/dev/hidraw0", Some("A1")),
            descriptor("/dev/hidraw1", Some("B2")),
            descriptor("/dev/hidraw2", None),
        ];
        assert_eq!(
            select_device(&devs, Some("B2")).unwrap().path,
            "/dev/hidraw1"
        );
    }

    #[test]
    fn serial_match_is_exact_and_case_sensitive() {
        let devs = [
            descriptor("/dev/hidraw0", Some("ab12")),
            descriptor("/dev/hidraw1", Some("AB12 ")),
        ];
        assert!(matches!(
            select_device(&devs, Some("AB12")),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn duplicate_serials_are_ambiguous() {
        let devs = [
            descriptor("/dev/hidraw0", Some("SAME")),
            descriptor("/dev/hidraw1", Some("SAME")),
        ];
        assert!(matches!(
            select_device(&devs, Some("SAME")),
            Err(Error::AmbiguousMatch { count: 2 })
        ));
    }

    #[test]
    fn locate_opens_selected_device() {
        let backend = MockBackend::new(vec![
            descriptor("/dev/hidraw3", Some("X")),
            descriptor("/dev/hidraw4", Some("Y")),
        ]);
        locate(&backend, METER_VID, METER_PID, Some("Y")).unwrap();
        assert_eq!(*backend.opened.borrow(), vec!["/dev/hidraw4".to_string()]);
    }

    #[test]
    fn locate_ignores_other_products() {
        let mut other = descriptor("/dev/hidraw9", None);
        other.pid = 0x1234;
        let backend = MockBackend::new(vec![other]);
        assert!(matches!(
            locate(&backend, METER_VID, METER_PID, None),
            Err(Error::NotFound(_))
        ));
        assert!(backend.opened.borrow().is_empty());
    }

    #[test]
    fn locate_reports_open_failure() {
        let mut backend = MockBackend::new(vec![descriptor("/dev/hidraw0", None)]);
        backend.unopenable.push("/dev/hidraw0".into());
        assert!(matches!(
            locate(&backend, METER_VID, METER_PID, None),
            Err(Error::OpenFailed { .. })
        ));
    }

    #[test]
    fn ambiguous_match_never_opens() {
        let backend = MockBackend::new(vec![
            descriptor("/dev/hidraw0", None),
            descriptor("/dev/hidraw1", None),
        ]);
        assert!(locate(&backend, METER_VID, METER_PID, None).is_err());
        assert!(backend.opened.borrow().is_empty());
    }
}
