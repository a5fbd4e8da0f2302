//! HID transport abstraction for meter communication.
//!
//! Provides a trait-based transport layer so that real HID devices and
//! mock devices share the same interface, plus the `send`/`receive`
//! primitives that enforce the fixed 8-byte report size.

use crate::error::{Error, Result};
use crate::protocol::{Report, REPORT_LEN};
use std::time::{Duration, Instant};
use tracing::{trace, warn};

/// Abstraction over raw HID read/write.
pub trait MeterTransport: Send {
    /// Write a raw report, returning the number of bytes written.
    fn write(&self, data: &[u8]) -> Result<usize>;

    /// Read into `buf`, blocking for at most `timeout_ms`.
    ///
    /// Returns the number of bytes read; 0 means the read timed out.
    fn read_timeout(&self, buf: &mut [u8], timeout_ms: i32) -> Result<usize>;
}

/// Write one 8-byte report. A short write is a transport fault, not backpressure.
pub fn send(transport: &dyn MeterTransport, report: &Report) -> Result<()> {
    trace!(report = %report, "TX");
    let written = transport.write(report.as_bytes())?;
    if written != REPORT_LEN {
        warn!(written, "short write to device");
        return Err(Error::WriteFailed(format!(
            "wrote {written} of {REPORT_LEN} bytes"
        )));
    }
    Ok(())
}

/// Collect one full 8-byte report.
///
/// Each underlying read is given the full `timeout`, while the total time
/// since the first read is tracked separately. Once the total exceeds
/// `timeout` with bytes still missing, the call fails with [`Error::Timeout`].
/// Worst-case latency is therefore `timeout` plus one read slice.
pub fn receive(transport: &dyn MeterTransport, timeout: Duration) -> Result<Report> {
    let slice_ms = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
    let mut buf = [0u8; REPORT_LEN];
    let mut filled = 0usize;
    let start = Instant::now();

    while filled < REPORT_LEN {
        let remaining = &mut buf[filled..];
        let offered = remaining.len();
        let n = transport.read_timeout(remaining, slice_ms)?;
        if n > offered {
            return Err(Error::ReadFailed(format!(
                "transport reported {n} bytes for a {offered}-byte buffer"
            )));
        }
        filled += n;

        if filled < REPORT_LEN && start.elapsed() > timeout {
            trace!(filled, elapsed = ?start.elapsed(), "receive timed out");
            return Err(Error::Timeout(timeout));
        }
    }

    let report = Report::from_slice(&buf[..filled])?;
    trace!(report = %report, "RX");
    Ok(report)
}


#[cfg(test)]
mod tests {
    use super::mock::{MockTransport, ReadStep, WhenIdle};
    use super::*;

    /// Returns more bytes than it was offered.
    struct Overfill;

    impl MeterTransport for Overfill {
        fn write(&self, data: &[u8]) -> Result<usize> {
            Ok(data.len())
        }

        fn read_timeout(&self, buf: &mut [u8], _timeout_ms: i32) -> Result<usize> {
            Ok(buf.len() + 1)
        }
    }

    #[test]
    fn send_writes_full_report() {
        let mock = MockTransport::new();
        send(&mock, &Report::capture()).unwrap();
        assert_eq!(mock.writes(), vec![Report::capture().as_bytes().to_vec()]);
    }

    #[test]
    fn send_rejects_short_write() {
        let mock = MockTransport::new();
        mock.limit_writes(5);
        let err = send(&mock, &Report::capture()).unwrap_err();
        assert!(matches!(err, Error::WriteFailed(_)));
    }

    #[test]
    fn receive_single_read() {
        let mock = MockTransport::new();
        mock.push_report([1, 2, 3, 4, 5, 6, 7, 8]);
        let report = receive(&mock, Duration::from_millis(100)).unwrap();
        assert_eq!(report.as_bytes(), &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn receive_assembles_chunks() {
        let mock = MockTransport::new();
        mock.push_read(ReadStep::Data(vec![0x02, 0xC8]));
        mock.push_read(ReadStep::Data(vec![]));
        mock.push_read(ReadStep::Data(vec![0x12, 0, 0]));
        mock.push_read(ReadStep::Data(vec![0, 0, 0]));
        let report = receive(&mock, Duration::from_millis(200)).unwrap();
        assert_eq!(report.as_bytes(), &[0x02, 0xC8, 0x12, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn receive_never_returns_partial_report() {
        let mock = MockTransport::new();
        mock.push_read(ReadStep::Data(vec![0xAA; 3]));
        mock.push_read(ReadStep::Data(vec![0xBB; 4]));
        let err = receive(&mock, Duration::from_millis(30)).unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }

    #[test]
    fn receive_times_out_on_silent_device() {
        let mock = MockTransport::with_idle(WhenIdle::Stall);
        let timeout = Duration::from_millis(500);
        let start = Instant::now();
        let err = receive(&mock, timeout).unwrap_err();
        let elapsed = start.elapsed();

        assert!(matches!(err, Error::Timeout(t) if t == timeout));
        assert!(elapsed >= timeout);
        // At most one extra read slice of overshoot.
        assert!(elapsed < timeout * 2 + Duration::from_millis(250));
    }

    #[test]
    fn receive_read_failure_is_not_timeout() {
        let mock = MockTransport::new();
        mock.push_read(ReadStep::Data(vec![1, 2]));
        mock.push_read(ReadStep::Fail);
        let err = receive(&mock, Duration::from_millis(100)).unwrap_err();
        assert!(matches!(err, Error::ReadFailed(_)));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn receive_rejects_overfilled_read() {
        let err = receive(&Overfill, Duration::from_millis(10)).unwrap_err();
        assert!(matches!(err, Error::ReadFailed(_)));
    }
}
